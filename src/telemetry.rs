//! Log subscriber installation for the binary.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

/// Installs a stderr `fmt` subscriber filtered by `directives` (e.g. `info`, `ragline=debug`).
///
/// stdout is left free for the answer itself.
pub fn init(directives: &str) -> Result<()> {
    let filter = EnvFilter::try_new(directives)
        .with_context(|| format!("invalid log filter {directives:?}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed to install log subscriber: {err}"))
}
