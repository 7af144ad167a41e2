use anyhow::Result;
use clap::Parser;
use ragline::{telemetry, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_filter)?;
    let mut pipeline = cli.build_pipeline()?;
    let report = pipeline.run(&cli.query)?;
    println!("{}", report.record.answer.trim_end());
    Ok(())
}
