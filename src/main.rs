use anyhow::Result;
use clap::Parser;
use syscallmeter::{cli::Cli, harness, settings::Settings};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; `--debug` raises the level to trace
fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::TRACE
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let available = harness::allowed_cpus()?.len();
    println!("Found {} cores", available);
    let settings = Settings::from_cli(&args, available)?;

    init_tracing(settings.debug);
    settings.print_banner();

    let report = harness::run(settings)?;
    if !report.success() {
        anyhow::bail!("{} of {} workers failed", report.failed, report.workers);
    }

    Ok(())
}
