// ██████╗  ██████╗██████╗     ██╗  ██╗██╗   ██╗██████╗
// ██╔══██╗██╔════╝██╔══██╗    ██║  ██║██║   ██║██╔══██╗
// ██║  ██║██║     ██████╔╝    ███████║██║   ██║██████╔╝
// ██║  ██║██║     ██╔══██╗    ██╔══██║██║   ██║██╔══██╗
// ██████╔╝╚██████╗██║  ██║    ██║  ██║╚██████╔╝██████╔╝
// ╚═════╝  ╚═════╝╚═╝  ╚═╝    ╚═╝  ╚═╝ ╚═════╝ ╚═════╝
//
// E N G I N E
//
// Results, racecards and replay links for a static racing site.
// Run it from a scheduled job, commit whatever changed, go to the bar.

mod config;
mod error;
mod extract;
mod metrics;
mod models;
mod normalize;
mod pipeline;
mod prober;
mod replay;
mod snapshot;
#[cfg(test)]
mod testing;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use crate::config::Config;
use crate::metrics::RunMetrics;
use crate::pipeline::Variant;

#[derive(Debug, Parser)]
#[command(name = "dcr_hub_engine", version, about = "Publish DCR Hub racing snapshots")]
struct Cli {
    /// Which snapshot to build.
    #[arg(value_enum, default_value_t = Variant::Results)]
    variant: Variant,
}

fn print_banner() {
    let banner = r#"
    ╔══════════════════════════════════════════════════════════╗
    ║   D C R   H U B   E N G I N E                            ║
    ║                                                          ║
    ║   Modes:  results | cards | csv                          ║
    ║   Output: JSON snapshots, written only when they change  ║
    ║                                                          ║
    ║   "They're under starter's orders..."                    ║
    ╚══════════════════════════════════════════════════════════╝
    "#;
    println!("{}", banner);
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();
    print_banner();

    let span = info_span!("run", run_id = %Uuid::new_v4(), variant = %cli.variant);
    match execute(cli.variant).instrument(span).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(variant: Variant) -> anyhow::Result<()> {
    let config = Config::from_env();
    info!(
        api_base = config.api_base.as_str(),
        meeting_date = config.meeting_date_str().as_str(),
        countries = config.countries.as_str(),
        "Configuration loaded"
    );

    let metrics = RunMetrics::new();
    let outcome = pipeline::run(variant, &config, &metrics).await;
    metrics.log_summary();

    let result = outcome.with_context(|| format!("{variant} run failed"))?;
    info!(
        path = %result.path.display(),
        changed = result.changed,
        bytes = result.bytes,
        hash = result.hash.as_str(),
        "Done"
    );
    Ok(())
}
