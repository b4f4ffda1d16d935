// =============================================================================
// pipeline.rs - THE PARADE RING
// =============================================================================
//
// The three ways to run the engine, each a straight line:
//
//   results: probe results menu -> extract podiums -> publish results.json
//   cards:   probe meetings menu -> fetch races per meeting -> publish cards.json
//   csv:     providers + CSV rows -> replay links -> publish data/results.json
//
// Everything is awaited in order on one thread. The API variants check for
// credentials before the first request goes out.
// =============================================================================

use std::fmt;

use clap::ValueEnum;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::extract::{build_cards, extract_races};
use crate::metrics::RunMetrics;
use crate::models::{CardsBody, CsvBody, ResultsBody, Snapshot};
use crate::prober::{accept_meeting_list, accept_results_payload, HttpTransport, ProbeMenu, Prober, Transport};
use crate::replay::{build_csv_races, fetch_source_rows, load_providers};
use crate::snapshot::{SerializationStyle, SnapshotWriter, WriteResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Variant {
    /// Finished races and their first three home.
    Results,
    /// Today's declared runners, meeting by meeting.
    Cards,
    /// Replay links built from a CSV feed.
    Csv,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Variant::Results => "results",
            Variant::Cards => "cards",
            Variant::Csv => "csv",
        };
        f.write_str(name)
    }
}

/// Run one variant end to end against the real upstreams.
pub async fn run(variant: Variant, config: &Config, metrics: &RunMetrics) -> Result<WriteResult> {
    match variant {
        Variant::Results => {
            let transport = HttpTransport::new(config)?;
            run_results(config, &transport, metrics).await
        }
        Variant::Cards => {
            let transport = HttpTransport::new(config)?;
            run_cards(config, &transport, metrics).await
        }
        Variant::Csv => run_csv(config, metrics).await,
    }
}

pub async fn run_results(config: &Config, transport: &dyn Transport, metrics: &RunMetrics) -> Result<WriteResult> {
    let date = config.meeting_date_str();
    let prober = Prober::new(transport, metrics);

    let accepted = prober
        .probe(&ProbeMenu::results(), &date, &config.countries, accept_results_payload)
        .await?;
    info!(attempt = %accepted.attempt, "Results endpoint selected");

    let races = extract_races(&accepted.value, &date)?;
    for race in &races {
        debug!(race = %race, "Extracted");
    }
    metrics.add_races(races.len());
    info!(races = races.len(), date = date.as_str(), "Results extracted");

    let writer = SnapshotWriter::new(SerializationStyle::SortedCompact);
    let mut snapshot = Snapshot::new(ResultsBody { races });
    let result = writer.write_if_changed(&mut snapshot, &config.results_path).await?;
    metrics.record_write(result.changed);
    Ok(result)
}

pub async fn run_cards(config: &Config, transport: &dyn Transport, metrics: &RunMetrics) -> Result<WriteResult> {
    let date = config.meeting_date_str();
    let prober = Prober::new(transport, metrics);

    let accepted = prober
        .probe(&ProbeMenu::meetings(), &date, &config.countries, accept_meeting_list)
        .await?;
    info!(
        attempt = %accepted.attempt,
        meetings = accepted.value.len(),
        "Meetings endpoint selected"
    );

    let meetings = build_cards(&prober, &accepted.value, &date, metrics).await?;

    let writer = SnapshotWriter::new(SerializationStyle::SortedCompact);
    let mut snapshot = Snapshot::new(CardsBody { meetings });
    let result = writer.write_if_changed(&mut snapshot, &config.cards_path).await?;
    metrics.record_write(result.changed);
    Ok(result)
}

pub async fn run_csv(config: &Config, metrics: &RunMetrics) -> Result<WriteResult> {
    let providers = load_providers(&config.providers_file)?;
    let rows = fetch_source_rows(config).await?;
    let races = build_csv_races(&rows, &providers, &config.course_aliases)?;
    metrics.add_races(races.len());
    info!(races = races.len(), providers = providers.len(), "CSV races built");

    let writer = SnapshotWriter::new(SerializationStyle::InsertionPretty);
    let mut snapshot = Snapshot::new(CsvBody { races });
    let result = writer.write_if_changed(&mut snapshot, &config.csv_output_path).await?;
    metrics.record_write(result.changed);
    Ok(result)
}
