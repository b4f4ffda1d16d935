// =============================================================================
// models.rs - THE RACECARD
// =============================================================================
//
// The stable output schema. Whatever the provider calls things today, by the
// time data reaches these structs it has been normalized into plain strings
// with fixed names, and the static site can rely on them.
//
// Field declaration order matters: the CSV variant writes snapshots in
// insertion order, so the order below is the order on disk.
// =============================================================================

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A placed horse, as far as the results feed cares.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Runner {
    pub horse: String,
    pub jockey: String,
    pub trainer: String,
    /// Starting price, e.g. "4/1". Whatever the provider sent.
    pub sp: String,
}

/// Top three finishers. Serialized as `{"1": .., "2": .., "3": ..}` with
/// `null` for an empty slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Podium {
    #[serde(rename = "1")]
    pub first: Option<Runner>,
    #[serde(rename = "2")]
    pub second: Option<Runner>,
    #[serde(rename = "3")]
    pub third: Option<Runner>,
}

impl Podium {
    /// The slot for a rank, or `None` for anything outside 1..=3.
    pub fn slot_mut(&mut self, rank: i64) -> Option<&mut Option<Runner>> {
        match rank {
            1 => Some(&mut self.first),
            2 => Some(&mut self.second),
            3 => Some(&mut self.third),
            _ => None,
        }
    }

    pub fn filled(&self) -> usize {
        [&self.first, &self.second, &self.third]
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

/// One race in the results snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RaceRecord {
    pub meeting_date: String,
    pub course: String,
    /// HH:MM or HHMM, as published.
    pub off_time: String,
    pub race_title: String,
    pub finishers: Podium,
}

impl fmt::Display for RaceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({} placed)",
            self.course,
            self.off_time,
            self.race_title,
            self.finishers.filled()
        )
    }
}

/// A declared runner on a racecard. No positions here; the race hasn't run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardRunner {
    /// Saddlecloth number.
    pub no: String,
    pub horse: String,
    pub jockey: String,
    pub trainer: String,
    pub age: String,
    pub weight: String,
    pub draw: String,
    pub odds: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardRace {
    pub off_time: String,
    pub race_title: String,
    pub runners: Vec<CardRunner>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardMeeting {
    pub meeting_date: String,
    pub course: String,
    pub races: Vec<CardRace>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplayLink {
    pub label: String,
    pub url: String,
}

/// One row of the CSV feed, after course aliasing and replay expansion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CsvRace {
    pub meeting_date: String,
    pub course: String,
    pub off_time: String,
    pub race_number: String,
    pub race_title: String,
    pub horse: String,
    pub position: String,
    pub sp: String,
    pub note: String,
    pub handicap: bool,
    pub replay_links: Vec<ReplayLink>,
}

/// Raw CSV row. Missing columns read as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvRow {
    pub meeting_date: String,
    pub course: String,
    pub off_time: String,
    pub race_number: String,
    pub race_title: String,
    pub horse: String,
    pub position: String,
    pub sp: String,
    pub note: String,
    pub handicap: String,
}

/// A replay provider from `providers.yaml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProviderTemplate {
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub replay_url_template: Option<String>,
}

impl ProviderTemplate {
    /// Display label, falling back to the key.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersFile {
    pub providers: Vec<ProviderTemplate>,
}

// =============================================================================
// SNAPSHOT ENVELOPES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultsBody {
    pub races: Vec<RaceRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardsBody {
    pub meetings: Vec<CardMeeting>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CsvBody {
    pub races: Vec<CsvRace>,
}

/// `{updated_at, ...body}`. `updated_at` means "last changed", not "last
/// checked": see `snapshot::carry_forward_timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot<T> {
    pub updated_at: String,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Snapshot<T> {
    /// Stamp a body with the current UTC time, to the second.
    pub fn new(body: T) -> Self {
        Self {
            updated_at: utc_stamp(),
            body,
        }
    }
}

/// ISO-8601 UTC, second precision, `Z` suffix: `2025-10-27T14:10:00Z`.
pub fn utc_stamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
