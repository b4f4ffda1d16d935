// =============================================================================
// replay.rs - THE REPLAY ROOM
// =============================================================================
//
// The CSV variant. No API, no probing: rows come from a remote CSV, a local
// fallback CSV, or (when neither is configured) one built-in sample row so the
// site always has something to render.
//
// Each row gets a canonical course name and one replay link per configured
// provider. Providers live in a YAML file:
//
//   providers:
//     - key: rtv
//       label: Racing TV
//       replay_url_template: "https://example.com/{meeting_date}/{course_slug}/{off_time_hhmm}"
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::{Config, CSV_FETCH_TIMEOUT};
use crate::error::{snippet, EngineError, Result};
use crate::models::{CsvRace, CsvRow, ProviderTemplate, ProvidersFile, ReplayLink};
use crate::normalize::normalize_boolean;

static SLUG_STRIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\s-]").expect("slug strip pattern"));
static SLUG_JOIN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s_]+").expect("slug join pattern"));
static CLOCK_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{1,2}):([0-9]{2})$").expect("clock time pattern"));
static BARE_TIME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([0-9]{3,4})$").expect("bare time pattern"));

/// `"Newbury (Class 3)!"` -> `"newbury-class-3"`.
pub fn slugify(text: &str) -> String {
    let stripped = SLUG_STRIP.replace_all(text, "");
    let lowered = stripped.trim().to_lowercase();
    SLUG_JOIN.replace_all(&lowered, "-").into_owned()
}

/// `"14:10"` -> `"1410"`, `"9:05"` -> `"0905"`, `"905"` -> `"0905"`.
/// Anything else is `""`.
pub fn normalize_hhmm(off_time: &str) -> String {
    if let Some(caps) = CLOCK_TIME.captures(off_time) {
        let hour: u32 = caps[1].parse().unwrap_or(0);
        return format!("{hour:02}{}", &caps[2]);
    }
    if let Some(caps) = BARE_TIME.captures(off_time) {
        return format!("{:0>4}", &caps[1]);
    }
    String::new()
}

/// Fill `{name}` placeholders from `fields`. `{{` and `}}` are literal braces.
///
/// A placeholder with no matching field, an unclosed `{` or a stray `}` is
/// an error: a half-built URL is worse than no URL.
pub fn format_template(template: &str, fields: &[(&str, &str)]) -> Result<String> {
    let fail = |reason: String| EngineError::Template {
        template: template.to_string(),
        reason,
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => return Err(fail("unclosed '{'".to_string())),
                    }
                }
                let value = fields
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, v)| *v)
                    .ok_or_else(|| fail(format!("unknown placeholder {{{name}}}")))?;
                out.push_str(value);
            }
            '}' => return Err(fail("single '}' outside a placeholder".to_string())),
            other => out.push(other),
        }
    }

    Ok(out)
}

/// One link per provider that has a template, in provider order.
pub fn build_replay_links(race: &CsvRace, providers: &[ProviderTemplate]) -> Result<Vec<ReplayLink>> {
    let course_slug = slugify(&race.course);
    let off_time_hhmm = normalize_hhmm(&race.off_time);
    let fields = [
        ("meeting_date", race.meeting_date.as_str()),
        ("course_slug", course_slug.as_str()),
        ("off_time_hhmm", off_time_hhmm.as_str()),
        ("race_number", race.race_number.as_str()),
    ];

    let mut links = Vec::new();
    for provider in providers {
        let Some(template) = provider.replay_url_template.as_deref().filter(|t| !t.is_empty()) else {
            continue;
        };
        links.push(ReplayLink {
            label: provider.display_label().to_string(),
            url: format_template(template, &fields)?,
        });
    }
    Ok(links)
}

/// Exact lookup through the alias table. Unknown names pass through.
pub fn normalize_course(name: &str, aliases: &BTreeMap<String, String>) -> String {
    aliases.get(name).cloned().unwrap_or_else(|| name.to_string())
}

pub fn load_providers(path: &Path) -> Result<Vec<ProviderTemplate>> {
    let fail = |message: String| EngineError::Providers {
        path: path.display().to_string(),
        message,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let file: ProvidersFile = serde_yaml::from_str(&raw).map_err(|e| fail(e.to_string()))?;
    debug!(path = %path.display(), providers = file.providers.len(), "Providers loaded");
    Ok(file.providers)
}

/// Rows from SOURCE_CSV_URL, else FALLBACK_FILE (if it exists), else the
/// built-in sample.
pub async fn fetch_source_rows(config: &Config) -> Result<Vec<CsvRow>> {
    if let Some(url) = config.source_csv_url.as_deref() {
        info!(url = url, "Fetching source CSV");
        let body = fetch_remote_csv(url).await?;
        return parse_rows(csv_reader().from_reader(body.as_bytes()));
    }

    if let Some(local) = config.fallback_file.as_deref() {
        if local.exists() {
            info!(path = %local.display(), "Reading fallback CSV");
            return parse_rows(csv_reader().from_path(local)?);
        }
        warn!(path = %local.display(), "FALLBACK_FILE does not exist, using sample row");
    }

    info!("No CSV source configured, using sample row");
    Ok(vec![sample_row()])
}

async fn fetch_remote_csv(url: &str) -> Result<String> {
    let network = |message: String| EngineError::Network {
        url: url.to_string(),
        message,
    };
    let client = reqwest::Client::builder()
        .timeout(CSV_FETCH_TIMEOUT)
        .user_agent(concat!("DcrHubEngine/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| network(format!("failed to build HTTP client: {e}")))?;

    let response = client.get(url).send().await.map_err(|e| network(e.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| network(format!("failed to read body: {e}")))?;

    if !status.is_success() {
        return Err(EngineError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
            snippet: snippet(&body),
        });
    }
    Ok(body)
}

fn csv_reader() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.flexible(true);
    builder
}

/// Rows are matched to the header by name. A row that ends early reads its
/// missing trailing columns as empty, and unknown columns are ignored.
fn parse_rows<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Vec<CsvRow>> {
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let columns = [
        column("meeting_date"),
        column("course"),
        column("off_time"),
        column("race_number"),
        column("race_title"),
        column("horse"),
        column("position"),
        column("sp"),
        column("note"),
        column("handicap"),
    ];

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let [meeting_date, course, off_time, race_number, race_title, horse, position, sp, note, handicap] =
            columns.map(|idx| idx.and_then(|i| record.get(i)).unwrap_or_default().to_string());
        rows.push(CsvRow {
            meeting_date,
            course,
            off_time,
            race_number,
            race_title,
            horse,
            position,
            sp,
            note,
            handicap,
        });
    }
    debug!(rows = rows.len(), "CSV parsed");
    Ok(rows)
}

fn sample_row() -> CsvRow {
    CsvRow {
        meeting_date: "2025-10-27".into(),
        course: "Newbury".into(),
        off_time: "14:10".into(),
        race_number: "3".into(),
        race_title: "Handicap (Class 3)".into(),
        horse: "Sample Runner".into(),
        position: "1st".into(),
        sp: "4/1".into(),
        note: "Sectional upgrade; found plenty.".into(),
        handicap: "true".into(),
    }
}

/// Rows -> published races. Replay links are built from the aliased course.
pub fn build_csv_races(
    rows: &[CsvRow],
    providers: &[ProviderTemplate],
    aliases: &BTreeMap<String, String>,
) -> Result<Vec<CsvRace>> {
    rows.iter()
        .map(|row| {
            let mut race = CsvRace {
                meeting_date: row.meeting_date.clone(),
                course: normalize_course(&row.course, aliases),
                off_time: row.off_time.clone(),
                race_number: row.race_number.clone(),
                race_title: row.race_title.clone(),
                horse: row.horse.clone(),
                position: row.position.clone(),
                sp: row.sp.clone(),
                note: row.note.clone(),
                handicap: normalize_boolean(&row.handicap),
                replay_links: Vec::new(),
            };
            race.replay_links = build_replay_links(&race, providers)?;
            Ok(race)
        })
        .collect()
}
