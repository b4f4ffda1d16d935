// =============================================================================
// config.rs - THE WEIGHING ROOM
// =============================================================================
//
// Everything a run needs to know, read from the environment exactly once and
// frozen into a `Config`. Components get a `&Config` and never touch
// `std::env` themselves.
//
// Every value has a default except the API credentials. The API variants
// refuse to start without those; the CSV variant doesn't need them.
// =============================================================================

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tracing::warn;

use crate::error::{EngineError, Result};

pub const DEFAULT_API_BASE: &str = "https://api.theracingapi.com";
pub const DEFAULT_COUNTRIES: &str = "GB,IE";
pub const DEFAULT_TIMEOUT_SECS: u64 = 25;
pub const CSV_FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Static Basic-Auth pair. Passed through untouched.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub pass: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("pass", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // UPSTREAM API
    // =========================================================================
    /// Base URL with any trailing slash removed. Probe paths start with `/`.
    pub api_base: String,

    /// `None` when either half is unset or blank.
    pub credentials: Option<Credentials>,

    /// Country filter sent under whichever key spelling the API accepts.
    pub countries: String,

    /// Fixed per-request timeout. No retries on top of it.
    pub request_timeout: Duration,

    /// The racing day we fetch. Defaults to today in UTC.
    pub meeting_date: NaiveDate,

    // =========================================================================
    // OUTPUT ARTIFACTS
    // =========================================================================
    pub results_path: PathBuf,
    pub cards_path: PathBuf,

    /// OUTPUT_PATH override for the CSV variant.
    pub csv_output_path: PathBuf,

    // =========================================================================
    // CSV / TEMPLATE PATH
    // =========================================================================
    /// Raw course name -> canonical course name.
    pub course_aliases: BTreeMap<String, String>,
    pub source_csv_url: Option<String>,
    pub fallback_file: Option<PathBuf>,
    pub providers_file: PathBuf,
}

impl Config {
    /// Load configuration from the process environment (and `.env`, if present).
    pub fn from_env() -> Self {
        // Not everyone has a .env file. That's fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key -> value lookup. `from_env` is this with
    /// `std::env::var`; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let get_opt = |key: &str| -> Option<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_base = get("RACING_API_BASE", DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();

        let credentials = match (get_opt("RACING_API_USER"), get_opt("RACING_API_PASS")) {
            (Some(user), Some(pass)) => Some(Credentials { user, pass }),
            _ => None,
        };

        let request_timeout = match get_opt("RACING_API_TIMEOUT_SECS").map(|raw| (raw.parse::<u64>(), raw)) {
            Some((Ok(secs), _)) if secs > 0 => Duration::from_secs(secs),
            Some((_, raw)) => {
                warn!(
                    value = raw.as_str(),
                    default = DEFAULT_TIMEOUT_SECS,
                    "RACING_API_TIMEOUT_SECS is not a positive number of seconds, using default"
                );
                Duration::from_secs(DEFAULT_TIMEOUT_SECS)
            }
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let meeting_date = match get_opt("DCR_MEETING_DATE") {
            Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d").unwrap_or_else(|e| {
                warn!(value = raw.as_str(), error = %e, "DCR_MEETING_DATE is not YYYY-MM-DD, using today");
                Utc::now().date_naive()
            }),
            None => Utc::now().date_naive(),
        };

        let course_aliases = parse_course_aliases(get_opt("COURSE_ALIASES").as_deref());

        Config {
            api_base,
            credentials,
            countries: get("RACING_API_COUNTRIES", DEFAULT_COUNTRIES),
            request_timeout,
            meeting_date,
            results_path: PathBuf::from(get("DCR_RESULTS_PATH", "results.json")),
            cards_path: PathBuf::from(get("DCR_CARDS_PATH", "cards.json")),
            csv_output_path: PathBuf::from(get("OUTPUT_PATH", "data/results.json")),
            course_aliases,
            source_csv_url: get_opt("SOURCE_CSV_URL"),
            fallback_file: get_opt("FALLBACK_FILE").map(PathBuf::from),
            providers_file: PathBuf::from(get("PROVIDERS_FILE", "providers.yaml")),
        }
    }

    /// The credential pair, or the configuration failure that ends the run
    /// before a single request goes out.
    pub fn require_credentials(&self) -> Result<&Credentials> {
        self.credentials.as_ref().ok_or(EngineError::MissingCredentials)
    }

    /// Meeting date as the API wants it: YYYY-MM-DD.
    pub fn meeting_date_str(&self) -> String {
        self.meeting_date.format("%Y-%m-%d").to_string()
    }
}

/// COURSE_ALIASES is a JSON object. Anything else is ignored (with a warning)
/// and course names pass through unchanged.
fn parse_course_aliases(raw: Option<&str>) -> BTreeMap<String, String> {
    let Some(raw) = raw else {
        return BTreeMap::new();
    };
    match serde_json::from_str::<BTreeMap<String, String>>(raw) {
        Ok(map) => map,
        Err(e) => {
            warn!(error = %e, "COURSE_ALIASES is not a JSON object of strings, ignoring");
            BTreeMap::new()
        }
    }
}
