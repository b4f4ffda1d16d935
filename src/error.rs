// =============================================================================
// error.rs - THE STEWARDS' ENQUIRY
// =============================================================================
//
// Every way a run can go wrong, in one enum. There are two families:
//
// 1. Attempt failures (Network, HttpStatus, NonJson, UnexpectedShape).
//    One probe combination didn't work. The prober logs it, shrugs, and
//    moves on to the next shape in the menu.
//
// 2. Fatal failures (everything else). The run is over, the process exits
//    non-zero, and the diagnostic goes to stderr.
// =============================================================================

use thiserror::Error;

/// How many characters of an upstream body we keep in error messages.
pub const BODY_SNIPPET_CHARS: usize = 250;

#[derive(Error, Debug)]
pub enum EngineError {
    /// RACING_API_USER / RACING_API_PASS not set. Raised before any network I/O.
    #[error("Missing credentials: set RACING_API_USER and RACING_API_PASS")]
    MissingCredentials,

    /// The request never produced a response (DNS, TLS, timeout, reset).
    #[error("Network error calling {url}: {message}")]
    Network { url: String, message: String },

    /// Upstream answered, but not with a 2xx.
    #[error("HTTP {status} for {url} -> {snippet}")]
    HttpStatus {
        status: u16,
        url: String,
        snippet: String,
    },

    /// Upstream answered 2xx with something that isn't JSON.
    #[error("Non-JSON response from {url}: {snippet}")]
    NonJson { url: String, snippet: String },

    /// Valid JSON, wrong shape for what this probe is looking for.
    #[error("Unexpected schema from {url}: {found}")]
    UnexpectedShape { url: String, found: String },

    /// Every entry in a probe menu failed.
    #[error("No usable {menu} endpoint after {attempts} attempts. Last error: {last_error}")]
    ProbeExhausted {
        menu: String,
        attempts: usize,
        last_error: String,
    },

    /// An accepted payload the extractor can't walk.
    #[error("Unexpected response shape: {found}")]
    UnrecognizedSchema { found: String },

    /// A replay URL template references a placeholder we don't fill.
    #[error("Bad replay template {template:?}: {reason}")]
    Template { template: String, reason: String },

    #[error("Failed to load providers from {path}: {message}")]
    Providers { path: String, message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True for the per-attempt failures the prober recovers from.
    pub fn is_attempt_failure(&self) -> bool {
        matches!(
            self,
            EngineError::Network { .. }
                | EngineError::HttpStatus { .. }
                | EngineError::NonJson { .. }
                | EngineError::UnexpectedShape { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Truncate an upstream body for diagnostics without splitting a UTF-8 char.
pub fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_CHARS).collect()
}
