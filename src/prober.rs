// =============================================================================
// prober.rs - THE STARTING STALLS
// =============================================================================
//
// The upstream racing API has a contract the way a maiden hurdle has a form
// line: technically present, practically unknowable. Paths move between
// plans. The date parameter might be `on`, `date`, `day`, or a from/to pair.
// Countries might be `countries`, `countrycodes`, `countryCodes` or
// `country`. Nobody will say which.
//
// So we don't guess. A `ProbeMenu` is an explicit, ordered list of
// candidate shapes. `ProbeMenu::attempts` flattens it into a sequence of
// (path, params) tuples. `Prober` walks that sequence one request at a time
// and accepts the first response that is JSON in a shape we recognize.
//
// Order, per path:
//   1. every day-shaped param set x every country-key spelling
//   2. every range-shaped param set x every country-key spelling
// and only then the next path.
//
// A failed attempt (network, non-2xx, non-JSON, wrong shape) is logged and
// skipped. Running out of menu is fatal and carries the last error.
// =============================================================================

use std::fmt;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Config, Credentials};
use crate::error::{snippet, EngineError, Result};
use crate::metrics::{AttemptOutcome, AttemptRecord, RunMetrics};
use crate::normalize::first_truthy;

/// Query parameters, in the order they are sent.
pub type Params = Vec<(String, String)>;

// =============================================================================
// THE MENU
// =============================================================================

/// How the meeting date goes on the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamShape {
    /// `?on=2025-10-27`
    Day(String),
    /// `?from=2025-10-27&to=2025-10-27`
    Range { from: String, to: String },
}

impl ParamShape {
    pub fn day(key: &str) -> Self {
        ParamShape::Day(key.to_string())
    }

    pub fn range(from: &str, to: &str) -> Self {
        ParamShape::Range {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    fn params(&self, date: &str) -> Params {
        match self {
            ParamShape::Day(key) => vec![(key.clone(), date.to_string())],
            ParamShape::Range { from, to } => vec![
                (from.clone(), date.to_string()),
                (to.clone(), date.to_string()),
            ],
        }
    }
}

/// One concrete request the prober may issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub path: String,
    pub params: Params,
}

impl ProbeAttempt {
    pub fn new(path: impl Into<String>, params: Params) -> Self {
        Self {
            path: path.into(),
            params,
        }
    }
}

impl fmt::Display for ProbeAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            write!(f, "{}{}={}", if i == 0 { '?' } else { '&' }, k, v)?;
        }
        Ok(())
    }
}

/// An ordered, enumerable strategy list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeMenu {
    /// Shows up in logs and in the exhaustion error.
    pub name: String,
    pub base_paths: Vec<String>,
    pub day_shapes: Vec<ParamShape>,
    pub range_shapes: Vec<ParamShape>,
    pub country_keys: Vec<String>,
}

impl ProbeMenu {
    /// Results endpoints for the basic plan.
    pub fn results() -> Self {
        Self {
            name: "results".to_string(),
            base_paths: strings(&["/results", "/v1/results", "/races/results"]),
            day_shapes: vec![ParamShape::day("date")],
            range_shapes: vec![],
            country_keys: strings(&["countries"]),
        }
    }

    /// Meeting listings for the racecard variant. This is the one where the
    /// API really can't make up its mind.
    pub fn meetings() -> Self {
        Self {
            name: "meetings".to_string(),
            base_paths: strings(&["/v1/meetings", "/meetings", "/v1/stages", "/stages"]),
            day_shapes: vec![
                ParamShape::day("on"),
                ParamShape::day("date"),
                ParamShape::day("meeting_date"),
                ParamShape::day("day"),
            ],
            range_shapes: vec![
                ParamShape::range("from", "to"),
                ParamShape::range("dateFrom", "dateTo"),
                ParamShape::range("start_date", "end_date"),
                ParamShape::range("startDate", "endDate"),
            ],
            country_keys: strings(&["countries", "countrycodes", "countryCodes", "country"]),
        }
    }

    /// Flatten the menu into the exact request sequence `Prober` will walk.
    pub fn attempts(&self, date: &str, countries: &str) -> Vec<ProbeAttempt> {
        let mut out = Vec::new();
        for path in &self.base_paths {
            for shape in self.day_shapes.iter().chain(self.range_shapes.iter()) {
                for params in self.with_country(shape.params(date), countries) {
                    out.push(ProbeAttempt::new(path.clone(), params));
                }
            }
        }
        out
    }

    /// One variant per country-key spelling. A menu with no country keys
    /// sends the date params alone.
    fn with_country(&self, base: Params, countries: &str) -> Vec<Params> {
        if self.country_keys.is_empty() {
            return vec![base];
        }
        self.country_keys
            .iter()
            .map(|key| {
                let mut params = base.clone();
                params.push((key.clone(), countries.to_string()));
                params
            })
            .collect()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// THE WIRE
// =============================================================================

/// Anything that can turn (path, params) into parsed JSON. The real one is
/// `HttpTransport`; tests script one.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `Ok` only for a 2xx response whose body parses as JSON.
    async fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value>;
}

/// Basic-Auth GETs against `api_base + path`, one fixed timeout per request.
pub struct HttpTransport {
    client: reqwest::Client,
    base: String,
    credentials: Credentials,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let credentials = config.require_credentials()?.clone();
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("DcrHubEngine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Network {
                url: config.api_base.clone(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base: config.api_base.clone(),
            credentials,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        let raw = format!("{}{}", self.base, path);
        let url = Url::parse(&raw).map_err(|e| EngineError::Network {
            url: raw.clone(),
            message: e.to_string(),
        })?;

        let response = self
            .client
            .get(url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.pass))
            .header(ACCEPT, "application/json")
            .query(params)
            .send()
            .await
            .map_err(|e| EngineError::Network {
                url: raw.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| EngineError::Network {
            url: final_url.clone(),
            message: format!("failed to read body: {e}"),
        })?;

        if !status.is_success() {
            return Err(EngineError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
                snippet: snippet(&body),
            });
        }

        serde_json::from_str(&body).map_err(|_| EngineError::NonJson {
            url: final_url,
            snippet: snippet(&body),
        })
    }
}

// =============================================================================
// THE PROBE
// =============================================================================

/// The winning attempt and whatever the acceptor pulled out of it.
#[derive(Debug, Clone)]
pub struct Accepted<A> {
    pub value: A,
    pub attempt: ProbeAttempt,
}

pub struct Prober<'a> {
    transport: &'a dyn Transport,
    metrics: &'a RunMetrics,
}

impl<'a> Prober<'a> {
    pub fn new(transport: &'a dyn Transport, metrics: &'a RunMetrics) -> Self {
        Self { transport, metrics }
    }

    /// Walk `menu` for `date`/`countries` until `accept` says yes.
    pub async fn probe<A, F>(
        &self,
        menu: &ProbeMenu,
        date: &str,
        countries: &str,
        accept: F,
    ) -> Result<Accepted<A>>
    where
        F: Fn(&Value) -> Option<A>,
    {
        let attempts = menu.attempts(date, countries);
        info!(
            menu = menu.name.as_str(),
            paths = menu.base_paths.len(),
            attempts = attempts.len(),
            "Probing upstream"
        );
        self.run_attempts(&menu.name, &attempts, accept).await
    }

    /// Issue `attempts` in order and return the first accepted response.
    pub async fn run_attempts<A, F>(
        &self,
        menu: &str,
        attempts: &[ProbeAttempt],
        accept: F,
    ) -> Result<Accepted<A>>
    where
        F: Fn(&Value) -> Option<A>,
    {
        let mut last_error: Option<EngineError> = None;

        for attempt in attempts {
            info!(menu = menu, attempt = %attempt, "Trying");

            let outcome = match self.transport.get_json(&attempt.path, &attempt.params).await {
                Ok(payload) => match accept(&payload) {
                    Some(value) => Ok(value),
                    None => Err(EngineError::UnexpectedShape {
                        url: attempt.to_string(),
                        found: describe_shape(&payload),
                    }),
                },
                Err(e) => Err(e),
            };

            match outcome {
                Ok(value) => {
                    self.record(menu, attempt, AttemptOutcome::Accepted);
                    info!(menu = menu, attempt = %attempt, "Accepted");
                    return Ok(Accepted {
                        value,
                        attempt: attempt.clone(),
                    });
                }
                Err(e) if e.is_attempt_failure() => {
                    warn!(menu = menu, attempt = %attempt, error = %e, "Attempt failed");
                    self.record(menu, attempt, AttemptOutcome::Failed(e.to_string()));
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no candidates in menu".to_string());
        debug!(menu = menu, last_error = last_error.as_str(), "Menu exhausted");
        Err(EngineError::ProbeExhausted {
            menu: menu.to_string(),
            attempts: attempts.len(),
            last_error,
        })
    }

    fn record(&self, menu: &str, attempt: &ProbeAttempt, outcome: AttemptOutcome) {
        self.metrics.record_attempt(AttemptRecord {
            menu: menu.to_string(),
            path: attempt.path.clone(),
            params: attempt.params.clone(),
            outcome,
        });
    }
}

// =============================================================================
// ACCEPTORS
// =============================================================================

/// Results: an object with `meetings` or `races`, or a non-empty list.
pub fn accept_results_payload(payload: &Value) -> Option<Value> {
    let recognised = match payload {
        Value::Object(obj) => obj.contains_key("meetings") || obj.contains_key("races"),
        Value::Array(items) => !items.is_empty(),
        _ => false,
    };
    recognised.then(|| payload.clone())
}

/// Meetings: the first truthy of `meetings`/`stages` when it's a list, or a
/// non-empty bare list.
pub fn accept_meeting_list(payload: &Value) -> Option<Vec<Value>> {
    match payload {
        Value::Object(obj) => match first_truthy([obj.get("meetings"), obj.get("stages")]) {
            Some(Value::Array(items)) => Some(items.clone()),
            _ => None,
        },
        Value::Array(items) if !items.is_empty() => Some(items.clone()),
        _ => None,
    }
}

/// A short description of a payload's top level, for diagnostics.
pub fn describe_shape(payload: &Value) -> String {
    match payload {
        Value::Object(obj) => {
            let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
            format!("object keys=[{}]", keys.join(", "))
        }
        Value::Array(items) => format!("array len={}", items.len()),
        Value::String(_) => "string".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Null => "null".to_string(),
    }
}
