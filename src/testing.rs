// Test doubles shared by the unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::error::{EngineError, Result};
use crate::prober::{Params, ProbeAttempt, Transport};

pub fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    NotJson(String),
    Status(u16, String),
}

struct Route {
    path: String,
    /// `None` matches any query string.
    params: Option<Params>,
    reply: Reply,
}

/// In-memory `Transport`. Routes are matched in registration order;
/// anything unmatched is a 404. Every call is recorded.
pub struct ScriptedTransport {
    routes: Vec<Route>,
    calls: Mutex<Vec<ProbeAttempt>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, path: &str, params: Params, reply: Reply) -> Self {
        self.routes.push(Route {
            path: path.to_string(),
            params: Some(params),
            reply,
        });
        self
    }

    pub fn on_path(mut self, path: &str, reply: Reply) -> Self {
        self.routes.push(Route {
            path: path.to_string(),
            params: None,
            reply,
        });
        self
    }

    pub fn calls(&self) -> Vec<ProbeAttempt> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        self.calls
            .lock()
            .push(ProbeAttempt::new(path, params.to_vec()));

        let url = ProbeAttempt::new(path, params.to_vec()).to_string();
        let route = self.routes.iter().find(|r| {
            r.path == path && r.params.as_ref().map_or(true, |p| p.as_slice() == params)
        });

        match route.map(|r| r.reply.clone()) {
            Some(Reply::Json(value)) => Ok(value),
            Some(Reply::NotJson(body)) => Err(EngineError::NonJson { url, snippet: body }),
            Some(Reply::Status(status, body)) => Err(EngineError::HttpStatus {
                status,
                url,
                snippet: body,
            }),
            None => Err(EngineError::HttpStatus {
                status: 404,
                url,
                snippet: "not found".to_string(),
            }),
        }
    }
}

/// A one-route HTTP/1.1 server on 127.0.0.1 that answers every request with
/// the same status and body. Returns the base URL and the raw request heads
/// it has seen.
pub async fn canned_http(status: u16, content_type: &'static str, body: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            log.lock().push(String::from_utf8_lossy(&head).into_owned());

            let response = format!(
                "HTTP/1.1 {status} Canned\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (base, seen)
}
