//! Scrape endpoint: `/metrics` and `/health` on a blocking `tiny_http` listener.

use crate::exporter::DaikinExporter;
use chrono::{SecondsFormat, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tiny_http::{Header, Method, Request, Response, Server};

const JSON: &str = "application/json";
const PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    timestamp: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl Reply {
    fn new(status: u16, content_type: &str, body: impl Into<String>) -> Self {
        Reply {
            status,
            content_type: content_type.to_string(),
            body: body.into(),
        }
    }
}

pub struct MetricsServer {
    server: Arc<Server>,
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl MetricsServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting requests and wait for the listener thread.
    pub fn stop(self) {
        self.server.unblock();
        if self.handle.join().is_err() {
            error!("Metrics listener thread panicked");
        }
        info!("Prometheus exporter server stopped");
    }
}

pub fn start(addr: &str, exporter: Arc<DaikinExporter>) -> Result<MetricsServer, String> {
    let server = Server::http(addr).map_err(|e| format!("failed to bind {}: {}", addr, e))?;
    let local = server
        .server_addr()
        .to_ip()
        .ok_or_else(|| format!("listener on {} is not an IP socket", addr))?;
    let server = Arc::new(server);

    let listener = Arc::clone(&server);
    let handle = thread::Builder::new()
        .name("metrics-http".into())
        .spawn(move || {
            for request in listener.incoming_requests() {
                respond(&exporter, request);
            }
        })
        .map_err(|e| format!("failed to spawn listener thread: {}", e))?;

    info!("Prometheus exporter listening on http://{}", local);
    info!("Metrics available at http://{}/metrics", local);
    info!("Health check at http://{}/health", local);
    Ok(MetricsServer {
        server,
        addr: local,
        handle,
    })
}

fn respond(exporter: &DaikinExporter, request: Request) {
    let is_get = matches!(request.method(), Method::Get);
    let reply = route(exporter, is_get, request.url());
    debug!("{} {} -> {}", request.method(), request.url(), reply.status);

    let mut response = Response::from_string(reply.body).with_status_code(reply.status);
    match Header::from_bytes("Content-Type", reply.content_type.as_bytes()) {
        Ok(header) => response.add_header(header),
        Err(()) => warn!("invalid content type header: {}", reply.content_type),
    }
    if let Err(e) = request.respond(response) {
        debug!("failed to write response: {}", e);
    }
}

/// Maps a request onto its reply; reads only.
pub fn route(exporter: &DaikinExporter, is_get: bool, url: &str) -> Reply {
    let path = url.split('?').next().unwrap_or(url);
    match (path, is_get) {
        ("/metrics", true) => match exporter.render() {
            Ok(body) => Reply::new(200, &exporter.content_type(), body),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                Reply::new(500, PLAIN, format!("failed to encode metrics: {}", e))
            }
        },
        ("/health", true) => health(),
        ("/metrics" | "/health", false) => Reply::new(405, PLAIN, "method not allowed"),
        _ => Reply::new(404, PLAIN, "not found"),
    }
}

fn health() -> Reply {
    let body = Health {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    match serde_json::to_string(&body) {
        Ok(json) => Reply::new(200, JSON, json),
        Err(e) => Reply::new(500, PLAIN, format!("failed to encode health: {}", e)),
    }
}
