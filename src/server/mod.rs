//! HTTP surface of the prediction service
//!
//! Thin I/O wrapper over the core: a predict route, process liveness,
//! store readiness, and a metrics read-back. Store failures never shape
//! a predict response; they only show up in logs and on the readiness
//! route.

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::core::Core;
use crate::store::PredictionRecord;

/// HTTP body type for responses
type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

#[derive(Debug, Deserialize)]
struct PredictRequest {
    text: String,
}

/// Prediction API server state
pub struct ApiServer {
    core: Core,
    listen: String,
}

impl ApiServer {
    /// Create a new server over the given core and listen address
    pub fn new(core: Core, listen: String) -> Self {
        Self { core, listen }
    }

    /// Bind and serve until the task is dropped
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = self
            .listen
            .parse()
            .context(format!("Invalid listen address: {}", self.listen))?;

        let listener = TcpListener::bind(addr)
            .await
            .context(format!("Failed to bind to {}", addr))?;

        info!("prediction service listening on {}", addr);

        let server = Arc::new(self);

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let server = Arc::clone(&server);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { server.handle_request(req).await }
                });

                if let Err(e) = http1::Builder::new()
                    .keep_alive(true)
                    .serve_connection(io, service)
                    .await
                {
                    // Filter out benign connection reset errors
                    let err_str = format!("{}", e);
                    if !err_str.contains("connection reset") && !err_str.contains("broken pipe") {
                        error!("Error serving connection from {}: {}", remote_addr, e);
                    }
                }
            });
        }
    }

    /// Route an incoming request
    async fn handle_request(&self, req: Request<Incoming>) -> Result<Response<BoxBody>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        debug!("{} {}", method, path);

        match (&method, path.as_str()) {
            (&Method::POST, "/predict") => self.handle_predict(req).await,
            (&Method::GET, "/health") => {
                self.json_response(StatusCode::OK, json!({"status": "healthy"}))
            }
            (&Method::GET, "/ready") => self.handle_ready().await,
            (&Method::GET, "/metrics") => self.handle_metrics().await,
            _ => self.json_response(StatusCode::NOT_FOUND, json!({"error": "not found"})),
        }
    }

    /// Classify the posted text and audit the outcome best-effort
    async fn handle_predict(&self, req: Request<Incoming>) -> Result<Response<BoxBody>> {
        let body = match req.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                return self.json_response(
                    StatusCode::BAD_REQUEST,
                    json!({"error": format!("Failed to read request body: {}", e)}),
                );
            }
        };

        let input: PredictRequest = match serde_json::from_slice(&body) {
            Ok(input) => input,
            Err(e) => {
                return self.json_response(
                    StatusCode::BAD_REQUEST,
                    json!({"error": format!("Invalid request body: {}", e)}),
                );
            }
        };

        let prediction = self.core.classifier.predict(&input.text);

        // Best-effort: a store outage must not shape the response.
        let record =
            PredictionRecord::new(input.text, prediction.label.clone(), prediction.confidence);
        self.core.recorder.record(&record).await;

        self.json_response(
            StatusCode::OK,
            json!({
                "sentiment": prediction.label,
                "confidence": prediction.confidence,
            }),
        )
    }

    /// Store readiness, for the readiness probe only
    async fn handle_ready(&self) -> Result<Response<BoxBody>> {
        let ready = self.core.store.is_ready().await;
        let status = if ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        self.json_response(status, json!({"ready": ready}))
    }

    /// Aggregate per-label counts read back from the audit store
    async fn handle_metrics(&self) -> Result<Response<BoxBody>> {
        let Some(lease) = self.core.store.acquire().await else {
            return self.json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"error": "audit store unavailable"}),
            );
        };

        match lease.label_counts().await {
            Ok(counts) => {
                let total: i64 = counts.iter().map(|(_, n)| n).sum();
                let labels: serde_json::Map<String, serde_json::Value> = counts
                    .into_iter()
                    .map(|(label, n)| (label, json!(n)))
                    .collect();

                self.json_response(StatusCode::OK, json!({"total": total, "labels": labels}))
            }
            Err(e) => {
                warn!(error = %e, "metrics read-back failed");
                self.json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({"error": "audit store unavailable"}),
                )
            }
        }
    }

    /// Build a JSON response with the given status
    fn json_response(
        &self,
        status: StatusCode,
        value: serde_json::Value,
    ) -> Result<Response<BoxBody>> {
        Ok(Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(self.string_body(value.to_string()))
            .unwrap())
    }

    /// Convert a string into a BoxBody
    fn string_body(&self, s: String) -> BoxBody {
        use http_body_util::Full;
        Full::new(Bytes::from(s))
            .map_err(|never| match never {})
            .boxed()
    }
}

/// Run the API server on the configured listen address
pub async fn run_server(core: Core, listen: &str) -> Result<()> {
    ApiServer::new(core, listen.to_string()).run().await
}
