//! Request routing.
//!
//! Runs on worker threads: maps a framed request to a response using the
//! JSON handler and the metrics registry.

use crate::handler::JsonHandler;
use crate::metrics::Metrics;
use crate::protocols::http::response::CONTENT_TYPE_METRICS;
use crate::protocols::http::{Request, Response, StatusCode};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

const SUM_PREFIX: &str = "/numbers/sum/";

pub struct Service {
    handler: JsonHandler,
    metrics: Arc<Metrics>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Service {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            handler: JsonHandler::new(),
            metrics,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Produce the response for one request.
    pub fn handle(&self, req: &Request) -> Response {
        trace!(method = %req.method, path = %req.path, "Routing request");

        // Ignore any query string when matching.
        let path = req.path.split('?').next().unwrap_or("");
        match (req.method.as_str(), path) {
            ("GET", "/") => Response::json(StatusCode::Ok, api_description().to_string()),
            ("GET", "/health") => self.health(),
            ("GET", "/metrics") => {
                Response::text(CONTENT_TYPE_METRICS, self.metrics.render_prometheus())
            }
            ("GET", "/numbers/sum") => Response::json(
                StatusCode::Ok,
                json!({
                    "total_numbers_sum": self.handler.total_numbers_sum(),
                    "success": true,
                })
                .to_string(),
            ),
            ("GET", "/numbers/sum-all") => self.sum_all(),
            ("GET", p) if p.starts_with(SUM_PREFIX) && p.len() > SUM_PREFIX.len() => {
                let client_id = &p[SUM_PREFIX.len()..];
                Response::json(
                    StatusCode::Ok,
                    json!({
                        "client_id": client_id,
                        "numbers_sum": self.handler.client_numbers_sum(client_id),
                        "success": true,
                    })
                    .to_string(),
                )
            }
            ("POST", "/process") => {
                let reply = self.handler.process(&req.body);
                let status = if reply.success {
                    StatusCode::Ok
                } else {
                    StatusCode::BadRequest
                };
                Response::json(status, reply.body)
            }
            (
                _,
                "/" | "/health" | "/metrics" | "/numbers/sum" | "/numbers/sum-all" | "/process",
            ) => Response::error(StatusCode::MethodNotAllowed, "Method not allowed"),
            _ => Response::error(StatusCode::NotFound, "Endpoint not found"),
        }
    }

    fn health(&self) -> Response {
        let stats = self.handler.stats();
        Response::json(
            StatusCode::Ok,
            json!({
                "status": "healthy",
                "started_at": self.started_at.to_rfc3339(),
                "uptime_secs": self.started.elapsed().as_secs(),
                "processed": {
                    "total": stats.processed,
                    "successful": stats.successful,
                    "failed": stats.failed,
                },
                "success": true,
            })
            .to_string(),
        )
    }

    fn sum_all(&self) -> Response {
        let clients: serde_json::Map<String, serde_json::Value> = self
            .handler
            .all_client_sums()
            .into_iter()
            .map(|(id, sum)| (id, json!(sum)))
            .collect();
        Response::json(
            StatusCode::Ok,
            json!({
                "success": true,
                "clients": clients,
                "total": self.handler.total_numbers_sum(),
            })
            .to_string(),
        )
    }
}

fn api_description() -> serde_json::Value {
    json!({
        "service": "muxd JSON processing service",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "GET /": "API documentation",
            "GET /health": "Service health check",
            "GET /metrics": "Prometheus metrics",
            "GET /numbers/sum": "Total sum of all processed numbers",
            "GET /numbers/sum/{client_id}": "Sum of numbers for one client",
            "GET /numbers/sum-all": "Sums for all clients",
            "POST /process": "Process a JSON request",
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, path: &str, body: &[u8]) -> Request {
        Request {
            method: method.to_string(),
            path: path.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: Vec::new(),
            body: body.to_vec(),
        }
    }

    fn body(resp: &Response) -> serde_json::Value {
        serde_json::from_slice(&resp.body).unwrap()
    }

    #[test]
    fn test_process_route() {
        let service = Service::new(Arc::new(Metrics::new()));
        let resp = service.handle(&request(
            "POST",
            "/process",
            br#"{"id":1,"name":"A","phone":"1","number":5}"#,
        ));
        assert_eq!(resp.status, StatusCode::Ok);
        assert_eq!(body(&resp)["number"], 6);

        let resp = service.handle(&request("POST", "/process", b""));
        assert_eq!(resp.status, StatusCode::BadRequest);
        assert_eq!(body(&resp)["success"], false);
    }

    #[test]
    fn test_sum_routes() {
        let service = Service::new(Arc::new(Metrics::new()));
        service.handle(&request(
            "POST",
            "/process",
            br#"{"id":3,"name":"C","phone":"3","number":10}"#,
        ));

        let resp = service.handle(&request("GET", "/numbers/sum", b""));
        assert_eq!(body(&resp)["total_numbers_sum"], 10);

        let resp = service.handle(&request("GET", "/numbers/sum/user_3", b""));
        assert_eq!(body(&resp)["numbers_sum"], 10);
        assert_eq!(body(&resp)["client_id"], "user_3");

        let resp = service.handle(&request("GET", "/numbers/sum-all", b""));
        assert_eq!(body(&resp)["clients"]["user_3"], 10);
        assert_eq!(body(&resp)["total"], 10);
    }

    #[test]
    fn test_health_and_metrics() {
        let metrics = Arc::new(Metrics::new());
        let service = Service::new(Arc::clone(&metrics));

        let resp = service.handle(&request("GET", "/health", b""));
        assert_eq!(body(&resp)["status"], "healthy");

        let resp = service.handle(&request("GET", "/metrics", b""));
        assert_eq!(resp.content_type, CONTENT_TYPE_METRICS);
        assert!(String::from_utf8(resp.body).unwrap().contains("muxd_requests_total"));
    }

    #[test]
    fn test_unknown_and_wrong_method() {
        let service = Service::new(Arc::new(Metrics::new()));
        let resp = service.handle(&request("GET", "/nope", b""));
        assert_eq!(resp.status, StatusCode::NotFound);
        assert_eq!(body(&resp)["error"], "Endpoint not found");

        let resp = service.handle(&request("GET", "/process", b""));
        assert_eq!(resp.status, StatusCode::MethodNotAllowed);
    }
}
