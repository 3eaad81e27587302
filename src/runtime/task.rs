//! Units of work exchanged between the reactor and the worker pool.
//!
//! The reactor turns a framed request into a [`Task`]; a worker executes it
//! and sends the encoded [`Completion`] back over a channel, waking the
//! reactor so it can write the bytes. Workers never touch sockets.

use crate::metrics::Metrics;
use crate::protocols::http::{Request, Response, StatusCode};
use crate::runtime::token::ConnId;
use crate::service::Service;
use mio::Waker;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// One request bound to the connection lifecycle that produced it.
#[derive(Debug)]
pub struct Task {
    pub conn: ConnId,
    pub request: Request,
    pub enqueued_at: Instant,
}

/// Encoded response ready for the connection's write buffer.
#[derive(Debug)]
pub struct Completion {
    pub conn: ConnId,
    pub bytes: Vec<u8>,
    /// The client asked for the connection to be closed after this response.
    pub close: bool,
    pub status: StatusCode,
}

impl Task {
    pub fn new(conn: ConnId, request: Request) -> Self {
        Self {
            conn,
            request,
            enqueued_at: Instant::now(),
        }
    }

    /// Run the request through the service and record it in `metrics`.
    ///
    /// A panicking handler yields a 500 response for this request only.
    pub fn execute(self, service: &Service, metrics: &Metrics) -> Completion {
        let close = self.request.wants_close();
        let response = match panic::catch_unwind(AssertUnwindSafe(|| service.handle(&self.request)))
        {
            Ok(response) => response,
            Err(_) => {
                error!(
                    conn_id = self.conn.slot,
                    method = %self.request.method,
                    path = %self.request.path,
                    "Handler panicked"
                );
                Response::error(StatusCode::InternalServerError, "Internal server error")
            }
        }
        .with_close(close);

        metrics.request_completed(self.enqueued_at.elapsed(), response.status.is_success());

        Completion {
            conn: self.conn,
            bytes: response.encode(),
            close,
            status: response.status,
        }
    }
}

/// Worker-side handle for returning completions to the reactor.
#[derive(Clone)]
pub struct CompletionSender {
    tx: Sender<Completion>,
    waker: Arc<Waker>,
}

impl CompletionSender {
    pub fn new(tx: Sender<Completion>, waker: Arc<Waker>) -> Self {
        Self { tx, waker }
    }

    /// Queue the completion and interrupt the reactor's poll.
    pub fn send(&self, completion: Completion) {
        let conn_id = completion.conn.slot;
        if self.tx.send(completion).is_err() {
            // Reactor already gone; nothing left to deliver to.
            debug!(conn_id, "Dropping completion after reactor exit");
            return;
        }
        if let Err(e) = self.waker.wake() {
            error!(error = %e, "Failed to wake reactor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll, Token};
    use std::sync::mpsc;
    use std::time::Duration;

    fn request(body: &[u8], close: bool) -> Request {
        let mut headers = vec![("Content-Length".to_string(), body.len().to_string())];
        if close {
            headers.push(("Connection".to_string(), "close".to_string()));
        }
        Request {
            method: "POST".to_string(),
            path: "/process".to_string(),
            version: "HTTP/1.1".to_string(),
            headers,
            body: body.to_vec(),
        }
    }

    fn conn() -> ConnId {
        ConnId {
            slot: 4,
            generation: 11,
        }
    }

    #[test]
    fn test_execute_encodes_response() {
        let metrics = Arc::new(Metrics::new());
        let service = Service::new(Arc::clone(&metrics));

        let body = br#"{"id":1,"name":"A","phone":"1","number":5}"#;
        let task = Task::new(conn(), request(body, false));
        let completion = task.execute(&service, &metrics);

        assert_eq!(completion.conn, conn());
        assert_eq!(completion.status, StatusCode::Ok);
        assert!(!completion.close);
        let text = String::from_utf8(completion.bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("\"number\":6"));
        assert_eq!(metrics.snapshot().requests_successful, 1);
    }

    #[test]
    fn test_execute_failure_and_close() {
        let metrics = Arc::new(Metrics::new());
        let service = Service::new(Arc::clone(&metrics));

        let completion = Task::new(conn(), request(b"", true)).execute(&service, &metrics);
        assert_eq!(completion.status, StatusCode::BadRequest);
        assert!(completion.close);
        let text = String::from_utf8(completion.bytes).unwrap();
        assert!(text.contains("Connection: close\r\n"));
        assert_eq!(metrics.snapshot().requests_failed, 1);
    }

    #[test]
    fn test_sender_wakes_reactor() {
        let mut poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(1)).unwrap());
        let (tx, rx) = mpsc::channel();
        let sender = CompletionSender::new(tx, waker);

        sender.send(Completion {
            conn: conn(),
            bytes: b"x".to_vec(),
            close: false,
            status: StatusCode::Ok,
        });

        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert!(events.iter().any(|e| e.token() == Token(1)));
        assert_eq!(rx.try_recv().unwrap().bytes, b"x");
    }
}
