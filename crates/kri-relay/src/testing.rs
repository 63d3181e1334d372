//! Scripted in-memory transport for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{Transport, TransportFailure, WireRequest, WireResponse};

type Responder = Box<dyn Fn(&WireRequest) -> WireResponse + Send + Sync>;

/// Replays queued responses in order, then falls back to a responder
/// (or an empty 200) once the queue is drained.
pub(crate) struct ScriptedTransport {
    queue: Mutex<VecDeque<Result<WireResponse, TransportFailure>>>,
    requests: Mutex<Vec<WireRequest>>,
    responder: Option<Responder>,
    delay: Option<Duration>,
    slow_path: Option<(String, Duration)>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            responder: None,
            delay: None,
            slow_path: None,
        }
    }

    pub(crate) fn with_responder(
        responder: impl Fn(&WireRequest) -> WireResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay only requests whose path ends with `suffix`.
    pub(crate) fn with_slow_path(mut self, suffix: &str, delay: Duration) -> Self {
        self.slow_path = Some((suffix.to_string(), delay));
        self
    }

    pub(crate) fn push(&self, response: WireResponse) {
        self.queue.lock().unwrap().push_back(Ok(response));
    }

    pub(crate) fn push_failure(&self, message: &str, timed_out: bool) {
        self.queue.lock().unwrap().push_back(Err(TransportFailure {
            message: message.to_string(),
            timed_out,
        }));
    }

    pub(crate) fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose path ends with `suffix`.
    pub(crate) fn count_path(&self, suffix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.path().ends_with(suffix))
            .count()
    }

    pub(crate) fn ok(body: &str) -> WireResponse {
        WireResponse {
            status: 200,
            body: body.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn redirect(status: u16, location: &str) -> WireResponse {
        WireResponse {
            status,
            headers: vec![("location".to_string(), location.to_string())],
            ..Default::default()
        }
    }
}

impl WireResponse {
    pub(crate) fn with_cookie(mut self, raw: &str) -> Self {
        self.headers.push(("set-cookie".to_string(), raw.to_string()));
        self.set_cookies.push(raw.to_string());
        self
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: WireRequest) -> Result<WireResponse, TransportFailure> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((suffix, delay)) = &self.slow_path {
            if request.url.path().ends_with(suffix.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }
        if let Some(next) = self.queue.lock().unwrap().pop_front() {
            return next;
        }
        Ok(match &self.responder {
            Some(responder) => responder(&request),
            None => Self::ok(""),
        })
    }
}
