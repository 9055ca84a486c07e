use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::render::jobs::PollClock;
use crate::transport::{HttpRequest, HttpResponse, RenderTransport, TransportError};

type ScriptedResponse = Result<HttpResponse, TransportError>;

#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    routes: Arc<Mutex<Vec<(String, VecDeque<ScriptedResponse>)>>>,
    seen: Arc<Mutex<Vec<HttpRequest>>>,
}

impl FakeTransport {
    /// Queues a response for requests whose URL equals `pattern` (absolute
    /// patterns) or whose path starts with it. The last queued response for a
    /// route keeps answering once the queue is drained.
    pub(crate) fn route(self, pattern: &str, response: ScriptedResponse) -> Self {
        {
            let mut routes = self.routes.lock().expect("fake transport mutex poisoned");
            match routes.iter_mut().find(|(p, _)| p == pattern) {
                Some((_, queue)) => queue.push_back(response),
                None => routes.push((pattern.to_string(), VecDeque::from([response]))),
            }
        }
        self
    }

    pub(crate) fn take_seen(&self) -> Vec<HttpRequest> {
        std::mem::take(&mut *self.seen.lock().expect("fake transport mutex poisoned"))
    }

    pub(crate) fn seen_count(&self) -> usize {
        self.seen.lock().expect("fake transport mutex poisoned").len()
    }
}

impl RenderTransport for FakeTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.seen
            .lock()
            .expect("fake transport mutex poisoned")
            .push(request.clone());

        let path = Url::parse(request.url.as_str())
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        let mut routes = self.routes.lock().expect("fake transport mutex poisoned");
        let Some((_, queue)) = routes.iter_mut().find(|(pattern, _)| {
            if pattern.starts_with("http") {
                request.url == *pattern
            } else {
                path.starts_with(pattern.as_str())
            }
        }) else {
            return Err(TransportError::Request(format!(
                "no scripted route for {}",
                request.url
            )));
        };
        if queue.len() > 1 {
            queue
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Request(String::from("drained"))))
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(TransportError::Request(String::from("drained"))))
        }
    }
}

pub(crate) fn json_response(status: u16, body: Value) -> ScriptedResponse {
    Ok(HttpResponse {
        status,
        content_type: Some(String::from("application/json")),
        body: body.to_string().into_bytes(),
    })
}

pub(crate) fn status_response(status: u16) -> ScriptedResponse {
    Ok(HttpResponse {
        status,
        content_type: None,
        body: Vec::new(),
    })
}

pub(crate) fn bytes_response(content_type: &str, body: &[u8]) -> ScriptedResponse {
    Ok(HttpResponse {
        status: 200,
        content_type: Some(content_type.to_string()),
        body: body.to_vec(),
    })
}

#[derive(Clone, Default)]
pub(crate) struct VirtualClock {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl VirtualClock {
    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().expect("virtual clock mutex poisoned").clone()
    }
}

impl PollClock for VirtualClock {
    fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .expect("virtual clock mutex poisoned")
            .push(duration);
    }
}
