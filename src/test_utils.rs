//! Mock HTTP clients and helpers shared by unit and integration tests.

use crate::http::{HttpClient, HttpRequest, HttpResponse};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// A scripted reply for one request against a matching path.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    /// Simulated network latency before the response "arrives".
    pub delay: Duration,
}

impl ScriptedResponse {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }
}

/// Scriptable mock: responses are keyed by a path fragment and consumed in
/// order; unscripted requests get an empty `200 {}`. Every request is
/// recorded for assertions.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    requests: Mutex<Vec<HttpRequest>>,
    scripts: Mutex<Vec<(String, ScriptedResponse)>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next request whose URL contains
    /// `path_fragment`.
    pub fn script(&self, path_fragment: &str, response: ScriptedResponse) {
        self.scripts
            .lock()
            .unwrap()
            .push((path_fragment.to_string(), response));
    }

    pub fn recorded_requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path_fragment: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.contains(path_fragment))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        self.requests.lock().unwrap().push(request.clone());

        let scripted = {
            let mut scripts = self.scripts.lock().unwrap();
            let position = scripts
                .iter()
                .position(|(fragment, _)| request.url.contains(fragment));
            position.map(|i| scripts.remove(i).1)
        };

        let Some(response) = scripted else {
            return Ok(HttpResponse {
                status_code: 200,
                headers: HashMap::new(),
                body: b"{}".to_vec(),
            });
        };

        if response.delay > Duration::ZERO {
            tokio::time::sleep(response.delay).await;
        }
        Ok(HttpResponse {
            status_code: response.status,
            headers: response
                .headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect(),
            body: response.body.into_bytes(),
        })
    }
}

/// Mock that never reaches a server.
#[derive(Debug, Clone, Default)]
pub struct FailingMockHttpClient;

#[async_trait::async_trait]
impl HttpClient for FailingMockHttpClient {
    async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        Err(anyhow::anyhow!("connection refused"))
    }
}
