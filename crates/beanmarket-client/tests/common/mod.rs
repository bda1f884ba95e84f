//! Shared fixtures for client integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use beanmarket_client::{HttpClient, HttpRequest, HttpResponse, HttpTransport, NetworkError};
use beanmarket_core::ApiConfig;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What the mock does for one attempt
#[derive(Debug, Clone)]
pub enum Step {
    Respond(HttpResponse),
    Fail(NetworkError),
    /// Never answers; the client's timeout fires
    Hang,
}

/// Transport that replays a script, then falls back to per-path routes
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Step>>,
    routes: Mutex<Vec<(String, HttpResponse)>>,
    requests: Mutex<Vec<HttpRequest>>,
    attempts: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        let mock = Self::default();
        mock.script.lock().unwrap().extend(steps);
        Arc::new(mock)
    }

    /// Answer requests whose path ends with `suffix`
    pub fn route(&self, suffix: &str, response: HttpResponse) {
        self.routes.lock().unwrap().push((suffix.to_string(), response));
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let step = self.script.lock().unwrap().pop_front();
        let step = step.unwrap_or_else(|| {
            let routes = self.routes.lock().unwrap();
            routes
                .iter()
                .find(|(suffix, _)| request.path().ends_with(suffix.as_str()))
                .map(|(_, response)| Step::Respond(response.clone()))
                .unwrap_or_else(|| Step::Respond(HttpResponse::json_body(404, &json!({ "message": "no route" }))))
        });

        match step {
            Step::Respond(response) => Ok(response),
            Step::Fail(err) => Err(err),
            Step::Hang => futures::future::pending().await,
        }
    }
}

pub fn client(mock: &Arc<MockTransport>) -> HttpClient<Arc<MockTransport>> {
    HttpClient::new(Arc::clone(mock), ApiConfig::testing()).unwrap()
}

pub fn ok_json(body: Value) -> HttpResponse {
    HttpResponse::json_body(200, &body)
}

pub fn login_response(token: &str, user_id: &str) -> HttpResponse {
    ok_json(json!({
        "token": token,
        "user": { "id": user_id, "email": format!("{user_id}@roastery.test"), "name": "Buyer" }
    }))
}

pub fn coffees_payload() -> Value {
    json!({
        "data": [
            {
                "id": "c1",
                "name": "Guji Hambela",
                "origin": "Ethiopia",
                "region": "Guji",
                "processing": "Natural",
                "producer": "Hambela Estate",
                "flavorNotes": ["Blueberry", "Jasmine"],
                "price": "€41.00",
                "rating": 4.7,
                "listedAt": 1714000000
            },
            {
                "id": "c2",
                "name": "Tarrazu La Pastora",
                "origin": "Costa Rica",
                "region": "Tarrazu",
                "processing": "Honey",
                "producer": "La Pastora",
                "flavorNotes": ["Brown Sugar", "Orange"],
                "price": "€32.50",
                "rating": 4.3,
                "listedAt": 1714100000
            },
            {
                "id": "c3",
                "name": "Kayanza Washed",
                "origin": "Burundi",
                "region": "Kayanza",
                "processing": "Washed",
                "producer": "Kayanza Coop",
                "flavorNotes": ["Red Currant"],
                "price": "€36.00",
                "rating": 4.5,
                "listedAt": 1714200000
            }
        ]
    })
}
