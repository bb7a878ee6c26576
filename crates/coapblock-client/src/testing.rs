//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use coapblock_core::{Code, Request, Response};

use crate::transport::{Transport, TransportError};

/// Replays canned outcomes in order and records every request it is given.
/// Running out of outcomes is a test bug and panics.
#[derive(Default)]
pub struct ScriptedTransport {
    outcomes: Mutex<VecDeque<Result<Response, TransportError>>>,
    sent: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn replying(codes: &[Code]) -> Self {
        let t = Self::default();
        for &code in codes {
            t.push(Ok(Response::new(code, Vec::new())));
        }
        t
    }

    pub fn push(&self, outcome: Result<Response, TransportError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        self.sent.lock().unwrap().push(request);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted transport ran out of outcomes")
    }
}
