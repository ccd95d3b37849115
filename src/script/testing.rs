//! Test doubles for the host interfaces and small hand-written programs.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::host::{Connection, ConnectionId, DocumentRequest, HostError};
use super::{Activation, Entry, Program, Resumption, Scope, ScriptError, Step};

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `WAIT` elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Init completes immediately; no handlers.
pub struct NoopProgram;

impl Program for NoopProgram {
    fn activate(&self, entry: &Entry) -> Option<Box<dyn Activation>> {
        entry
            .is_init()
            .then(|| activation(|_, _| Step::Complete(Value::Null)))
    }

    fn has_handler(&self, _name: &str) -> bool {
        false
    }
}

/// Program whose activations come from a closure.
pub struct FnProgram<F>(pub F);

impl<F> Program for FnProgram<F>
where
    F: Fn(&Entry) -> Option<Box<dyn Activation>> + Send + Sync,
{
    fn activate(&self, entry: &Entry) -> Option<Box<dyn Activation>> {
        (self.0)(entry)
    }

    fn has_handler(&self, name: &str) -> bool {
        (self.0)(&Entry::handler(name, Value::Null)).is_some()
    }
}

struct FnActivation<F>(F);

impl<F> Activation for FnActivation<F>
where
    F: FnMut(&mut Scope<'_>, Resumption) -> Step + Send + Sync,
{
    fn step(&mut self, scope: &mut Scope<'_>, input: Resumption) -> Step {
        (self.0)(scope, input)
    }
}

pub fn activation<F>(step: F) -> Box<dyn Activation>
where
    F: FnMut(&mut Scope<'_>, Resumption) -> Step + Send + Sync + 'static,
{
    Box::new(FnActivation(step))
}

/// Document request that records its body and outcome.
pub struct RecordingRequest {
    description: String,
    body: Mutex<String>,
    sender: Sender<Result<String, String>>,
    receiver: Receiver<Result<String, String>>,
}

impl RecordingRequest {
    pub fn new(description: &str) -> Arc<Self> {
        let (sender, receiver) = channel::unbounded();
        Arc::new(Self {
            description: description.to_string(),
            body: Mutex::new(String::new()),
            sender,
            receiver,
        })
    }

    /// Body on `respond`, error text on `respond_error`.
    pub fn wait(&self) -> Result<String, String> {
        self.receiver
            .recv_timeout(WAIT)
            .unwrap_or_else(|_| panic!("{} never responded", self.description))
    }

    /// Whether a second response arrives within `timeout`.
    pub fn responded_again(&self, timeout: Duration) -> bool {
        self.receiver.recv_timeout(timeout).is_ok()
    }
}

impl DocumentRequest for RecordingRequest {
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn append(&self, text: &str) {
        self.body.lock().push_str(text);
    }

    fn respond(&self) {
        let _ = self.sender.send(Ok(self.body.lock().clone()));
    }

    fn respond_error(&self, error: &ScriptError) {
        let _ = self.sender.send(Err(error.to_string()));
    }
}

/// Connection that records sent messages and reported failures.
pub struct RecordingConnection {
    id: ConnectionId,
    sent: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
    sender: Sender<String>,
    receiver: Receiver<String>,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = channel::unbounded();
        Arc::new(Self {
            id: ConnectionId::next(),
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            sender,
            receiver,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().clone()
    }

    /// Next sent message or `failure: ...` event.
    pub fn next_event(&self) -> Option<String> {
        self.receiver.recv_timeout(WAIT).ok()
    }
}

impl Connection for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, message: &str) -> Result<(), HostError> {
        self.sent.lock().push(message.to_string());
        let _ = self.sender.send(message.to_string());
        Ok(())
    }

    fn report_failure(&self, error: &ScriptError) {
        self.failures.lock().push(error.to_string());
        let _ = self.sender.send(format!("failure: {error}"));
    }
}
