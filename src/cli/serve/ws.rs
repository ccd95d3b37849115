//! WebSocket listener: one thread per client, one script session each.
//!
//! ```text
//! accept ─► handshake (path → script) ─► Runtime::open_connection
//!              │
//!              └─► poll read ─► Runtime::handle_message ... ─► close_connection
//! ```

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::protocol::Message;
use tungstenite::{Error as WsError, WebSocket};

use super::lifecycle::is_shutdown;
use super::path::script_for_socket;
use crate::runtime::Runtime;
use crate::script::{Connection, ConnectionId, HostError, ScriptError};
use crate::{debug, log};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const ACCEPT_INTERVAL: Duration = Duration::from_millis(50);

/// A client socket shared between its reader thread and script sends.
pub struct WsConnection {
    id: ConnectionId,
    socket: Mutex<WebSocket<TcpStream>>,
}

impl WsConnection {
    fn new(socket: WebSocket<TcpStream>) -> Self {
        Self {
            id: ConnectionId::next(),
            socket: Mutex::new(socket),
        }
    }

    fn read(&self) -> Result<Message, WsError> {
        let mut socket = self.socket.lock();
        // push out anything a non-blocking send left queued
        let _ = socket.flush();
        socket.read()
    }
}

impl Connection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, message: &str) -> Result<(), HostError> {
        match self.socket.lock().send(Message::Text(message.to_string().into())) {
            Ok(()) => Ok(()),
            Err(WsError::Io(e)) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Err(HostError::Closed),
            Err(e) => Err(HostError::Transport(e.to_string())),
        }
    }

    fn report_failure(&self, error: &ScriptError) {
        let payload = json!({ "error": error.to_string() }).to_string();
        if let Err(e) = self.send(&payload) {
            debug!("ws"; "{}: failure not delivered: {}", self.id, e);
        }
    }
}

/// Accept clients until shutdown.
pub fn spawn_listener(listener: TcpListener, runtime: Arc<Runtime>) -> std::io::Result<thread::JoinHandle<()>> {
    listener.set_nonblocking(true)?;

    thread::Builder::new()
        .name("weaver-ws".into())
        .spawn(move || {
            while !is_shutdown() {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        let runtime = Arc::clone(&runtime);
                        let spawned = thread::Builder::new()
                            .name(format!("weaver-ws-{peer}"))
                            .spawn(move || serve_client(stream, &runtime));
                        if let Err(e) = spawned {
                            log!("ws"; "failed to start client thread: {}", e);
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_INTERVAL),
                    Err(e) => log!("ws"; "accept failed: {}", e),
                }
            }
        })
}

fn serve_client(stream: TcpStream, runtime: &Runtime) {
    // Keep blocking mode during handshake, switch to non-blocking after
    if let Err(e) = stream.set_nonblocking(false) {
        log!("ws"; "socket setup failed: {}", e);
        return;
    }

    let mut path = String::new();
    let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        path = request.uri().path().to_string();
        Ok(response)
    };
    let mut socket = match tungstenite::accept_hdr(stream, capture) {
        Ok(socket) => socket,
        Err(e) => {
            log!("ws"; "handshake failed: {}", e);
            return;
        }
    };

    let Some(script) = script_for_socket(&path) else {
        debug!("ws"; "no script for {}", path);
        let _ = socket.close(None);
        let _ = socket.flush();
        return;
    };

    if let Err(e) = socket.get_ref().set_nonblocking(true) {
        log!("ws"; "socket setup failed: {}", e);
        return;
    }

    let connection = Arc::new(WsConnection::new(socket));
    let session = match runtime.open_connection(&script, Arc::clone(&connection) as Arc<dyn Connection>) {
        Ok(session) => session,
        Err(e) => {
            log!("ws"; "{}: {}", path, e);
            connection.report_failure(&ScriptError::new(e.to_string()));
            let _ = connection.socket.lock().close(None);
            let _ = connection.socket.lock().flush();
            return;
        }
    };
    debug!("ws"; "{} opened {}", session.id(), script);

    while !is_shutdown() {
        match connection.read() {
            Ok(Message::Text(text)) => {
                if let Err(e) = runtime.handle_message(&session, parse_message(text.as_str())) {
                    connection.report_failure(&ScriptError::new(e.to_string()));
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(WsError::Io(ref e)) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(_) => break,
        }
    }

    debug!("ws"; "{} closed", session.id());
    runtime.close_connection(session);
}

/// JSON when the text parses as JSON, otherwise the text itself.
fn parse_message(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
