//! Server lifecycle: port binding and Ctrl+C shutdown.
//!
//! The Ctrl+C handler is installed once at program start. Before a server
//! is registered it exits the process; afterwards it sets the shutdown flag
//! and unblocks the HTTP loop so `serve` can tear the runtime down.

use anyhow::{Result, anyhow};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tiny_http::Server;

use crate::log;

/// Maximum number of port binding attempts.
const MAX_PORT_RETRIES: u16 = 10;

/// Shutdown has been requested (Ctrl+C received)
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// HTTP server reference for graceful shutdown
static SERVER: OnceLock<Arc<Server>> = OnceLock::new();

/// Install the global Ctrl+C handler. Call once at program start.
pub fn setup_shutdown_handler() -> Result<()> {
    ctrlc::set_handler(|| {
        SHUTDOWN.store(true, Ordering::SeqCst);

        if let Some(server) = SERVER.get() {
            log!("serve"; "shutting down...");
            server.unblock();
        } else {
            std::process::exit(0);
        }
    })
    .map_err(|e| anyhow!("failed to set Ctrl+C handler: {}", e))
}

/// Register the HTTP server for graceful shutdown.
pub fn register_server(server: Arc<Server>) {
    let _ = SERVER.set(server);
}

pub fn is_shutdown() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

/// Bind `bind` on `base_port`, trying the next ports when it is taken.
fn with_retry<T, E: std::fmt::Display>(
    interface: IpAddr,
    base_port: u16,
    bind: impl Fn(SocketAddr) -> std::result::Result<T, E>,
) -> Result<(T, SocketAddr)> {
    let mut last_error = None;

    for offset in 0..MAX_PORT_RETRIES {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::new(interface, port);

        match bind(addr) {
            Ok(bound) => {
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", base_port, port);
                }
                return Ok((bound, addr));
            }
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    Err(anyhow!(
        "Failed to bind after {} attempts (ports {}-{}): {}",
        MAX_PORT_RETRIES,
        base_port,
        base_port.saturating_add(MAX_PORT_RETRIES - 1),
        last_error.unwrap_or_default()
    ))
}

/// Bind the HTTP server; the address is the one actually bound.
pub fn bind_http(interface: IpAddr, port: u16) -> Result<(Server, SocketAddr)> {
    let (server, requested) = with_retry(interface, port, Server::http)?;
    let addr = server.server_addr().to_ip().unwrap_or(requested);
    Ok((server, addr))
}

/// Bind the WebSocket listener; the address is the one actually bound.
pub fn bind_ws(interface: IpAddr, port: u16) -> Result<(TcpListener, SocketAddr)> {
    let (listener, requested) = with_retry(interface, port, TcpListener::bind)?;
    let addr = listener.local_addr().unwrap_or(requested);
    Ok((listener, addr))
}
