//! Script server: HTTP documents and WebSocket sessions.
//!
//! ```text
//! GET /name ──► Runtime::handle_document("name.js") ──► HttpDocument
//!     │ script missing
//!     └──────► assets/name ──► 404
//! ws://host/name ──► WsConnection session for "name.js"
//! GET /__resources ──► RuntimeReport as JSON
//! ```

mod lifecycle;
mod path;
mod response;
mod ws;


pub use lifecycle::setup_shutdown_handler;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tiny_http::{Request, Server};

use crate::config::WeaverConfig;
use crate::resource::{Location, ResourceKey, ResourceKind};
use crate::runtime::Runtime;
use crate::{debug, log};
use path::Route;
use response::HttpDocument;

/// Request handler threads
const REQUEST_THREADS: usize = 4;

/// Bound listeners ready to accept requests
pub struct BoundServer {
    server: Arc<Server>,
    addr: SocketAddr,
    ws: std::net::TcpListener,
    ws_addr: SocketAddr,
}

/// Bind both listeners without starting the request loop.
pub fn bind_server(config: &WeaverConfig) -> Result<BoundServer> {
    let (server, addr) = lifecycle::bind_http(config.serve.interface, config.serve.port)?;
    let (ws, ws_addr) = lifecycle::bind_ws(config.serve.interface, config.serve.ws_port)?;

    let server = Arc::new(server);
    lifecycle::register_server(Arc::clone(&server));

    log!("serve"; "http://{}", addr);
    log!("ws"; "ws://{}", ws_addr);

    Ok(BoundServer {
        server,
        addr,
        ws,
        ws_addr,
    })
}

impl BoundServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ws_addr(&self) -> SocketAddr {
        self.ws_addr
    }

    /// Serve until Ctrl+C, then shut the runtime down.
    pub fn run(self, runtime: Arc<Runtime>) -> Result<()> {
        let ws_thread = ws::spawn_listener(self.ws, Arc::clone(&runtime))
            .context("Failed to start WebSocket listener")?;

        run_request_loop(&self.server, &runtime)?;

        runtime.shutdown();
        let _ = ws_thread.join();
        Ok(())
    }
}

fn run_request_loop(server: &Server, runtime: &Arc<Runtime>) -> Result<()> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(REQUEST_THREADS)
        .thread_name(|i| format!("weaver-http-{i}"))
        .build()
        .context("Failed to create request pool")?;

    for request in server.incoming_requests() {
        let runtime = Arc::clone(runtime);
        pool.spawn(move || {
            if let Err(e) = handle_request(request, &runtime) {
                log!("serve"; "request error: {e}");
            }
        });
    }
    Ok(())
}

/// Handle a single HTTP request
fn handle_request(request: Request, runtime: &Runtime) -> Result<()> {
    if lifecycle::is_shutdown() {
        return response::respond_unavailable(request);
    }

    match path::resolve(request.url()) {
        Route::Inspect => {
            let body = serde_json::to_string_pretty(&runtime.report())?;
            response::respond_json(request, body)
        }
        Route::Script { name, asset } => handle_document(request, runtime, &name, &asset),
        Route::Asset(name) => respond_asset(request, runtime, &name),
        Route::Rejected => response::respond_not_found(request),
    }
}

fn handle_document(request: Request, runtime: &Runtime, name: &str, asset: &str) -> Result<()> {
    let document = Arc::new(HttpDocument::new(request));

    match runtime.handle_document(name, Arc::clone(&document) as _) {
        Ok(()) => Ok(()),
        Err(e) => {
            let request = Arc::into_inner(document).and_then(HttpDocument::into_request);
            let Some(request) = request else {
                return Ok(());
            };
            if e.is_not_found() {
                respond_asset(request, runtime, asset)
            } else {
                log!("serve"; "{}: {}", name, e);
                response::respond_load_error(request, &e)
            }
        }
    }
}

fn respond_asset(request: Request, runtime: &Runtime, name: &str) -> Result<()> {
    let key = ResourceKey::new(ResourceKind::Static, Location::Assets, name);

    match runtime.cache().load(&key) {
        Ok(artifact) => match artifact.as_static() {
            Some(file) => response::respond_file(request, file),
            None => response::respond_not_found(request),
        },
        Err(e) if e.is_not_found() => {
            debug!("serve"; "404 {}", name);
            response::respond_not_found(request)
        }
        Err(e) => response::respond_load_error(request, &e),
    }
}
