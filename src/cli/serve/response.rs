//! HTTP response handlers.

use anyhow::Result;
use parking_lot::Mutex;
use std::io::Read;
use tiny_http::{Header, Method, Request, Response, StatusCode};

use crate::log;
use crate::resource::StaticFile;
use crate::script::{DocumentRequest, ScriptError};
use crate::utils::html::escape;
use crate::utils::mime::{self, types};

/// A document request answered by a script run.
///
/// The request is taken on the first response; later calls are ignored.
pub struct HttpDocument {
    description: String,
    head: bool,
    request: Mutex<Option<Request>>,
    body: Mutex<String>,
}

impl HttpDocument {
    pub fn new(request: Request) -> Self {
        Self {
            description: format!("{} {}", request.method(), request.url()),
            head: is_head_request(&request),
            request: Mutex::new(Some(request)),
            body: Mutex::new(String::new()),
        }
    }

    /// Take the request back when no script will answer it.
    pub fn into_request(self) -> Option<Request> {
        self.request.into_inner()
    }

    fn finish(&self, status: u16, body: String) {
        let Some(request) = self.request.lock().take() else {
            return;
        };
        let result = if self.head {
            send_head(request, status, types::HTML)
        } else {
            send_body(request, status, types::HTML, body.into_bytes())
        };
        if let Err(e) = result {
            log!("serve"; "{}: {}", self.description, e);
        }
    }
}

impl DocumentRequest for HttpDocument {
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn append(&self, text: &str) {
        self.body.lock().push_str(text);
    }

    fn respond(&self) {
        let body = std::mem::take(&mut *self.body.lock());
        self.finish(200, body);
    }

    fn respond_error(&self, error: &ScriptError) {
        self.finish(500, error_page("Script Error", &error.to_string()));
    }
}

/// Respond with a file loaded from the assets location.
pub fn respond_file(request: Request, file: &StaticFile) -> Result<()> {
    let content_type = mime::from_path(file.path());

    if is_head_request(&request) {
        return send_head(request, 200, content_type);
    }

    let mut response = Response::from_data(file.bytes().to_vec());
    add_header(&mut response, "Content-Type", content_type);
    add_header(&mut response, "ETag", &format!("\"{}\"", file.hash()));
    request.respond(response)?;
    Ok(())
}

pub fn respond_json(request: Request, body: String) -> Result<()> {
    send_body(request, 200, types::JSON, body.into_bytes())
}

pub fn respond_not_found(request: Request) -> Result<()> {
    if is_head_request(&request) {
        return send_head(request, 404, types::PLAIN);
    }
    send_body(request, 404, types::PLAIN, b"404 Not Found".to_vec())
}

/// Respond with 503 Service Unavailable (server shutting down).
pub fn respond_unavailable(request: Request) -> Result<()> {
    send_body(request, 503, types::PLAIN, b"503 Service Unavailable".to_vec())
}

/// Respond with a resource failure (500).
pub fn respond_load_error(request: Request, error: &impl std::fmt::Display) -> Result<()> {
    let body = error_page("Resource Error", &error.to_string());
    send_body(request, 500, types::HTML, body.into_bytes())
}

fn error_page(title: &str, message: &str) -> String {
    format!(
        "<html><body><h1>{title}</h1><pre>{}</pre></body></html>",
        escape(message)
    )
}

fn is_head_request(request: &Request) -> bool {
    request.method() == &Method::Head
}

fn send_head(request: Request, status: u16, content_type: &str) -> Result<()> {
    let mut response = Response::empty(StatusCode(status));
    add_header(&mut response, "Content-Type", content_type);
    request.respond(response)?;
    Ok(())
}

fn send_body(request: Request, status: u16, content_type: &str, body: Vec<u8>) -> Result<()> {
    let mut response = Response::from_data(body).with_status_code(StatusCode(status));
    add_header(&mut response, "Content-Type", content_type);
    request.respond(response)?;
    Ok(())
}

/// Non-ASCII values are dropped.
fn add_header<R: Read>(response: &mut Response<R>, key: &str, value: &str) {
    if let Ok(header) = Header::from_bytes(key.as_bytes(), value.as_bytes()) {
        response.add_header(header);
    }
}
