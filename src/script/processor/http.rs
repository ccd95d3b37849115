//! Outbound HTTP calls.
//!
//! Non-2xx statuses are ordinary values the script can inspect; only
//! transport failures and timeouts resume the script with an error.

use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

use super::{Completion, ContinuationProcessor, TriggerRequest, deliver};
use crate::config::cfg;
use crate::script::{HttpCall, Trigger, TriggerError, TriggerKind};

/// Response handed back to the script.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub headers: Map<String, Value>,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Map::new(),
            body: body.into(),
        }
    }

    /// `{ok, status, headers, body}`; a JSON body is parsed, anything else
    /// stays a string.
    pub fn into_value(self) -> Value {
        let body = if self.body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&self.body).unwrap_or(Value::String(self.body))
        };

        json!({
            "ok": (200..300).contains(&self.status),
            "status": self.status,
            "headers": self.headers,
            "body": body,
        })
    }
}

/// Blocking HTTP client seam.
pub trait HttpTransport: Send + Sync {
    fn execute(&self, call: &HttpCall, timeout: Duration) -> Result<HttpReply, String>;
}

/// Default transport backed by `ureq`.
#[derive(Debug, Default)]
pub struct UreqTransport;

impl HttpTransport for UreqTransport {
    fn execute(&self, call: &HttpCall, timeout: Duration) -> Result<HttpReply, String> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(&cfg().http.user_agent)
            .build();

        let request = agent.request(&call.method, &call.url);
        let response = match &call.body {
            Some(body) if !body.is_null() => request
                .set("content-type", "application/json")
                .send_string(&body.to_string()),
            _ => request.call(),
        };

        let response = match response {
            Ok(response) | Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => return Err(err.to_string()),
        };

        let mut headers = Map::new();
        for name in response.headers_names() {
            if let Some(value) = response.header(&name) {
                headers.insert(name.to_ascii_lowercase(), Value::from(value));
            }
        }
        let status = response.status();
        let body = response.into_string().map_err(|err| err.to_string())?;

        Ok(HttpReply {
            status,
            headers,
            body,
        })
    }
}

/// Runs calls on the blocking pool under the configured timeout.
pub struct HttpProcessor {
    transport: Arc<dyn HttpTransport>,
    io: Handle,
}

impl HttpProcessor {
    pub fn new(transport: Arc<dyn HttpTransport>, io: Handle) -> Self {
        Self { transport, io }
    }
}

impl ContinuationProcessor for HttpProcessor {
    fn kind(&self) -> TriggerKind {
        TriggerKind::HttpCall
    }

    fn perform(&self, request: TriggerRequest, completion: Completion) {
        let Trigger::HttpCall(call) = request.trigger else {
            deliver(completion, Err(TriggerError::Abandoned));
            return;
        };

        let transport = Arc::clone(&self.transport);
        self.io.spawn(async move {
            let timeout = cfg().http.timeout();
            let (method, url) = (call.method.clone(), call.url.clone());

            let blocking = tokio::task::spawn_blocking(move || transport.execute(&call, timeout));
            let result = match tokio::time::timeout(timeout, blocking).await {
                Ok(Ok(Ok(reply))) => Ok(reply.into_value()),
                Ok(Ok(Err(reason))) => Err(TriggerError::Http { method, url, reason }),
                Ok(Err(join)) => Err(TriggerError::Http {
                    method,
                    url,
                    reason: join.to_string(),
                }),
                Err(_) => Err(TriggerError::Timeout {
                    method,
                    url,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            };
            deliver(completion, result);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_value_parses_json_body() {
        let value = HttpReply::new(200, r#"{"name": "weaver"}"#).into_value();
        assert_eq!(value["ok"], true);
        assert_eq!(value["status"], 200);
        assert_eq!(value["body"]["name"], "weaver");
    }

    #[test]
    fn test_error_status_is_a_value() {
        let value = HttpReply::new(404, "missing").into_value();
        assert_eq!(value["ok"], false);
        assert_eq!(value["body"], "missing");
        assert_eq!(HttpReply::new(204, "  ").into_value()["body"], Value::Null);
    }
}
