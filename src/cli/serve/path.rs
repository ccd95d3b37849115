//! Request URL to route resolution.

use percent_encoding::percent_decode_str;

/// Path of the runtime inspection endpoint.
pub const INSPECT_PATH: &str = "__resources";

/// Script extension appended to extensionless request paths.
const SCRIPT_EXT: &str = ".js";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// JSON dump of the cache graph and scheduler counters.
    Inspect,
    /// Document script under the app location; falls back to `asset`.
    Script { name: String, asset: String },
    /// File under the assets location.
    Asset(String),
    Rejected,
}

/// Resolve an HTTP request URL.
///
/// `/` and `/dir/` map to `index.js`; extensionless paths map to a script
/// of the same name; everything else is an asset.
pub fn resolve(url: &str) -> Route {
    let Some(clean) = normalize_url(url) else {
        return Route::Rejected;
    };

    if clean == INSPECT_PATH {
        return Route::Inspect;
    }

    if clean.is_empty() || clean.ends_with('/') {
        return Route::Script {
            name: format!("{clean}index{SCRIPT_EXT}"),
            asset: format!("{clean}index.html"),
        };
    }

    if has_extension(&clean) {
        Route::Asset(clean)
    } else {
        Route::Script {
            name: format!("{clean}{SCRIPT_EXT}"),
            asset: clean,
        }
    }
}

/// Script name for a WebSocket handshake path (`/chat` → `chat.js`).
pub fn script_for_socket(path: &str) -> Option<String> {
    match resolve(path) {
        Route::Script { name, .. } => Some(name),
        Route::Asset(name) if name.ends_with(SCRIPT_EXT) => Some(name),
        _ => None,
    }
}

/// Decode, strip the query string, and drop the leading slash.
///
/// `None` for undecodable or traversing paths.
fn normalize_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let decoded = percent_decode_str(path).decode_utf8().ok()?;
    let trimmed = decoded.trim_start_matches('/');

    if trimmed.split('/').any(|part| part == "..") || trimmed.contains('\\') {
        return None;
    }
    Some(trimmed.to_string())
}

fn has_extension(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rfind('.').is_some_and(|dot| dot > 0)
}
