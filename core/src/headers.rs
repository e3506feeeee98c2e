//! Headers added to every outbound request at dispatch time.

use serde_json::Value;

use crate::config::ClientConfig;
use crate::context::RequestContext;
use crate::http::{Headers, HttpMethod, HttpRequest};
use crate::request::RequestSpec;

pub const HOST_HEADER: &str = "Host";
/// Marks requests whose target speaks TLS.
pub const SCHEME_HEADER: &str = "Scheme";
const SHADOW_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Final header set for `request`: the caller's headers plus host, scheme,
/// trace correlation, RPC context and, for proxied shadow traffic, the
/// routing headers the proxy needs.
pub fn synthesize(
    spec: &RequestSpec,
    request: &HttpRequest,
    context: &RequestContext,
    config: &ClientConfig,
) -> Headers {
    let mut headers = request.headers.clone();

    headers.insert(HOST_HEADER, host_value(spec.host(), spec.port()));
    if spec.ssl() {
        headers.insert(SCHEME_HEADER, "https");
    }

    if let Some((name, value)) = context.trace().and_then(|t| t.correlation_key()) {
        headers.insert(name, value);
    }

    for (key, value) in context.rpc_context() {
        headers.insert(key.as_str(), header_value(value));
    }

    if spec.is_proxied() && context.is_shadow() {
        headers.insert("Content-Type", SHADOW_CONTENT_TYPE);
        headers.insert(config.real_url_header.as_str(), real_url(spec));
        if let Some(app) = &config.app_name {
            headers.insert(config.app_header.as_str(), app.as_str());
        }
    }

    headers
}

/// `host`, qualified with `:port` unless the port is 80.
pub fn host_value(host: &str, port: u16) -> String {
    if port == 80 {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

/// Scalars are stringified as-is; anything else is sent as JSON.
fn header_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn real_url(spec: &RequestSpec) -> String {
    let scheme = if spec.ssl() { "https" } else { "http" };
    let mut url = format!("{scheme}://{}:{}{}", spec.host(), spec.port(), spec.uri());
    if matches!(spec.method(), HttpMethod::Get | HttpMethod::Delete) && !spec.mock_params().is_empty() {
        url.push('?');
        url.push_str(&spec.mock_params().encode());
    }
    url
}
