//! Per-call request configuration and assembly.
//!
//! # Design
//! `RequestSpec` is a mutable bag of settings filled through chained setters
//! (`&mut self -> &mut Self`). Fallible setters validate before touching any
//! field, so a rejected value leaves the spec exactly as it was. `build`
//! turns the settings into an `HttpRequest`; it never performs I/O.

use serde::Serialize;
use serde_json::{Map, Value};
use url::form_urlencoded;
use url::Url;

use crate::error::ConfigError;
use crate::http::{Headers, HttpMethod, HttpRequest};
use crate::transport::TransportOptions;

/// Timeout used by the convenience verbs.
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;
/// Upper bound accepted by `RequestSpec::set_timeout`.
pub const MAX_TIMEOUT_MS: u64 = 60_000;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Request parameters: either a key/value map or a pre-encoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    Form(Map<String, Value>),
    Raw(String),
}

impl Params {
    pub fn is_empty(&self) -> bool {
        match self {
            Params::Form(map) => map.is_empty(),
            Params::Raw(raw) => raw.is_empty(),
        }
    }

    /// Encodes the parameters for a query string or a form body.
    pub fn encode(&self) -> String {
        match self {
            Params::Form(map) => encode_query(map),
            Params::Raw(raw) => raw.clone(),
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Params::Form(map) => Value::Object(map.clone()),
            Params::Raw(raw) => Value::String(raw.clone()),
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::Form(Map::new())
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Params::Form(map)
    }
}

impl From<String> for Params {
    fn from(raw: String) -> Self {
        Params::Raw(raw)
    }
}

impl From<&str> for Params {
    fn from(raw: &str) -> Self {
        Params::Raw(raw.to_string())
    }
}

/// Settings for one outbound call. Mutable until handed to `HttpClient::execute`.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    host: String,
    port: u16,
    ssl: bool,
    method: HttpMethod,
    uri: String,
    params: Params,
    mock_params: Params,
    headers: Headers,
    body: Option<Vec<u8>>,
    timeout: Option<u64>,
    use_proxy: bool,
    options: TransportOptions,
}

impl RequestSpec {
    pub fn new(host: impl Into<String>, port: u16, ssl: bool) -> Self {
        Self {
            host: host.into(),
            port,
            ssl,
            method: HttpMethod::Get,
            uri: "/".to_string(),
            params: Params::default(),
            mock_params: Params::default(),
            headers: Headers::new(),
            body: None,
            timeout: None,
            use_proxy: false,
            options: TransportOptions::new(),
        }
    }

    /// A spec whose connection goes through the configured HTTP proxy.
    pub fn using_proxy(host: impl Into<String>, port: u16, ssl: bool) -> Self {
        let mut spec = Self::new(host, port, ssl);
        spec.use_proxy = true;
        spec
    }

    pub fn set_method(&mut self, method: HttpMethod) -> &mut Self {
        self.method = method;
        self
    }

    pub fn set_host(&mut self, host: impl Into<String>) -> &mut Self {
        self.host = host.into();
        self
    }

    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self
    }

    pub fn set_ssl(&mut self, ssl: bool) -> &mut Self {
        self.ssl = ssl;
        self
    }

    /// An empty URI is normalized to `/`.
    pub fn set_uri(&mut self, uri: impl Into<String>) -> &mut Self {
        let uri = uri.into();
        self.uri = if uri.is_empty() { "/".to_string() } else { uri };
        self
    }

    /// `None` disables both the DNS and the request deadline.
    pub fn set_timeout(&mut self, timeout_ms: Option<u64>) -> Result<&mut Self, ConfigError> {
        check_timeout(timeout_ms)?;
        self.timeout = timeout_ms;
        Ok(self)
    }

    pub fn set_params(&mut self, params: impl Into<Params>) -> &mut Self {
        self.params = params.into();
        self
    }

    /// Parameters sent instead of the real ones when the call is shadow traffic.
    pub fn set_mock_params(&mut self, params: impl Into<Params>) -> &mut Self {
        self.mock_params = params.into();
        self
    }

    /// Merges headers into the current set; later values win.
    pub fn set_header<K, V>(&mut self, headers: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.extend(headers);
        self
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

    /// Merges transport options; later values win.
    pub fn set_options(&mut self, options: TransportOptions) -> &mut Self {
        self.options.extend(options);
        self
    }

    /// Takes host, port, TLS flag and URI from an absolute URL.
    pub fn parse_url(&mut self, url: &str) -> Result<&mut Self, ConfigError> {
        let target = UrlTarget::parse(url)?;
        self.host = target.host;
        self.port = target.port;
        self.ssl = target.ssl;
        self.set_uri(target.uri);
        Ok(self)
    }

    pub fn get(
        &mut self,
        uri: &str,
        params: impl Into<Params>,
        timeout_ms: Option<u64>,
    ) -> Result<&mut Self, ConfigError> {
        self.set_timeout(timeout_ms)?;
        self.set_method(HttpMethod::Get).set_uri(uri).set_params(params);
        Ok(self)
    }

    pub fn get_by_url(
        &mut self,
        url: &str,
        params: impl Into<Params>,
        timeout_ms: Option<u64>,
    ) -> Result<&mut Self, ConfigError> {
        check_timeout(timeout_ms)?;
        self.parse_url(url)?;
        self.timeout = timeout_ms;
        self.set_method(HttpMethod::Get).set_params(params);
        Ok(self)
    }

    pub fn post(
        &mut self,
        uri: &str,
        params: impl Into<Params>,
        timeout_ms: Option<u64>,
    ) -> Result<&mut Self, ConfigError> {
        self.set_timeout(timeout_ms)?;
        self.set_method(HttpMethod::Post).set_uri(uri).set_params(params);
        Ok(self)
    }

    pub fn post_by_url(
        &mut self,
        url: &str,
        params: impl Into<Params>,
        timeout_ms: Option<u64>,
    ) -> Result<&mut Self, ConfigError> {
        check_timeout(timeout_ms)?;
        self.parse_url(url)?;
        self.timeout = timeout_ms;
        self.set_method(HttpMethod::Post).set_params(params);
        Ok(self)
    }

    /// POSTs `payload` encoded as JSON with a matching content type.
    pub fn post_json<T: Serialize + ?Sized>(
        &mut self,
        uri: &str,
        payload: &T,
        timeout_ms: Option<u64>,
    ) -> Result<&mut Self, ConfigError> {
        let json = encode_json(payload)?;
        self.post(uri, json, timeout_ms)?;
        self.set_header([("Content-Type", "application/json")]);
        Ok(self)
    }

    pub fn post_json_by_url<T: Serialize + ?Sized>(
        &mut self,
        url: &str,
        payload: &T,
        timeout_ms: Option<u64>,
    ) -> Result<&mut Self, ConfigError> {
        let json = encode_json(payload)?;
        self.post_by_url(url, json, timeout_ms)?;
        self.set_header([("Content-Type", "application/json")]);
        Ok(self)
    }

    /// Assembles the outbound request.
    ///
    /// When the spec goes through the proxy and `shadow` is set, the real
    /// parameters and body never leave the process: POST and PUT carry the
    /// mock parameters as body, every other method goes out bare and the
    /// real target is described by headers instead.
    pub fn build(&self, shadow: bool) -> HttpRequest {
        let mut headers = self.headers.clone();
        let mut uri = self.uri.clone();
        let body = if self.use_proxy && shadow {
            match self.method {
                HttpMethod::Post | HttpMethod::Put => {
                    encode_body(&self.mock_params, &mut headers)
                }
                _ => None,
            }
        } else {
            match self.method {
                HttpMethod::Get => {
                    if !self.params.is_empty() {
                        uri = format!("{uri}?{}", self.params.encode());
                    }
                    self.body.clone()
                }
                HttpMethod::Post if !self.params.is_empty() => {
                    encode_body(&self.params, &mut headers)
                }
                _ => self.body.clone(),
            }
        };

        HttpRequest {
            method: self.method,
            uri,
            headers,
            body,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ssl(&self) -> bool {
        self.ssl
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn mock_params(&self) -> &Params {
        &self.mock_params
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn timeout(&self) -> Option<u64> {
        self.timeout
    }

    pub fn is_proxied(&self) -> bool {
        self.use_proxy
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }
}

fn check_timeout(timeout_ms: Option<u64>) -> Result<(), ConfigError> {
    match timeout_ms {
        Some(ms) if ms > MAX_TIMEOUT_MS => Err(ConfigError::TimeoutOutOfRange(ms)),
        _ => Ok(()),
    }
}

fn encode_json<T: Serialize + ?Sized>(payload: &T) -> Result<String, ConfigError> {
    serde_json::to_string(payload).map_err(|e| ConfigError::Serialization(e.to_string()))
}

fn encode_body(params: &Params, headers: &mut Headers) -> Option<Vec<u8>> {
    if let Params::Form(_) = params {
        if !headers.contains("Content-Type") {
            headers.insert("Content-Type", FORM_CONTENT_TYPE);
        }
    }
    Some(params.encode().into_bytes())
}

/// Host, port, TLS flag and URI decomposed from an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UrlTarget {
    host: String,
    port: u16,
    ssl: bool,
    uri: String,
}

impl UrlTarget {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(raw).map_err(|e| match e {
            url::ParseError::EmptyHost | url::ParseError::RelativeUrlWithoutBase => {
                ConfigError::IncompleteUrl(raw.to_string())
            }
            other => ConfigError::MalformedUrl {
                url: raw.to_string(),
                reason: other.to_string(),
            },
        })?;
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(ConfigError::IncompleteUrl(raw.to_string())),
        };
        let ssl = url.scheme() != "http";
        let port = url.port().unwrap_or(if ssl { 443 } else { 80 });
        let mut uri = url.path().to_string();
        if uri.is_empty() {
            uri.push('/');
        }
        if let Some(query) = url.query().filter(|q| !q.is_empty()) {
            uri.push('?');
            uri.push_str(query);
        }
        Ok(Self {
            host,
            port,
            ssl,
            uri,
        })
    }
}

/// Encodes a parameter map as `application/x-www-form-urlencoded`.
///
/// Nested arrays and objects use bracket notation (`a[0]=x`, `b[c]=y`),
/// booleans become `1`/`0` and nulls are skipped.
pub fn encode_query(params: &Map<String, Value>) -> String {
    let mut pairs = Vec::new();
    for (key, value) in params {
        flatten(key.clone(), value, &mut pairs);
    }
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn flatten(key: String, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push((key, if *b { "1" } else { "0" }.to_string())),
        Value::Number(n) => out.push((key, n.to_string())),
        Value::String(s) => out.push((key, s.clone())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten(format!("{key}[{i}]"), item, out);
            }
        }
        Value::Object(map) => {
            for (sub, item) in map {
                flatten(format!("{key}[{sub}]"), item, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    fn spec() -> RequestSpec {
        RequestSpec::new("api.example.com", 80, false)
    }

    #[test]
    fn get_appends_query_string() {
        let mut s = spec();
        s.get("/x", params(json!({"a": 1, "b": 2})), Some(3000)).unwrap();
        let req = s.build(false);
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.uri, "/x?a=1&b=2");
        assert!(req.body.is_none());
    }

    #[test]
    fn get_with_empty_params_keeps_uri() {
        let mut s = spec();
        s.get("/x", Map::new(), None).unwrap();
        assert_eq!(s.build(false).uri, "/x");
    }

    #[test]
    fn post_json_sets_body_and_content_type() {
        let mut s = spec();
        s.post_json("/submit", &json!({"k": "v"}), Some(3000)).unwrap();
        let req = s.build(false);
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.body.as_deref(), Some(br#"{"k":"v"}"#.as_slice()));
        assert_eq!(req.headers.get("Content-Type"), Some("application/json"));
    }

    #[test]
    fn post_form_params_are_urlencoded() {
        let mut s = spec();
        s.post("/form", params(json!({"name": "a b", "tags": ["x", "y"]})), None)
            .unwrap();
        let req = s.build(false);
        assert_eq!(
            req.body.as_deref(),
            Some(b"name=a+b&tags%5B0%5D=x&tags%5B1%5D=y".as_slice())
        );
        assert_eq!(
            req.headers.get("content-type"),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn post_without_params_keeps_explicit_body() {
        let mut s = spec();
        s.set_method(HttpMethod::Post).set_body("raw");
        assert_eq!(s.build(false).body.as_deref(), Some(b"raw".as_slice()));
    }

    #[test]
    fn timeout_out_of_range_leaves_spec_unchanged() {
        let mut s = spec();
        s.set_timeout(Some(500)).unwrap();
        let err = s.set_timeout(Some(60_001)).unwrap_err();
        assert_eq!(err, ConfigError::TimeoutOutOfRange(60_001));
        assert_eq!(s.timeout(), Some(500));

        let err = s.get("/other", Map::new(), Some(70_000)).unwrap_err();
        assert_eq!(err, ConfigError::TimeoutOutOfRange(70_000));
        assert_eq!(s.uri(), "/");
    }

    #[test]
    fn timeout_bounds_are_inclusive() {
        let mut s = spec();
        assert!(s.set_timeout(Some(0)).is_ok());
        assert!(s.set_timeout(Some(MAX_TIMEOUT_MS)).is_ok());
        assert!(s.set_timeout(None).is_ok());
        assert_eq!(s.timeout(), None);
    }

    #[test]
    fn empty_uri_becomes_root() {
        let mut s = spec();
        s.set_uri("");
        assert_eq!(s.uri(), "/");
    }

    #[test]
    fn parse_url_decomposes_target() {
        let mut s = spec();
        s.parse_url("https://pay.example.com/v1/charge?id=7").unwrap();
        assert_eq!(s.host(), "pay.example.com");
        assert_eq!(s.port(), 443);
        assert!(s.ssl());
        assert_eq!(s.uri(), "/v1/charge?id=7");

        s.parse_url("http://10.0.0.1:8080").unwrap();
        assert_eq!(s.host(), "10.0.0.1");
        assert_eq!(s.port(), 8080);
        assert!(!s.ssl());
        assert_eq!(s.uri(), "/");
    }

    #[test]
    fn parse_url_without_host_fails() {
        let mut s = spec();
        assert!(matches!(
            s.parse_url("/relative/path"),
            Err(ConfigError::IncompleteUrl(_))
        ));
        assert!(matches!(
            s.parse_url("http://exa mple.com/"),
            Err(ConfigError::MalformedUrl { .. })
        ));
        assert_eq!(s.host(), "api.example.com");
    }

    #[test]
    fn shadow_get_through_proxy_drops_query() {
        let mut s = RequestSpec::using_proxy("api.example.com", 80, false);
        s.get("/x", params(json!({"a": 1})), None).unwrap();
        s.set_body("ignored");
        let req = s.build(true);
        assert_eq!(req.uri, "/x");
        assert!(req.body.is_none());
    }

    #[test]
    fn shadow_put_through_proxy_sends_mock_body() {
        let mut s = RequestSpec::using_proxy("api.example.com", 80, false);
        s.set_method(HttpMethod::Put)
            .set_params(params(json!({"real": true})))
            .set_mock_params("mocked=1");
        let req = s.build(true);
        assert_eq!(req.body.as_deref(), Some(b"mocked=1".as_slice()));
    }

    #[test]
    fn shadow_flag_is_ignored_without_proxy() {
        let mut s = spec();
        s.get("/x", params(json!({"a": 1})), None).unwrap();
        assert_eq!(s.build(true).uri, "/x?a=1");
    }

    #[test]
    fn query_encoding_handles_nested_values() {
        let encoded = encode_query(&params(json!({
            "flag": true,
            "off": false,
            "skip": null,
            "user": {"id": 3},
        })));
        assert_eq!(encoded, "flag=1&off=0&user%5Bid%5D=3");
    }
}
