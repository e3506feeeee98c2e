//! End-to-end requests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives `HttpClient` with the
//! tokio resolver and timer and a transport backed by ureq. Each dispatch
//! runs the blocking ureq call on its own thread and reports back through
//! `TransportEvents`, the way an event-loop transport would.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use httpcall_core::resolver::LookupCallback;
use httpcall_core::{
    ConnectTarget, Connector, Headers, HttpClient, HttpMethod, RawResponse, RequestContext,
    RequestError, RequestSpec, Resolver, Response, TokioTimer, Transport, TransportEvents,
};
use mock_server::Echo;
use serde_json::{json, Map};
use tokio::runtime::Handle;

// ---------------------------------------------------------------------------
// ureq-backed transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct UreqConnector {
    connects: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl Connector for UreqConnector {
    fn connect(&self, target: &ConnectTarget) -> Box<dyn Transport> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Box::new(UreqTransport {
            addr: SocketAddr::new(target.ip, target.port),
            headers: Headers::new(),
            closes: Arc::clone(&self.closes),
        })
    }
}

struct UreqTransport {
    addr: SocketAddr,
    headers: Headers,
    closes: Arc<AtomicUsize>,
}

impl UreqTransport {
    fn dispatch(&self, method: HttpMethod, uri: &str, body: Option<Vec<u8>>, events: TransportEvents) {
        let url = format!("http://{}{uri}", self.addr);
        let headers = self.headers.clone();
        std::thread::spawn(move || match send(method, &url, &headers, body) {
            Ok(response) => events.on_receive(response),
            Err(_) => events.on_close(),
        });
    }
}

impl Transport for UreqTransport {
    fn set_headers(&mut self, headers: &Headers) {
        self.headers = headers.clone();
    }

    fn get(&mut self, uri: &str, events: TransportEvents) {
        self.dispatch(HttpMethod::Get, uri, None, events);
    }

    fn post(&mut self, uri: &str, body: Vec<u8>, events: TransportEvents) {
        self.dispatch(HttpMethod::Post, uri, Some(body), events);
    }

    fn execute(&mut self, method: HttpMethod, uri: &str, body: Option<Vec<u8>>, events: TransportEvents) {
        self.dispatch(method, uri, body, events);
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Copies every header except `Host`, which ureq derives from the URL.
fn with_headers<B>(mut req: ureq::RequestBuilder<B>, headers: &Headers) -> ureq::RequestBuilder<B> {
    for (name, value) in headers.iter() {
        if !name.eq_ignore_ascii_case("host") {
            req = req.header(name, value);
        }
    }
    req
}

/// Performs one blocking request. Status codes are returned as data.
fn send(method: HttpMethod, url: &str, headers: &Headers, body: Option<Vec<u8>>) -> Result<RawResponse, ureq::Error> {
    let agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(5)))
        .build()
        .new_agent();

    let body = body.unwrap_or_default();
    let mut response = match method {
        HttpMethod::Get => with_headers(agent.get(url), headers).call(),
        HttpMethod::Delete => with_headers(agent.delete(url), headers).call(),
        HttpMethod::Head => with_headers(agent.head(url), headers).call(),
        HttpMethod::Options => with_headers(agent.options(url), headers).call(),
        HttpMethod::Post => with_headers(agent.post(url), headers).send(&body[..]),
        HttpMethod::Put => with_headers(agent.put(url), headers).send(&body[..]),
        HttpMethod::Patch => with_headers(agent.patch(url), headers).send(&body[..]),
    }?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let body = response.body_mut().read_to_vec()?;
    Ok(RawResponse { status, headers, body })
}

/// Resolver whose lookups never answer.
struct SilentResolver;

impl Resolver for SilentResolver {
    fn lookup(&self, _host: &str, _on_result: LookupCallback) {}
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn start_server() -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });
    addr
}

async fn call(
    client: &HttpClient,
    spec: RequestSpec,
    context: RequestContext,
) -> Result<Response, RequestError> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    client
        .execute(spec, context, move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), rx)
        .await
        .expect("callback never fired")
        .unwrap()
}

fn local_spec(addr: SocketAddr) -> RequestSpec {
    RequestSpec::new(addr.ip().to_string(), addr.port(), false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn get_reaches_server_with_query_and_context_headers() {
    let addr = start_server();
    let connector = Arc::new(UreqConnector::default());
    let client = HttpClient::with_runtime(Handle::current(), connector.clone());

    let mut spec = local_spec(addr);
    let params = json!({"a": 1, "b": "x y"}).as_object().unwrap().clone();
    spec.get("/echo/users", params, Some(3000)).unwrap();
    let context = RequestContext::new().with_rpc_value("x-tenant", "acme");

    let response = call(&client, spec, context).await.unwrap();
    assert_eq!(response.status_code(), 200);
    let echo: Echo = response.json().unwrap();
    assert_eq!(echo.method, "GET");
    assert_eq!(echo.uri, "/echo/users?a=1&b=x+y");
    assert_eq!(echo.query.as_deref(), Some("a=1&b=x+y"));
    assert_eq!(echo.headers.get("x-tenant").map(String::as_str), Some("acme"));

    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn post_json_delivers_body_and_content_type() {
    let addr = start_server();
    let client = HttpClient::with_runtime(Handle::current(), Arc::new(UreqConnector::default()));

    let mut spec = local_spec(addr);
    spec.post_json("/echo", &json!({"k": "v"}), Some(3000)).unwrap();

    let echo: Echo = call(&client, spec, RequestContext::new())
        .await
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.body, r#"{"k":"v"}"#);
    assert_eq!(
        echo.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn post_form_params_are_url_encoded() {
    let addr = start_server();
    let client = HttpClient::with_runtime(Handle::current(), Arc::new(UreqConnector::default()));

    let mut spec = local_spec(addr);
    let params = json!({"user": "ann", "remember": true}).as_object().unwrap().clone();
    spec.post("/echo/login", params, Some(3000)).unwrap();

    let echo: Echo = call(&client, spec, RequestContext::new())
        .await
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(echo.body, "user=ann&remember=1");
    assert_eq!(
        echo.headers.get("content-type").map(String::as_str),
        Some("application/x-www-form-urlencoded")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn put_goes_through_generic_dispatch() {
    let addr = start_server();
    let client = HttpClient::with_runtime(Handle::current(), Arc::new(UreqConnector::default()));

    let mut spec = local_spec(addr);
    spec.set_method(HttpMethod::Put)
        .set_uri("/echo/items/1")
        .set_body("payload")
        .set_timeout(Some(3000))
        .unwrap();

    let echo: Echo = call(&client, spec, RequestContext::new())
        .await
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(echo.method, "PUT");
    assert_eq!(echo.uri, "/echo/items/1");
    assert_eq!(echo.body, "payload");
}

#[tokio::test(flavor = "multi_thread")]
async fn error_status_is_a_response() {
    let addr = start_server();
    let client = HttpClient::with_runtime(Handle::current(), Arc::new(UreqConnector::default()));

    let mut spec = local_spec(addr);
    spec.get("/status/503", Map::new(), Some(3000)).unwrap();

    let response = call(&client, spec, RequestContext::new()).await.unwrap();
    assert_eq!(response.status_code(), 503);
    assert!(response.body().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_response_times_out_once() {
    let addr = start_server();
    let connector = Arc::new(UreqConnector::default());
    let client = HttpClient::with_runtime(Handle::current(), connector.clone());

    let mut spec = local_spec(addr);
    spec.get("/delay/400", Map::new(), Some(50)).unwrap();

    let started = Instant::now();
    let err = call(&client, spec, RequestContext::new()).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(err.code(), 408);
    assert!(matches!(err, RequestError::RequestTimeout(_)));

    // The late response must not release the transport a second time.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_connection_reports_close() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = HttpClient::with_runtime(Handle::current(), Arc::new(UreqConnector::default()));

    let mut spec = RequestSpec::new("127.0.0.1", port, false);
    spec.set_timeout(Some(3000)).unwrap();

    let err = call(&client, spec, RequestContext::new()).await.unwrap_err();
    assert!(matches!(err, RequestError::ConnectionClosed(_)));
    assert_eq!(err.code(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unresolvable_host_never_connects() {
    let connector = Arc::new(UreqConnector::default());
    let client = HttpClient::with_runtime(Handle::current(), connector.clone());

    let mut spec = RequestSpec::new("no-such-host.invalid", 80, false);
    spec.set_timeout(Some(5000)).unwrap();

    let err = call(&client, spec, RequestContext::new()).await.unwrap_err();
    assert!(
        matches!(err, RequestError::HostNotFound { .. } | RequestError::DnsTimeout { .. }),
        "unexpected error: {err}"
    );
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn dns_deadline_fires_on_the_runtime_clock() {
    let connector = Arc::new(UreqConnector::default());
    let timer = Arc::new(TokioTimer::new(Handle::current()));
    let client = HttpClient::new(Arc::new(SilentResolver), timer.clone(), connector.clone());

    let mut spec = RequestSpec::new("slow-dns.example", 80, false);
    spec.set_timeout(Some(10)).unwrap();

    let started = Instant::now();
    let err = call(&client, spec, RequestContext::new()).await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(10));
    assert!(started.elapsed() < Duration::from_secs(2));
    match err {
        RequestError::DnsTimeout { host, timeout_ms } => {
            assert_eq!(host, "slow-dns.example");
            assert_eq!(timeout_ms, 10);
        }
        other => panic!("expected dns timeout, got {other:?}"),
    }
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    assert_eq!(timer.pending(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn ip_literal_skips_lookup() {
    let addr = start_server();
    let client = HttpClient::with_runtime(Handle::current(), Arc::new(UreqConnector::default()));

    let ip: IpAddr = addr.ip();
    let mut spec = RequestSpec::new(ip.to_string(), addr.port(), false);
    spec.get("/echo", Map::new(), None).unwrap();

    let response = call(&client, spec, RequestContext::new()).await.unwrap();
    assert_eq!(response.status_code(), 200);
}
