//! End-to-end behaviour of the caching proxy against a scripted origin.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use cacheproxy::proxy::{CACHE_KEY_HEADER, CACHE_STATUS_HEADER};
use cacheproxy::{CachingProxy, OriginClient, Request, Response, Server, StatusCode};

/// An origin whose reply body can be changed between requests and which
/// counts how often it is contacted.
struct Origin {
    addr: String,
    calls: Arc<AtomicUsize>,
    body: Arc<Mutex<String>>,
    task: JoinHandle<Result<(), cacheproxy::ServerError>>,
}

impl Origin {
    async fn spawn() -> Self {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().to_string();
        let calls = Arc::new(AtomicUsize::new(0));
        let body = Arc::new(Mutex::new(String::from(r#"{"n":1}"#)));

        let (counter, payload) = (Arc::clone(&calls), Arc::clone(&body));
        let task = tokio::spawn(server.run(move |req: Request| {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let reply = payload.lock().unwrap().clone();
            async move {
                Response::new(StatusCode::OK)
                    .header("Content-Type", "application/json")
                    .header("Set-Cookie", "a=1")
                    .header("X-Origin-Call", call.to_string())
                    .header("Set-Cookie", "b=2")
                    .header("X-Cache", "upstream-says-hit")
                    .header("X-Seen-Method", req.method().as_str())
                    .header("X-Seen-Body", String::from_utf8_lossy(req.body()).into_owned())
                    .body_bytes(reply)
            }
        }));

        Self {
            addr,
            calls,
            body,
            task,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn reply_with(&self, body: &str) {
        *self.body.lock().unwrap() = body.to_owned();
    }
}

impl Drop for Origin {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn request(method: &str, target: &str, body: &[u8]) -> Request {
    let raw = format!(
        "{method} {target} HTTP/1.1\r\nHost: proxy.test\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    let (req, _) = Request::parse(raw.as_bytes()).unwrap();
    req.with_body(Bytes::copy_from_slice(body))
}

fn get(target: &str) -> Request {
    request("GET", target, b"")
}

fn cache_status(response: &Response) -> Option<&str> {
    response.headers().get(CACHE_STATUS_HEADER)
}

#[tokio::test]
async fn miss_then_hit_replays_identical_response() {
    let origin = Origin::spawn().await;
    let proxy = CachingProxy::new(OriginClient::new(&origin.addr));

    let first = proxy.handle(get("/items?page=1")).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(cache_status(&first), Some("miss"));
    assert_eq!(origin.calls(), 1);

    let second = proxy.handle(get("/items?page=1")).await;
    assert_eq!(cache_status(&second), Some("hit"));
    assert_eq!(second.status(), first.status());
    assert_eq!(second.content(), first.content());
    assert_eq!(
        second.headers().get(CACHE_KEY_HEADER),
        first.headers().get(CACHE_KEY_HEADER)
    );
    assert_eq!(second.headers().get("x-origin-call"), Some("1"));
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn hit_ignores_origin_changes() {
    let origin = Origin::spawn().await;
    let proxy = CachingProxy::new(OriginClient::new(&origin.addr));

    let first = proxy.handle(get("/counter")).await;
    assert_eq!(&first.content()[..], br#"{"n":1}"#);

    origin.reply_with(r#"{"n":2}"#);

    let second = proxy.handle(get("/counter")).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(cache_status(&second), Some("hit"));
    assert_eq!(&second.content()[..], br#"{"n":1}"#);
}

#[tokio::test]
async fn non_get_always_goes_to_origin() {
    let origin = Origin::spawn().await;
    let proxy = CachingProxy::new(OriginClient::new(&origin.addr));

    let cached = proxy.handle(get("/a")).await;
    assert_eq!(cache_status(&cached), Some("miss"));

    for expected_calls in 2..=3 {
        let post = proxy.handle(request("POST", "/a", b"")).await;
        assert_eq!(cache_status(&post), Some("miss"));
        assert!(!post.headers().contains(CACHE_KEY_HEADER));
        assert_eq!(post.headers().get("x-seen-method"), Some("POST"));
        assert_eq!(origin.calls(), expected_calls);
    }

    // The POSTs neither replaced nor disturbed the GET entry.
    let again = proxy.handle(get("/a")).await;
    assert_eq!(cache_status(&again), Some("hit"));
    assert_eq!(proxy.store().len(), 1);
}

#[tokio::test]
async fn request_body_is_part_of_the_key() {
    let origin = Origin::spawn().await;
    let proxy = CachingProxy::new(OriginClient::new(&origin.addr));

    let plain = proxy.handle(get("/search")).await;
    let with_body = proxy.handle(request("GET", "/search", b"{\"q\":\"rust\"}")).await;

    assert_eq!(cache_status(&plain), Some("miss"));
    assert_eq!(cache_status(&with_body), Some("miss"));
    assert_ne!(
        plain.headers().get(CACHE_KEY_HEADER),
        with_body.headers().get(CACHE_KEY_HEADER)
    );
    // The body consumed for the key still reached the origin.
    assert_eq!(with_body.headers().get("x-seen-body"), Some("{\"q\":\"rust\"}"));
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn flush_forces_misses() {
    let origin = Origin::spawn().await;
    let proxy = CachingProxy::new(OriginClient::new(&origin.addr));

    proxy.handle(get("/a")).await;
    assert_eq!(cache_status(&proxy.handle(get("/a")).await), Some("hit"));

    proxy.flush_cache();
    assert!(proxy.store().is_empty());

    assert_eq!(cache_status(&proxy.handle(get("/a")).await), Some("miss"));
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn clean_cache_invalidates_exactly_one_key() {
    let origin = Origin::spawn().await;
    let proxy = CachingProxy::new(OriginClient::new(&origin.addr));

    let a = proxy.handle(get("/a")).await;
    proxy.handle(get("/b")).await;
    let key_a = a.headers().get(CACHE_KEY_HEADER).unwrap().to_owned();

    assert!(proxy.clean_cache(&key_a));
    assert!(!proxy.store().contains(&key_a));

    let a_again = proxy.handle(get("/a")).await;
    assert_eq!(cache_status(&a_again), Some("miss"));
    // A removed key is absent, not an empty hit.
    assert!(!a_again.content().is_empty());

    assert_eq!(cache_status(&proxy.handle(get("/b")).await), Some("hit"));
}

#[tokio::test]
async fn upstream_headers_pass_through_but_cache_status_is_ours() {
    let origin = Origin::spawn().await;
    let proxy = CachingProxy::new(OriginClient::new(&origin.addr));

    for expected in ["miss", "hit"] {
        let response = proxy.handle(get("/headers")).await;
        let cookies: Vec<_> = response.headers().get_all("set-cookie").collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(response.headers().get("content-type"), Some("application/json"));

        let statuses: Vec<_> = response.headers().get_all("x-cache").collect();
        assert_eq!(statuses, vec![expected]);
    }
}

#[tokio::test]
async fn unreachable_origin_is_a_502_and_caches_nothing() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let proxy = CachingProxy::new(OriginClient::new(&addr));
    let response = proxy.handle(get("/down")).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(cache_status(&response), Some("miss"));
    assert!(proxy.store().is_empty());

    let post = proxy.handle(request("DELETE", "/down", b"")).await;
    assert_eq!(post.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(cache_status(&post), Some("miss"));
}

#[tokio::test]
async fn concurrent_first_requests_all_succeed() {
    let origin = Origin::spawn().await;
    let proxy = CachingProxy::new(OriginClient::new(&origin.addr));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let proxy = proxy.clone();
            tokio::spawn(async move { proxy.handle(get("/stampede")).await })
        })
        .collect();

    for task in tasks {
        let response = task.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&response.content()[..], br#"{"n":1}"#);
    }

    // Racing misses may each reach the origin; they still leave one entry.
    let calls = origin.calls();
    assert!((1..=16).contains(&calls));
    assert_eq!(proxy.store().len(), 1);

    assert_eq!(cache_status(&proxy.handle(get("/stampede")).await), Some("hit"));
    assert_eq!(origin.calls(), calls);
}

async fn send_raw(addr: &str, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn serves_clients_over_tcp() {
    let origin = Origin::spawn().await;
    let proxy = CachingProxy::new(OriginClient::new(&origin.addr));

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = server.local_addr().to_string();
    let front = tokio::spawn(server.run(move |req: Request| {
        let proxy = proxy.clone();
        async move { proxy.handle(req).await }
    }));

    let raw = b"GET /wire HTTP/1.1\r\nHost: proxy.test\r\nConnection: close\r\n\r\n";

    let first = send_raw(&proxy_addr, raw).await;
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(first.contains("X-Cache: miss\r\n"));
    assert!(first.ends_with(r#"{"n":1}"#));

    let second = send_raw(&proxy_addr, raw).await;
    assert!(second.contains("X-Cache: hit\r\n"));
    assert!(!second.contains("upstream-says-hit"));
    assert!(second.contains("Content-Length: 7\r\n"));
    assert!(second.ends_with(r#"{"n":1}"#));

    // Chunked request bodies are decoded before forwarding.
    let chunked = send_raw(
        &proxy_addr,
        b"PUT /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
    )
    .await;
    assert!(chunked.contains("X-Seen-Body: hello\r\n"));
    assert!(chunked.contains("X-Cache: miss\r\n"));

    // A body that cannot be decoded never reaches the origin.
    let calls_before = origin.calls();
    let bad = send_raw(
        &proxy_addr,
        b"GET /bad HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n",
    )
    .await;
    assert!(bad.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(!bad.contains("X-Cache"));
    assert_eq!(origin.calls(), calls_before);

    front.abort();
}

/// An origin that answers every connection with the same raw bytes.
async fn raw_origin(reply: &'static [u8]) -> (String, Arc<AtomicUsize>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let task = tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            let mut head = Vec::new();
            let mut chunk = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&chunk[..n]);
            }
            socket.write_all(reply).await.unwrap();
            socket.shutdown().await.unwrap();
        }
    });
    (addr, calls, task)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[tokio::test]
async fn chunked_origin_reply_is_replayed_with_content_length() {
    let (addr, calls, task) = raw_origin(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n\
          4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
    )
    .await;
    let proxy = CachingProxy::new(OriginClient::new(&addr));

    let first = proxy.handle(get("/wiki")).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(cache_status(&first), Some("miss"));
    assert_eq!(&first.content()[..], b"Wikipedia");

    let second = proxy.handle(get("/wiki")).await;
    assert_eq!(cache_status(&second), Some("hit"));
    assert_eq!(&second.content()[..], b"Wikipedia");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let wire = second.into_bytes();
    assert!(wire.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(contains(&wire, b"\r\nContent-Type: text/plain\r\n"));
    assert!(contains(&wire, b"\r\nContent-Length: 9\r\n"));
    assert!(!contains(&wire, b"Transfer-Encoding"));
    assert!(wire.ends_with(b"\r\n\r\nWikipedia"));

    task.abort();
}

#[tokio::test]
async fn latin1_header_values_are_replayed_byte_for_byte() {
    let (addr, calls, task) =
        raw_origin(b"HTTP/1.1 200 OK\r\nX-Name: caf\xe9\r\nContent-Length: 2\r\n\r\nok").await;
    let proxy = CachingProxy::new(OriginClient::new(&addr));

    let first = proxy.handle(get("/latin1")).await;
    assert_eq!(cache_status(&first), Some("miss"));
    assert_eq!(first.headers().get_raw("x-name"), Some(&b"caf\xe9"[..]));

    let second = proxy.handle(get("/latin1")).await;
    assert_eq!(cache_status(&second), Some("hit"));
    assert_eq!(second.headers().get_raw("x-name"), Some(&b"caf\xe9"[..]));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let wire = second.into_bytes();
    assert!(contains(&wire, b"\r\nX-Name: caf\xe9\r\n"));
    assert!(wire.ends_with(b"\r\n\r\nok"));

    task.abort();
}
