//! Local fixture HTTP server for the integration tests.
//!
//! Runs axum on its own tokio runtime in a background thread so the blocking
//! engines can talk to it from ordinary `#[test]` functions.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::Response;
use axum::routing::get;

/// Size of `big.bin`: above the chunking threshold.
pub const BIG_SIZE: usize = 3 * 1024 * 1024 + 777;
pub const SMALL_SIZE: usize = 1000;
pub const SEGMENTS: usize = 6;

/// Deterministic body for a named file.
pub fn file_bytes(name: &str) -> Vec<u8> {
    let len = if name.starts_with("big") { BIG_SIZE } else { SMALL_SIZE };
    (0..len).map(|i| (i % 251) as u8 ^ (i / 251) as u8).collect()
}

/// Body of segment `index`: a few TS packets worth of recognizable bytes.
pub fn segment_bytes(index: usize) -> Vec<u8> {
    (0..188 * (index + 3)).map(|i| (i + index * 7) as u8).collect()
}

/// Concatenation of segments `0..SEGMENTS` in order.
pub fn joined_segments() -> Vec<u8> {
    (0..SEGMENTS).flat_map(segment_bytes).collect()
}

#[derive(Default)]
struct FixtureState {
    hits: Mutex<HashMap<String, u32>>,
}

impl FixtureState {
    /// Record a request for `key` and return how many there have been so far.
    fn hit(&self, key: &str) -> u32 {
        let mut hits = self.hits.lock().unwrap();
        let n = hits.entry(key.to_string()).or_default();
        *n += 1;
        *n
    }
}

pub struct FixtureServer {
    base: String,
    state: Arc<FixtureState>,
}

impl FixtureServer {
    pub fn start() -> Self {
        let state = Arc::new(FixtureState::default());
        let app = router(state.clone());

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind fixture server");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let addr = listener.local_addr().unwrap();

        thread::Builder::new()
            .name("fixture-server".into())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()
                    .expect("fixture runtime");
                rt.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener)
                        .expect("tokio listener");
                    axum::serve(listener, app).await.unwrap();
                });
            })
            .expect("spawn fixture thread");

        Self {
            base: format!("http://{addr}"),
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    /// Requests seen for `key` (`"<METHOD> <path>"`, e.g. `"GET /hls/seg2.ts"`).
    pub fn hits(&self, key: &str) -> u32 {
        self.state.hits.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

fn router(state: Arc<FixtureState>) -> Router {
    Router::new()
        .route("/files/:name", get(ranged_file))
        .route("/norange/:name", get(plain_file))
        .route("/ignore-range/:name", get(ignore_range_file))
        .route("/nohead/:name", get(no_head_file))
        .route("/hls/:name", get(hls))
        .with_state(state)
}

fn full_response(body: Vec<u8>, accept_ranges: bool) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, body.len());
    if accept_ranges {
        builder = builder.header(header::ACCEPT_RANGES, "bytes");
    }
    builder.body(Body::from(body)).unwrap()
}

fn status(code: StatusCode) -> Response {
    Response::builder()
        .status(code)
        .header(header::CONTENT_LENGTH, 0)
        .body(Body::empty())
        .unwrap()
}

fn parse_range(headers: &HeaderMap, len: usize) -> Option<(usize, usize)> {
    let raw = headers.get(header::RANGE)?.to_str().ok()?;
    let (start, end) = raw.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.trim().parse().ok()?;
    let end: usize = match end.trim() {
        "" => len - 1,
        e => e.parse::<usize>().ok()?.min(len - 1),
    };
    (start <= end).then_some((start, end))
}

async fn ranged_file(
    State(st): State<Arc<FixtureState>>,
    Path(name): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    st.hit(&format!("{method} /files/{name}"));
    let body = file_bytes(&name);
    let Some((start, end)) = parse_range(&headers, body.len()) else {
        return full_response(body, true);
    };
    let total = body.len();
    let slice = body[start..=end].to_vec();
    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"))
        .header(header::CONTENT_LENGTH, slice.len())
        .body(Body::from(slice))
        .unwrap()
}

async fn plain_file(
    State(st): State<Arc<FixtureState>>,
    Path(name): Path<String>,
    method: Method,
) -> Response {
    st.hit(&format!("{method} /norange/{name}"));
    full_response(file_bytes(&name), false)
}

/// Advertises ranges but always answers with the whole body.
async fn ignore_range_file(
    State(st): State<Arc<FixtureState>>,
    Path(name): Path<String>,
    method: Method,
) -> Response {
    st.hit(&format!("{method} /ignore-range/{name}"));
    full_response(file_bytes(&name), true)
}

async fn no_head_file(
    State(st): State<Arc<FixtureState>>,
    Path(name): Path<String>,
    method: Method,
) -> Response {
    st.hit(&format!("{method} /nohead/{name}"));
    if method == Method::HEAD {
        return status(StatusCode::METHOD_NOT_ALLOWED);
    }
    full_response(file_bytes(&name), true)
}

fn playlist(uris: &[String]) -> String {
    let mut text = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n");
    for uri in uris {
        text.push_str("#EXTINF:4.0,\n");
        text.push_str(uri);
        text.push('\n');
    }
    text.push_str("#EXT-X-ENDLIST\n");
    text
}

/// Playlists:
/// - `index.m3u8`: `seg0.ts .. seg5.ts`, relative
/// - `flaky.m3u8`: segment 3 is `flaky3.ts`, failing twice before serving
/// - `broken.m3u8`: segment 3 is `missing.ts`, always 404
/// - `empty.m3u8`: tags only
async fn hls(State(st): State<Arc<FixtureState>>, Path(name): Path<String>, method: Method) -> Response {
    let count = st.hit(&format!("{method} /hls/{name}"));
    let uris = |special: Option<&str>| -> Vec<String> {
        (0..SEGMENTS)
            .map(|i| match special {
                Some(s) if i == 3 => s.to_string(),
                _ => format!("seg{i}.ts"),
            })
            .collect()
    };
    let text = match name.as_str() {
        "index.m3u8" => Some(playlist(&uris(None))),
        "flaky.m3u8" => Some(playlist(&uris(Some("flaky3.ts")))),
        "broken.m3u8" => Some(playlist(&uris(Some("missing.ts")))),
        "empty.m3u8" => Some("#EXTM3U\n#EXT-X-ENDLIST\n".to_string()),
        _ => None,
    };
    if let Some(text) = text {
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")
            .header(header::CONTENT_LENGTH, text.len())
            .body(Body::from(text))
            .unwrap();
    }

    if name == "missing.ts" {
        return status(StatusCode::NOT_FOUND);
    }
    if let Some(idx) = name.strip_prefix("flaky").and_then(|r| r.strip_suffix(".ts")) {
        if count <= 2 {
            return status(StatusCode::INTERNAL_SERVER_ERROR);
        }
        return full_response(segment_bytes(idx.parse().unwrap()), false);
    }
    match name
        .strip_prefix("seg")
        .and_then(|r| r.strip_suffix(".ts"))
        .and_then(|i| i.parse::<usize>().ok())
    {
        Some(i) => full_response(segment_bytes(i), false),
        None => status(StatusCode::NOT_FOUND),
    }
}
