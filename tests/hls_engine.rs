mod common;

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use common::{FixtureServer, SEGMENTS, joined_segments};
use media_downloader::base_system::context::DownloadConfig;
use media_downloader::download::hls_engine::HlsEngine;
use media_downloader::download::merger::ConcatMerger;
use media_downloader::download::{DownloadRequest, LinkKind, ProgressSample, ProgressSink};

fn config(cache: &Path) -> DownloadConfig {
    DownloadConfig {
        max_parallelism: 3,
        retry_times: 2,
        retry_interval_ms: 20,
        timeout_seconds: 10,
        cache_dir: cache.to_string_lossy().into_owned(),
        ..Default::default()
    }
}

fn engine(cfg: &DownloadConfig) -> HlsEngine {
    HlsEngine::with_merger(cfg, Box::new(ConcatMerger))
}

fn segment_dirs(cache: &Path) -> Vec<std::path::PathBuf> {
    match fs::read_dir(cache) {
        Ok(entries) => entries
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with("m3u8_"))
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn segments_are_merged_in_playlist_order_and_cleaned_up() {
    let server = FixtureServer::start();
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    let cfg = config(&cache);
    let output = dir.path().join("video.ts");
    let req = DownloadRequest::from_config(server.url("hls/index.m3u8"), &output, LinkKind::Stream, &cfg);

    assert!(engine(&cfg).download(&req, None));

    assert_eq!(fs::read(&output).unwrap(), joined_segments());
    assert!(segment_dirs(&cache).is_empty());
    for i in 0..SEGMENTS {
        assert_eq!(server.hits(&format!("GET /hls/seg{i}.ts")), 1);
    }
}

#[test]
fn segment_succeeding_on_third_attempt_counts() {
    let server = FixtureServer::start();
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    let cfg = config(&cache);
    let output = dir.path().join("flaky.ts");
    let req = DownloadRequest::from_config(server.url("hls/flaky.m3u8"), &output, LinkKind::Stream, &cfg);

    assert!(engine(&cfg).download(&req, None));

    assert_eq!(server.hits("GET /hls/flaky3.ts"), 3);
    assert_eq!(fs::read(&output).unwrap(), joined_segments());
}

#[test]
fn exhausted_segment_fails_without_output() {
    let server = FixtureServer::start();
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    let cfg = config(&cache);
    let output = dir.path().join("broken.ts");
    let req = DownloadRequest::from_config(server.url("hls/broken.m3u8"), &output, LinkKind::Stream, &cfg);

    assert!(!engine(&cfg).download(&req, None));

    assert!(!output.exists());
    assert_eq!(server.hits("GET /hls/missing.ts"), 3);
    // The pool drained: every other segment was fetched and is kept on disk.
    for i in (0..SEGMENTS).filter(|&i| i != 3) {
        assert_eq!(server.hits(&format!("GET /hls/seg{i}.ts")), 1);
    }
    let dirs = segment_dirs(&cache);
    assert_eq!(dirs.len(), 1);
    assert_eq!(fs::read_dir(&dirs[0]).unwrap().count(), SEGMENTS - 1);
}

#[test]
fn empty_playlist_fails() {
    let server = FixtureServer::start();
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir.path().join("cache"));
    let output = dir.path().join("empty.ts");
    let req = DownloadRequest::from_config(server.url("hls/empty.m3u8"), &output, LinkKind::Stream, &cfg);

    assert!(!engine(&cfg).download(&req, None));
    assert!(!output.exists());
}

#[test]
fn playlist_fetch_failure_fails() {
    let server = FixtureServer::start();
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir.path().join("cache"));
    let output = dir.path().join("nope.ts");
    let req = DownloadRequest::from_config(server.url("hls/nope.m3u8"), &output, LinkKind::Stream, &cfg);

    assert!(!engine(&cfg).download(&req, None));
    assert!(!output.exists());
}

#[test]
fn segment_progress_is_cumulative() {
    let server = FixtureServer::start();
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir.path().join("cache"));
    let output = dir.path().join("progress.ts");
    let req = DownloadRequest::from_config(server.url("hls/flaky.m3u8"), &output, LinkKind::Stream, &cfg);
    let samples: Arc<Mutex<Vec<ProgressSample>>> = Arc::default();
    let sink_samples = samples.clone();
    let sink: ProgressSink = Box::new(move |s| sink_samples.lock().unwrap().push(s));

    assert!(engine(&cfg).download(&req, Some(sink)));

    let samples = samples.lock().unwrap();
    for pair in samples.windows(2) {
        assert!(pair[0].downloaded_bytes <= pair[1].downloaded_bytes);
    }
    assert_eq!(
        samples.last().unwrap().downloaded_bytes,
        joined_segments().len() as u64
    );
}
