//! 普通 HTTP 资源下载：探测 → 计划 →（单线程 | N 个分块）→ 合并。

use std::fmt;
use std::fs;
use std::path::Path;
use std::thread;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use tracing::{debug, error, info};

use super::chunk::{self, ChunkResult};
use super::client::{ClientOptions, build_client, to_header_map};
use super::models::{DownloadError, DownloadRequest};
use super::plan::{self, TransferMode};
use super::probe;
use super::progress::{ProgressSink, ProgressTracker, format_bytes};
use crate::base_system::context::DownloadConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HttpState {
    ProbingCapability,
    SingleStreamTransfer,
    ChunkedTransfer,
    Merging,
    Done,
}

impl fmt::Display for HttpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpState::ProbingCapability => "probing",
            HttpState::SingleStreamTransfer => "single-stream",
            HttpState::ChunkedTransfer => "chunked",
            HttpState::Merging => "merging",
            HttpState::Done => "done",
        };
        f.write_str(s)
    }
}

fn enter(url: &str, state: HttpState) {
    debug!(target: "http", url, state = %state, "状态切换");
}

pub struct HttpEngine {
    http_proxy: Option<String>,
    https_proxy: Option<String>,
}

impl HttpEngine {
    pub fn new(config: &DownloadConfig) -> Self {
        let (http_proxy, https_proxy) = config.proxies().unwrap_or_default();
        Self {
            http_proxy,
            https_proxy,
        }
    }

    /// 下载 `req.url` 到 `req.output_path`；所有失败都记录日志并返回 `false`。
    pub fn download(&self, req: &DownloadRequest, sink: Option<ProgressSink>) -> bool {
        match self.run(req, sink) {
            Ok(()) => true,
            Err(e) => {
                error!(target: "http", url = %req.url, "下载失败: {e:#}");
                false
            }
        }
    }

    fn run(&self, req: &DownloadRequest, sink: Option<ProgressSink>) -> Result<()> {
        let client = build_client(&ClientOptions {
            timeout: req.timeout(),
            http_proxy: self.http_proxy.clone(),
            https_proxy: self.https_proxy.clone(),
        })?;
        let headers = to_header_map(&req.headers);
        if let Some(parent) = req.output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }

        enter(&req.url, HttpState::ProbingCapability);
        let info = probe::probe(&client, &req.url, headers.clone());
        // 只有视频才分块；封面、字幕等小文件一律单线程。
        let mode = if req.expected_kind.is_video() {
            plan::decide(info.supports_range, info.total_size, req.max_parallelism)
        } else {
            TransferMode::SingleStream
        };

        let tracker = ProgressTracker::new(0, sink);
        match mode {
            TransferMode::SingleStream => {
                enter(&req.url, HttpState::SingleStreamTransfer);
                single_stream(&client, req, headers, &tracker)?;
            }
            TransferMode::Chunked(n) => {
                enter(&req.url, HttpState::ChunkedTransfer);
                info!(
                    target: "http",
                    url = %req.url,
                    chunks = n,
                    size = %format_bytes(info.total_size),
                    "使用分块下载"
                );
                chunked(&client, req, &headers, info.total_size, n, &tracker)?;
            }
        }

        enter(&req.url, HttpState::Done);
        info!(
            target: "http",
            output = %req.output_path.display(),
            bytes = tracker.downloaded(),
            elapsed_ms = tracker.elapsed().as_millis() as u64,
            "下载完成"
        );
        Ok(())
    }
}

fn single_stream(
    client: &Client,
    req: &DownloadRequest,
    headers: HeaderMap,
    tracker: &ProgressTracker,
) -> Result<()> {
    let resp = client
        .get(&req.url)
        .headers(headers)
        .send()
        .context("send request")?
        .error_for_status()
        .context("response status")?;

    let total = resp
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);

    tracker.start(total);
    chunk::stream_to_file(resp, &req.output_path, &mut |n| tracker.add(n))?;
    Ok(())
}

fn chunked(
    client: &Client,
    req: &DownloadRequest,
    headers: &HeaderMap,
    total: u64,
    chunks: usize,
    tracker: &ProgressTracker,
) -> Result<()> {
    let ranges = plan::plan_chunks(total, chunks);
    let output: &Path = &req.output_path;
    tracker.start(total);

    let results: Vec<ChunkResult> = thread::scope(|s| -> Result<Vec<ChunkResult>> {
        let mut handles = Vec::with_capacity(ranges.len());
        for range in &ranges {
            let dest = chunk::part_path(output, range.index);
            let handle = thread::Builder::new()
                .name(format!("chunk-{}", range.index))
                .spawn_scoped(s, move || {
                    chunk::fetch_chunk(client, &req.url, headers, range, &dest, |n| {
                        tracker.add(n)
                    })
                })
                .context("spawn chunk worker")?;
            handles.push((range.index, handle));
        }

        Ok(handles
            .into_iter()
            .map(|(index, h)| {
                h.join().unwrap_or(ChunkResult {
                    index,
                    ok: false,
                    bytes_written: 0,
                })
            })
            .collect())
    })?;

    // 不做部分挽救：任一分块失败即整体失败，分块文件留在磁盘上。
    if let Some(bad) = results.iter().find(|r| !r.ok) {
        return Err(anyhow!(DownloadError::ChunkFailed { index: bad.index }));
    }

    enter(&req.url, HttpState::Merging);
    if !chunk::merge_parts(output, ranges.len()) {
        return Err(anyhow!(DownloadError::MergeFailed(output.to_path_buf())));
    }
    tracker.finish();
    Ok(())
}
