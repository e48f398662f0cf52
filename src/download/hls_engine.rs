//! HLS 下载：拉取播放列表 → 分段工作池 → 合并 → 清理临时分段。

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::client::{ClientOptions, build_client, to_header_map};
use super::merger::{SegmentMerger, select_merger};
use super::models::{DownloadError, DownloadRequest};
use super::playlist;
use super::progress::{ProgressSink, ProgressTracker, format_bytes};
use super::segment_pool::{HttpSegmentSource, SegmentJob, SegmentWorkerPool};
use crate::base_system::context::DownloadConfig;
use crate::base_system::file_cleaner;

pub struct HlsEngine {
    http_proxy: Option<String>,
    https_proxy: Option<String>,
    merger: Box<dyn SegmentMerger>,
}

impl HlsEngine {
    /// 合并器根据是否检测到 ffmpeg 自动选择。
    pub fn new(config: &DownloadConfig) -> Self {
        Self::with_merger(config, select_merger())
    }

    pub fn with_merger(config: &DownloadConfig, merger: Box<dyn SegmentMerger>) -> Self {
        let (http_proxy, https_proxy) = config.proxies().unwrap_or_default();
        Self {
            http_proxy,
            https_proxy,
            merger,
        }
    }

    pub fn merger_name(&self) -> &'static str {
        self.merger.name()
    }

    pub fn download(&self, req: &DownloadRequest, sink: Option<ProgressSink>) -> bool {
        match self.run(req, sink) {
            Ok(()) => true,
            Err(e) => {
                error!(target: "hls", url = %req.url, "HLS 下载失败: {e:#}");
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

        let text = playlist::fetch_playlist(&client, &req.url, headers.clone())?;
        let segments = playlist::parse(&text, &playlist::base_url(&req.url));
        if segments.is_empty() {
            return Err(anyhow!(DownloadError::EmptyPlaylist(req.url.clone())));
        }
        info!(target: "hls", url = %req.url, segments = segments.len(), "解析到分段");

        let work_dir = segment_dir(req);
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("create segment dir {}", work_dir.display()))?;
        debug!(target: "hls", dir = %work_dir.display(), "分段缓存目录");

        let tracker = ProgressTracker::new(0, sink);
        tracker.start(0);
        let pool = SegmentWorkerPool {
            parallelism: req.max_parallelism,
            retry_times: req.retry_times,
            retry_interval: req.retry_interval(),
        };
        let source = HttpSegmentSource {
            client: &client,
            headers: &headers,
        };
        let report = pool.run(&source, SegmentJob::for_list(&segments, &work_dir), &tracker);

        // 已下载的分段留在 `work_dir` 中以便排查。
        if !report.is_complete() {
            let indices: Vec<usize> = report.failed.iter().copied().collect();
            return Err(anyhow!(DownloadError::SegmentsFailed {
                failed: indices.len(),
                total: segments.len(),
                indices,
            }));
        }

        if let Some(parent) = req.output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }
        let files = report.ordered_files();
        if !self.merger.merge(&files, &req.output_path) {
            return Err(anyhow!(DownloadError::MergeFailed(req.output_path.clone())));
        }
        file_cleaner::remove_files_then_dir(&files, &work_dir);
        tracker.finish();

        info!(
            target: "hls",
            output = %req.output_path.display(),
            merger = self.merger.name(),
            size = %format_bytes(tracker.downloaded()),
            elapsed_ms = tracker.elapsed().as_millis() as u64,
            "HLS 下载完成"
        );
        Ok(())
    }
}

/// `<cache_dir>/m3u8_<uuid>`，每次下载唯一。
fn segment_dir(req: &DownloadRequest) -> PathBuf {
    req.cache_dir
        .join(format!("m3u8_{}", Uuid::new_v4().simple()))
}
