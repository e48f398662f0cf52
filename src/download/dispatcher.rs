//! 下载门面：按请求选择 HTTP 或 HLS 引擎，自身不做重试与合并。

use std::fmt;
use std::fs;

use tracing::{error, info, warn};

use super::hls_engine::HlsEngine;
use super::http_engine::HttpEngine;
use super::merger::SegmentMerger;
use super::models::{DownloadError, DownloadRequest};
use super::progress::ProgressSink;
use crate::base_system::context::DownloadConfig;

const FALLBACK_FILE_NAME: &str = "download";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Http,
    Hls,
}

impl EngineKind {
    pub fn select(req: &DownloadRequest) -> Self {
        if req.expected_kind.is_stream() || is_playlist_url(&req.url) {
            EngineKind::Hls
        } else {
            EngineKind::Http
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Http => f.write_str("http"),
            EngineKind::Hls => f.write_str("hls"),
        }
    }
}

fn url_path(url: &str) -> &str {
    let no_query = url.split(['?', '#']).next().unwrap_or(url);
    match no_query.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |i| &rest[i..]),
        None => no_query,
    }
}

fn is_playlist_url(url: &str) -> bool {
    let path = url_path(url).to_ascii_lowercase();
    path.ends_with(".m3u8") || path.ends_with(".m3u")
}

/// 取 URL 路径的最后一段作为文件名，没有时为 `download`。
pub fn default_file_name(url: &str) -> String {
    url_path(url)
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(FALLBACK_FILE_NAME)
        .to_string()
}

pub struct DownloadDispatcher {
    config: DownloadConfig,
    http: HttpEngine,
    hls: HlsEngine,
}

impl DownloadDispatcher {
    pub fn new(config: DownloadConfig) -> Self {
        let http = HttpEngine::new(&config);
        let hls = HlsEngine::new(&config);
        Self { config, http, hls }
    }

    /// 替换自动探测得到的分段合并器。
    pub fn with_hls_merger(mut self, merger: Box<dyn SegmentMerger>) -> Self {
        self.hls = HlsEngine::with_merger(&self.config, merger);
        self
    }

    pub fn dispatch(&self, req: &DownloadRequest, sink: Option<ProgressSink>) -> bool {
        if req.output_path.exists() && !self.config.overwrite_existing {
            error!(
                target: "dispatch",
                "{}",
                DownloadError::OutputExists(req.output_path.clone())
            );
            return false;
        }
        if let Some(parent) = req.output_path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = fs::create_dir_all(parent)
        {
            error!(target: "dispatch", "创建输出目录失败 {}: {e}", parent.display());
            return false;
        }

        let engine = EngineKind::select(req);
        info!(
            target: "dispatch",
            url = %req.url,
            engine = %engine,
            kind = %req.expected_kind,
            output = %req.output_path.display(),
            "开始下载"
        );
        match engine {
            EngineKind::Http => self.http.download(req, sink),
            EngineKind::Hls => self.hls.download(req, sink),
        }
    }

    /// 按顺序逐个下载；每个请求通过 `make_sink` 获取进度回调。
    pub fn dispatch_batch(
        &self,
        requests: &[DownloadRequest],
        mut make_sink: impl FnMut(&DownloadRequest) -> Option<ProgressSink>,
    ) -> Vec<(String, bool)> {
        let results: Vec<(String, bool)> = requests
            .iter()
            .map(|req| (req.url.clone(), self.dispatch(req, make_sink(req))))
            .collect();

        let ok = results.iter().filter(|(_, ok)| *ok).count();
        if ok == results.len() {
            info!(target: "dispatch", "批量下载完成: {ok}/{}", results.len());
        } else {
            warn!(target: "dispatch", "批量下载完成: {ok}/{} 成功", results.len());
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::merger::ConcatMerger;
    use crate::download::models::LinkKind;

    fn req(url: &str, kind: LinkKind) -> DownloadRequest {
        DownloadRequest::from_config(url, "out.bin", kind, &DownloadConfig::default())
    }

    #[test]
    fn stream_kind_routes_to_hls() {
        assert_eq!(EngineKind::select(&req("http://h/video", LinkKind::Stream)), EngineKind::Hls);
        assert_eq!(EngineKind::select(&req("http://h/video.mp4", LinkKind::Video)), EngineKind::Http);
        assert_eq!(EngineKind::select(&req("http://h/a.jpg", LinkKind::Image)), EngineKind::Http);
    }

    #[test]
    fn manifest_extension_routes_to_hls() {
        for url in [
            "http://h/live/index.m3u8",
            "http://h/live/INDEX.M3U8?token=1",
            "https://h/list.m3u#frag",
        ] {
            assert_eq!(EngineKind::select(&req(url, LinkKind::Other)), EngineKind::Hls, "{url}");
        }
        assert_eq!(
            EngineKind::select(&req("http://h/get?file=a.m3u8", LinkKind::Other)),
            EngineKind::Http
        );
    }

    #[test]
    fn file_name_from_url() {
        assert_eq!(default_file_name("https://cdn/x/movie.mp4?sig=1"), "movie.mp4");
        assert_eq!(default_file_name("https://cdn/x/"), "download");
        assert_eq!(default_file_name("https://cdn"), "download");
        assert_eq!(default_file_name("https://cdn/a/../"), "download");
    }

    #[test]
    fn existing_output_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("exists.bin");
        fs::write(&output, b"keep me").unwrap();

        let cfg = DownloadConfig::default();
        let mut r = req("http://127.0.0.1:9/file.bin", LinkKind::Other);
        r.output_path = output.clone();

        let dispatcher = DownloadDispatcher::new(cfg).with_hls_merger(Box::new(ConcatMerger));
        assert!(!dispatcher.dispatch(&r, None));
        assert_eq!(fs::read(&output).unwrap(), b"keep me");
    }
}
