//! 下载相关的数据模型定义。
//!
//! 包含下载请求、链接类型、进度样本，以及引擎边界上的失败分类。

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::base_system::context::DownloadConfig;

/// 调用方预期的链接类型。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Video,
    Stream,
    #[serde(alias = "cover", alias = "thumbnail")]
    Image,
    Subtitle,
    Metadata,
    #[default]
    #[serde(alias = "torrent")]
    Other,
}

impl LinkKind {
    pub fn is_video(self) -> bool {
        self == LinkKind::Video
    }

    pub fn is_stream(self) -> bool {
        self == LinkKind::Stream
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LinkKind::Video => "video file",
            LinkKind::Stream => "stream",
            LinkKind::Image => "image",
            LinkKind::Subtitle => "subtitle",
            LinkKind::Metadata => "metadata file",
            LinkKind::Other => "other file",
        };
        f.write_str(text)
    }
}

impl std::str::FromStr for LinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_ascii_lowercase()))
            .map_err(|_| format!("unknown link kind: {s}"))
    }
}

/// 一次完整确定的下载请求；由调用方构建，之后只读。
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub output_path: PathBuf,
    pub headers: BTreeMap<String, String>,
    pub expected_kind: LinkKind,
    pub retry_times: u32,
    pub retry_interval_ms: u64,
    pub timeout_seconds: u64,
    pub max_parallelism: usize,
    pub cache_dir: PathBuf,
}

impl DownloadRequest {
    /// 从 `config` 填充并发、重试、超时参数与默认请求头。
    pub fn from_config(
        url: impl Into<String>,
        output_path: impl Into<PathBuf>,
        expected_kind: LinkKind,
        config: &DownloadConfig,
    ) -> Self {
        Self {
            url: url.into(),
            output_path: output_path.into(),
            headers: config.headers.clone(),
            expected_kind,
            retry_times: config.retry_times,
            retry_interval_ms: config.retry_interval_ms,
            timeout_seconds: config.timeout_seconds,
            max_parallelism: config.max_parallelism,
            cache_dir: config.cache_root(),
        }
    }

    /// 把请求自带的头部叠加到已有默认头部之上。
    pub fn with_headers(mut self, custom: &BTreeMap<String, String>) -> Self {
        self.headers = merge_headers(&self.headers, custom);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// 先取默认头部，再叠加 `custom`；仅大小写不同的同名头部以 `custom` 为准。
pub fn merge_headers(
    defaults: &BTreeMap<String, String>,
    custom: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = defaults
        .iter()
        .filter(|(k, _)| !custom.keys().any(|c| c.eq_ignore_ascii_case(k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (k, v) in custom {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// 某一时刻的进度样本；`total_bytes == 0` 表示总大小未知。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProgressSample {
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub bytes_per_second: f64,
}

impl ProgressSample {
    pub fn new(total_bytes: u64, downloaded_bytes: u64, bytes_per_second: f64) -> Self {
        let downloaded_bytes = if total_bytes > 0 {
            downloaded_bytes.min(total_bytes)
        } else {
            downloaded_bytes
        };
        let bytes_per_second = if bytes_per_second.is_finite() {
            bytes_per_second.max(0.0)
        } else {
            0.0
        };
        Self {
            total_bytes,
            downloaded_bytes,
            bytes_per_second,
        }
    }

    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0
    }

    /// 预计剩余时间；速度或大小未知时为 `None`。
    pub fn remaining(&self) -> Option<Duration> {
        if self.total_bytes == 0 || self.bytes_per_second <= 0.0 {
            return None;
        }
        let left = self.total_bytes.saturating_sub(self.downloaded_bytes) as f64;
        Some(Duration::from_secs_f64(left / self.bytes_per_second))
    }
}

/// 引擎内部的失败分类；不会越过 `dispatch`，在那里记录日志并转换为 `false`。
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("output already exists: {0}")]
    OutputExists(PathBuf),
    #[error("chunk {index} failed")]
    ChunkFailed { index: usize },
    #[error("merging parts into {0} failed")]
    MergeFailed(PathBuf),
    #[error("playlist has no segments: {0}")]
    EmptyPlaylist(String),
    #[error("{failed} of {total} segments failed: {indices:?}")]
    SegmentsFailed {
        failed: usize,
        total: usize,
        indices: Vec<usize>,
    },
}
