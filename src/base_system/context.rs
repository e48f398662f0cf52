//! 下载配置结构（DownloadConfig）与默认值。
//!
//! 该模块同时提供生成 `downloader.yml` 的字段元信息。

use std::collections::BTreeMap;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};
use crate::download::models::merge_headers;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    // 路径配置
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default)]
    pub cache_dir: String,

    // 网络配置
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,

    // 代理配置
    #[serde(default)]
    pub proxy_enabled: bool,
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,

    // 文件管理配置
    #[serde(default)]
    pub overwrite_existing: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            cache_dir: String::new(),
            max_parallelism: default_max_parallelism(),
            retry_times: default_retry_times(),
            retry_interval_ms: default_retry_interval_ms(),
            timeout_seconds: default_timeout_seconds(),
            headers: default_headers(),
            proxy_enabled: false,
            http_proxy: String::new(),
            https_proxy: String::new(),
            overwrite_existing: false,
        }
    }
}

impl ConfigSpec for DownloadConfig {
    const FILE_NAME: &'static str = "downloader.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 11] = [
            FieldMeta {
                name: "output_dir",
                description: "未指定输出路径时的默认保存目录",
            },
            FieldMeta {
                name: "cache_dir",
                description: "HLS 分段缓存目录（留空使用系统临时目录）",
            },
            FieldMeta {
                name: "max_parallelism",
                description: "最大并发数（分块下载上限为 8）",
            },
            FieldMeta {
                name: "retry_times",
                description: "HLS 分段失败后的重试次数",
            },
            FieldMeta {
                name: "retry_interval_ms",
                description: "重试间隔（毫秒）",
            },
            FieldMeta {
                name: "timeout_seconds",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "headers",
                description: "默认请求头（请求自带的同名头部优先）",
            },
            FieldMeta {
                name: "proxy_enabled",
                description: "是否启用代理",
            },
            FieldMeta {
                name: "http_proxy",
                description: "HTTP 代理地址",
            },
            FieldMeta {
                name: "https_proxy",
                description: "HTTPS 代理地址（留空沿用 http_proxy）",
            },
            FieldMeta {
                name: "overwrite_existing",
                description: "输出文件已存在时是否覆盖",
            },
        ];
        &FIELDS
    }

    fn normalized(mut self) -> Self {
        if self.max_parallelism == 0 {
            self.max_parallelism = default_max_parallelism();
        }
        if self.retry_interval_ms == 0 {
            self.retry_interval_ms = default_retry_interval_ms();
        }
        if self.timeout_seconds == 0 {
            self.timeout_seconds = default_timeout_seconds();
        }
        self.headers = fold_header_case(std::mem::take(&mut self.headers));
        self
    }
}

impl DownloadConfig {
    /// HLS 分段缓存目录的父目录。
    pub fn cache_root(&self) -> PathBuf {
        let trimmed = self.cache_dir.trim();
        if trimmed.is_empty() {
            std::env::temp_dir().join("media-downloader")
        } else {
            PathBuf::from(trimmed)
        }
    }

    pub fn default_output_dir(&self) -> PathBuf {
        PathBuf::from(self.output_dir.trim())
    }

    /// `(http, https)` 代理地址；未启用或未填写时为 `None`。
    pub fn proxies(&self) -> Option<(Option<String>, Option<String>)> {
        if !self.proxy_enabled {
            return None;
        }
        let http = Some(self.http_proxy.trim().to_string()).filter(|s| !s.is_empty());
        let https = Some(self.https_proxy.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| http.clone());
        if http.is_none() && https.is_none() {
            return None;
        }
        Some((http, https))
    }
}

fn default_output_dir() -> String {
    "./downloads".to_string()
}

fn default_max_parallelism() -> usize {
    4
}

fn default_retry_times() -> u32 {
    3
}

fn default_retry_interval_ms() -> u64 {
    3000
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string())])
}

/// 配置合并后内置头与用户头可能只差大小写（如 `USER-AGENT`），此时保留用户值。
fn fold_header_case(headers: BTreeMap<String, String>) -> BTreeMap<String, String> {
    let builtin = default_headers();
    let (defaults, user): (BTreeMap<_, _>, BTreeMap<_, _>) = headers
        .into_iter()
        .partition(|(k, v)| builtin.get(k) == Some(v));
    merge_headers(&defaults, &user)
}
