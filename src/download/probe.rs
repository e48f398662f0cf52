//! 能力探测：HEAD 请求获取 Range 支持与文件大小。
//!
//! 探测是尽力而为的：任何失败都退化为 `(false, 0)`，由调用方走单线程下载。

use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeInfo {
    pub supports_range: bool,
    pub total_size: u64,
    pub content_type: Option<String>,
}

impl ProbeInfo {
    pub fn unsupported() -> Self {
        Self::default()
    }
}

/// 发送一次 `HEAD`，读取 `Accept-Ranges` / `Content-Length`；不会返回错误。
pub fn probe(client: &Client, url: &str, headers: HeaderMap) -> ProbeInfo {
    let resp = client
        .head(url)
        .headers(headers)
        .send()
        .and_then(Response::error_for_status);
    match resp {
        Ok(resp) => {
            let info = from_headers(resp.headers());
            debug!(
                target: "probe",
                url,
                supports_range = info.supports_range,
                total_size = info.total_size,
                content_type = info.content_type.as_deref().unwrap_or(""),
                "能力探测完成"
            );
            info
        }
        Err(e) => {
            warn!(target: "probe", url, "能力探测失败，回退单线程下载: {e}");
            ProbeInfo::unsupported()
        }
    }
}

pub fn from_headers(headers: &HeaderMap) -> ProbeInfo {
    let text = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };

    let supports_range = text(ACCEPT_RANGES).is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
    // 直接读响应头：HEAD 没有响应体，body 长度提示恒为 0。
    let total_size = text(CONTENT_LENGTH)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let content_type = text(CONTENT_TYPE)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    ProbeInfo {
        supports_range,
        total_size,
        content_type,
    }
}
