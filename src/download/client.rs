//! 阻塞 HTTP 客户端构建与请求头转换。

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Proxy;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT_ENCODING, CONNECTION, HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

/// 单次下载使用的客户端参数。
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
}

pub fn build_client(opts: &ClientOptions) -> Result<Client> {
    // 禁用压缩，保证字节数与 `Range` 区间一致。
    let mut defaults = HeaderMap::new();
    defaults.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    defaults.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    let mut builder = Client::builder()
        .default_headers(defaults)
        .connect_timeout(opts.timeout)
        .timeout(opts.timeout);

    if let Some(url) = opts.http_proxy.as_deref() {
        builder = builder.proxy(Proxy::http(url).with_context(|| format!("http proxy {url}"))?);
    }
    if let Some(url) = opts.https_proxy.as_deref() {
        builder =
            builder.proxy(Proxy::https(url).with_context(|| format!("https proxy {url}"))?);
    }

    builder.build().context("build http client")
}

/// 转换为 `HeaderMap`，跳过不合法的头部名或值。
pub fn to_header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let parsed = (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        );
        match parsed {
            (Ok(n), Ok(v)) => {
                map.insert(n, v);
            }
            _ => warn!(target: "http", "忽略无效请求头: {name}"),
        }
    }
    map
}
