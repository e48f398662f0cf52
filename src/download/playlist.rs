//! HLS 媒体播放列表：拉取与解析为有序的分段绝对地址。
//!
//! 只处理媒体播放列表；多码率主播放列表的选择发生在上游。

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;

/// 分段绝对地址，顺序与播放列表中出现的顺序一致。
pub type SegmentList = Vec<String>;

/// `playlist_url` 截至最后一个 `/`（含）的部分。
pub fn base_url(playlist_url: &str) -> String {
    let without_query = playlist_url.split(['?', '#']).next().unwrap_or(playlist_url);
    match without_query.rfind('/') {
        Some(i) => without_query[..=i].to_string(),
        None => String::new(),
    }
}

fn has_scheme(uri: &str) -> bool {
    let Some((scheme, _)) = uri.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// 跳过空行与 `#` 行；带协议头的 URI 原样保留，其余直接拼接到 `base_url` 后。
///
/// 只做字符串拼接，不解析 `../x.ts` 或 `/x.ts` 这类相对引用。
pub fn parse(text: &str, base_url: &str) -> SegmentList {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|uri| {
            if has_scheme(uri) {
                uri.to_string()
            } else {
                format!("{base_url}{uri}")
            }
        })
        .collect()
}

pub fn fetch_playlist(client: &Client, url: &str, headers: HeaderMap) -> Result<String> {
    client
        .get(url)
        .headers(headers)
        .send()
        .with_context(|| format!("request playlist {url}"))?
        .error_for_status()
        .context("playlist status")?
        .text()
        .context("read playlist body")
}
