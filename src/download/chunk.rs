//! 分块下载单元与分块合并。
//!
//! 每个分块只请求一次、不做重试：任何一块失败即整个分块下载失败。

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, RANGE};
use tracing::{debug, error, warn};

use super::plan::ChunkRange;

pub const BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkResult {
    pub index: usize,
    pub ok: bool,
    pub bytes_written: u64,
}

/// `<output>.part<N>`
pub fn part_path(output: &Path, index: usize) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(format!(".part{index}"));
    PathBuf::from(name)
}

/// 下载一个字节区间到 `dest`，每写入一个缓冲区都通过 `on_bytes` 上报；只尝试一次。
pub fn fetch_chunk(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    range: &ChunkRange,
    dest: &Path,
    on_bytes: impl FnMut(u64),
) -> ChunkResult {
    match try_fetch_chunk(client, url, headers, range, dest, on_bytes) {
        Ok(bytes_written) => {
            debug!(target: "http", index = range.index, bytes_written, "分块完成");
            ChunkResult {
                index: range.index,
                ok: true,
                bytes_written,
            }
        }
        Err(e) => {
            error!(target: "http", index = range.index, "下载块失败: {e:#}");
            ChunkResult {
                index: range.index,
                ok: false,
                bytes_written: 0,
            }
        }
    }
}

fn try_fetch_chunk(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    range: &ChunkRange,
    dest: &Path,
    mut on_bytes: impl FnMut(u64),
) -> Result<u64> {
    let mut headers = headers.clone();
    headers.insert(RANGE, HeaderValue::from_str(&range.header_value())?);

    let resp = client
        .get(url)
        .headers(headers)
        .send()
        .with_context(|| format!("request chunk {}", range.index))?
        .error_for_status()
        .with_context(|| format!("chunk {} status", range.index))?;
    // 返回 200 说明服务端忽略了 Range，发来的是完整内容。
    if resp.status() != StatusCode::PARTIAL_CONTENT {
        bail!(
            "分块 {} 期望 206 Partial Content，实际为 {}",
            range.index,
            resp.status()
        );
    }

    let written = stream_to_file(resp, dest, &mut on_bytes)?;
    if written != range.byte_len() {
        bail!(
            "分块 {} 数据不完整：应为 {} 字节，实际 {written}",
            range.index,
            range.byte_len()
        );
    }
    Ok(written)
}

/// 以 `BUFFER_SIZE` 为步长把 `reader` 写入新建的 `dest`。
pub(crate) fn stream_to_file(
    mut reader: impl Read,
    dest: &Path,
    on_bytes: &mut impl FnMut(u64),
) -> Result<u64> {
    let mut file = File::create(dest).with_context(|| format!("create {}", dest.display()))?;
    let mut buf = [0u8; BUFFER_SIZE];
    let mut written = 0u64;
    loop {
        let n = reader.read(&mut buf).context("read response body")?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .with_context(|| format!("write {}", dest.display()))?;
        written += n as u64;
        on_bytes(n as u64);
    }
    file.flush()?;
    Ok(written)
}

/// 按切片顺序把 `parts` 追加到新建的 `dest`。
///
/// 创建 `dest` 前先确认所有分块都存在；`delete_parts` 为真时每块拷贝完立即删除。
pub(crate) fn concat_files(dest: &Path, parts: &[PathBuf], delete_parts: bool) -> Result<u64> {
    if let Some(missing) = parts.iter().find(|p| !p.is_file()) {
        bail!("缺少分块文件 {}", missing.display());
    }

    let mut out = BufWriter::new(
        File::create(dest).with_context(|| format!("create {}", dest.display()))?,
    );
    let mut total = 0u64;
    for part in parts {
        let mut input = File::open(part).with_context(|| format!("open {}", part.display()))?;
        total += io::copy(&mut input, &mut out)
            .with_context(|| format!("append {}", part.display()))?;
        if delete_parts && let Err(e) = fs::remove_file(part) {
            warn!(target: "merge", "删除分块失败 {}: {e}", part.display());
        }
    }
    out.flush()
        .with_context(|| format!("flush {}", dest.display()))?;
    Ok(total)
}

/// 把 `<output>.part0 .. .part<count-1>` 合并为 `output`；缺少任一分块时返回 `false` 且不创建 `output`。
pub fn merge_parts(output: &Path, count: usize) -> bool {
    let parts: Vec<PathBuf> = (0..count).map(|i| part_path(output, i)).collect();
    match concat_files(output, &parts, true) {
        Ok(bytes) => {
            debug!(target: "merge", parts = count, bytes, "分块合并完成");
            true
        }
        Err(e) => {
            error!(target: "merge", "合并文件块失败: {e:#}");
            false
        }
    }
}
