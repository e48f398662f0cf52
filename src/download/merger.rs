//! 分段合并：优先调用外部 ffmpeg（concat demuxer），不可用或失败时退回按字节拼接。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use super::chunk;

/// 把按序号排列的分段文件合并为一个输出文件。
///
/// 实现方不删除输入文件，清理由调用方负责。
pub trait SegmentMerger: Send + Sync {
    fn name(&self) -> &'static str;

    fn merge(&self, files: &[PathBuf], output: &Path) -> bool;
}

/// 按字节直接拼接，MPEG-TS 可以这样合并。
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcatMerger;

impl SegmentMerger for ConcatMerger {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn merge(&self, files: &[PathBuf], output: &Path) -> bool {
        match chunk::concat_files(output, files, false) {
            Ok(bytes) => {
                debug!(target: "merge", segments = files.len(), bytes, "字节拼接完成");
                true
            }
            Err(e) => {
                warn!(target: "merge", "字节拼接失败: {e:#}");
                false
            }
        }
    }
}

/// `ffmpeg -f concat -safe 0 -i <list> -c copy -y <output>`
#[derive(Debug, Clone)]
pub struct FfmpegMerger(PathBuf);

impl FfmpegMerger {
    /// 在 `PATH` 中查找 `ffmpeg`。
    pub fn new() -> Result<Self> {
        let path = which::which("ffmpeg").context("ffmpeg not found on PATH")?;
        Ok(FfmpegMerger(path))
    }

    pub fn program(&self) -> &Path {
        &self.0
    }

    fn run(&self, files: &[PathBuf], output: &Path) -> Result<()> {
        let list_dir = files
            .first()
            .and_then(|f| f.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let mut list = tempfile::Builder::new()
            .prefix("concat_")
            .suffix(".txt")
            .tempfile_in(&list_dir)
            .context("create concat list")?;
        list.write_all(concat_list(files)?.as_bytes())
            .context("write concat list")?;
        list.flush()?;

        let out = Command::new(&self.0)
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(list.path())
            .args(["-c", "copy", "-y"])
            .arg(output)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawn {}", self.0.display()))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            bail!("ffmpeg 退出码 {}: {}", out.status, stderr.trim());
        }
        Ok(())
    }
}

impl SegmentMerger for FfmpegMerger {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn merge(&self, files: &[PathBuf], output: &Path) -> bool {
        match self.run(files, output) {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "merge", "ffmpeg 合并失败: {e:#}");
                false
            }
        }
    }
}

/// 先用 `primary`，失败后改用 `fallback`。
pub struct FallbackMerger {
    primary: Box<dyn SegmentMerger>,
    fallback: Box<dyn SegmentMerger>,
}

impl FallbackMerger {
    pub fn new(primary: Box<dyn SegmentMerger>, fallback: Box<dyn SegmentMerger>) -> Self {
        Self { primary, fallback }
    }
}

impl SegmentMerger for FallbackMerger {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    fn merge(&self, files: &[PathBuf], output: &Path) -> bool {
        if self.primary.merge(files, output) {
            return true;
        }
        info!(
            target: "merge",
            "{} 合并失败，改用 {}",
            self.primary.name(),
            self.fallback.name()
        );
        self.fallback.merge(files, output)
    }
}

/// 装有 ffmpeg 时使用 ffmpeg 并以字节拼接兜底，否则直接字节拼接。
pub fn select_merger() -> Box<dyn SegmentMerger> {
    match FfmpegMerger::new() {
        Ok(ffmpeg) => {
            debug!(target: "merge", program = %ffmpeg.program().display(), "检测到 ffmpeg");
            Box::new(FallbackMerger::new(Box::new(ffmpeg), Box::new(ConcatMerger)))
        }
        Err(_) => {
            info!(target: "merge", "未检测到 ffmpeg，使用字节拼接合并分段");
            Box::new(ConcatMerger)
        }
    }
}

/// 每个分段一行 `file '<绝对路径>'`，单引号按 concat demuxer 规则转义。
fn concat_list(files: &[PathBuf]) -> Result<String> {
    let mut list = String::new();
    for file in files {
        let abs = std::path::absolute(file)
            .with_context(|| format!("resolve {}", file.display()))?;
        let escaped = abs.to_string_lossy().replace('\'', r"'\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    Ok(list)
}
