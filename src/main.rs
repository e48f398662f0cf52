//! media-downloader 命令行入口。
//!
//! 单个 URL 或 `--batch` 批量文件，交给 `DownloadDispatcher` 选择 HTTP / HLS 引擎。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};

use media_downloader::base_system::config::{load_or_create, load_or_create_with_base};
use media_downloader::base_system::context::DownloadConfig;
use media_downloader::base_system::logging::{LogOptions, LogSystem};
use media_downloader::download::{
    ConsoleProgress, DownloadDispatcher, DownloadRequest, EngineKind, LinkKind, ProgressSink,
    default_file_name,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 命令行 `--kind` 与批量条目共用的默认链接类型。
const DEFAULT_KIND: &str = "video";

fn default_kind() -> LinkKind {
    DEFAULT_KIND.parse().unwrap_or_default()
}

#[derive(Debug, Parser)]
#[command(name = "media-downloader", version)]
#[command(about = "Parallel HTTP / HLS media downloader")]
struct Cli {
    /// 要下载的资源地址
    #[arg(required_unless_present = "batch")]
    url: Option<String>,

    /// 输出文件路径（默认：配置中的 output_dir + URL 文件名）
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 链接类型：video / stream / image / subtitle / metadata / other
    #[arg(long, default_value = DEFAULT_KIND)]
    kind: LinkKind,

    /// 配置文件路径
    #[arg(long)]
    config: Option<PathBuf>,

    /// 数据目录路径（用于存放 downloader.yml 和 logs）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 批量下载：JSON 数组文件，每项 {url, output?, kind?, headers?}
    #[arg(long, conflicts_with = "url")]
    batch: Option<PathBuf>,

    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 不显示进度条
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

#[derive(Debug, Deserialize)]
struct BatchEntry {
    url: String,
    #[serde(default)]
    output: Option<PathBuf>,
    #[serde(default = "default_kind")]
    kind: LinkKind,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.as_deref();

    let log = match init_logging(cli.debug, data_dir) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("初始化日志失败: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    info!(target: "startup", "media-downloader v{VERSION}");

    let ok = match run(&cli, data_dir) {
        Ok(ok) => ok,
        Err(e) => {
            error!(target: "startup", "{e:#}");
            false
        }
    };
    log.safe_exit();

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run(cli: &Cli, data_dir: Option<&Path>) -> Result<bool> {
    let config = if data_dir.is_some() {
        load_or_create_with_base::<DownloadConfig>(cli.config.as_deref(), data_dir)
    } else {
        load_or_create::<DownloadConfig>(cli.config.as_deref())
    }
    .map_err(|e| anyhow!(e))?;

    let requests = match (&cli.batch, &cli.url) {
        (Some(path), _) => load_batch(path, &config)?,
        (None, Some(url)) => vec![build_request(
            url,
            cli.output.clone(),
            cli.kind,
            &BTreeMap::new(),
            &config,
        )],
        (None, None) => bail!("未指定下载地址"),
    };

    let dispatcher = DownloadDispatcher::new(config);
    let quiet = cli.quiet;
    let mut bars: Vec<ConsoleProgress> = Vec::new();
    let results = dispatcher.dispatch_batch(&requests, |req| -> Option<ProgressSink> {
        if quiet {
            return None;
        }
        if let Some(prev) = bars.last() {
            prev.finish();
        }
        let bar = ConsoleProgress::new(&default_file_name(&req.url));
        let sink = bar.sink();
        bars.push(bar);
        Some(sink)
    });
    if let Some(last) = bars.last() {
        last.finish();
    }

    for (url, ok) in &results {
        if !ok {
            error!(target: "startup", "下载失败: {url}");
        }
    }
    Ok(results.iter().all(|(_, ok)| *ok))
}

fn load_batch(path: &Path, config: &DownloadConfig) -> Result<Vec<DownloadRequest>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read batch file {}", path.display()))?;
    let entries: Vec<BatchEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("parse batch file {}", path.display()))?;
    if entries.is_empty() {
        bail!("批量文件 {} 中没有任何条目", path.display());
    }
    Ok(entries
        .into_iter()
        .map(|e| {
            build_request(
                &e.url,
                e.output,
                e.kind,
                &e.headers,
                config,
            )
        })
        .collect())
}

/// 未指定输出路径时自动生成；HLS 下载默认输出为同名 `.ts` 文件。
fn build_request(
    url: &str,
    output: Option<PathBuf>,
    kind: LinkKind,
    headers: &BTreeMap<String, String>,
    config: &DownloadConfig,
) -> DownloadRequest {
    let explicit = output.is_some();
    let output = output.unwrap_or_else(|| config.default_output_dir().join(default_file_name(url)));
    let mut req = DownloadRequest::from_config(url, output, kind, config).with_headers(headers);
    if !explicit && EngineKind::select(&req) == EngineKind::Hls {
        req.output_path.set_extension("ts");
    }
    req
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
        console: true,
    };
    LogSystem::init_with_base(opts, base_dir).map_err(|e| anyhow!(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_entry_kind_matches_cli_default() {
        let cli = Cli::try_parse_from(["media-downloader", "http://h/a.mp4"]).unwrap();
        let entry: BatchEntry = serde_json::from_str(r#"{"url": "http://h/a.mp4"}"#).unwrap();
        assert_eq!(entry.kind, cli.kind);
        assert_eq!(entry.kind, LinkKind::Video);
    }

    #[test]
    fn batch_entry_kind_can_be_overridden() {
        let entry: BatchEntry =
            serde_json::from_str(r#"{"url": "http://h/a.jpg", "kind": "cover"}"#).unwrap();
        assert_eq!(entry.kind, LinkKind::Image);
    }

    #[test]
    fn batch_video_without_kind_is_chunk_eligible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        fs::write(&path, r#"[{"url": "http://h/movie.mp4"}]"#).unwrap();
        let cfg = DownloadConfig::default();

        let reqs = load_batch(&path, &cfg).unwrap();
        assert_eq!(reqs.len(), 1);
        assert!(reqs[0].expected_kind.is_video());
        assert!(reqs[0].output_path.ends_with("movie.mp4"));
    }

    #[test]
    fn derived_playlist_output_uses_ts() {
        let cfg = DownloadConfig::default();
        let req = build_request("http://h/live/index.m3u8", None, LinkKind::Stream, &BTreeMap::new(), &cfg);
        assert!(req.output_path.ends_with("index.ts"));
    }
}
