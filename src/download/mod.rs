//! 下载引擎模块入口。
//!
//! 子模块：
//! - `models`        — 下载请求、链接类型、进度样本、失败分类
//! - `progress`      — 单次下载的进度聚合与 CLI 进度条
//! - `client`        — 阻塞 HTTP 客户端与请求头转换
//! - `probe`         — HEAD 探测 Range 支持与资源大小
//! - `plan`          — 单线程 / 分块决策与字节区间切分
//! - `chunk`         — 分块下载单元与分块合并
//! - `http_engine`   — 普通资源下载编排
//! - `playlist`      — HLS 媒体播放列表解析
//! - `segment_pool`  — HLS 分段并发下载工作池
//! - `merger`        — 分段合并（ffmpeg / 字节拼接）
//! - `hls_engine`    — HLS 下载编排
//! - `dispatcher`    — 引擎选择门面

pub mod chunk;
pub mod client;
pub mod dispatcher;
pub mod hls_engine;
pub mod http_engine;
pub mod merger;
pub mod models;
pub mod plan;
pub mod playlist;
pub mod probe;
pub mod progress;
pub mod segment_pool;

pub use dispatcher::{DownloadDispatcher, EngineKind, default_file_name};
pub use models::{DownloadRequest, LinkKind, ProgressSample};
pub use progress::{ConsoleProgress, ProgressSink};
