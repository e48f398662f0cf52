//! 并行下载引擎：HTTP 分块下载与 HLS 分段下载。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/临时文件清理等基础设施
//! - `download`：探测、分块、分段、合并与引擎选择

pub mod base_system;
pub mod download;

pub use base_system::context::DownloadConfig;
pub use download::{DownloadDispatcher, DownloadRequest, LinkKind};
