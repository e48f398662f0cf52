//! 基础设施：配置、日志、临时文件清理。

pub mod config;
pub mod context;
pub mod file_cleaner;
pub mod logging;
