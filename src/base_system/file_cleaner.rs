//! 临时文件与缓存目录清理。

use std::fs;
use std::io;
use std::path::Path;

use tracing::warn;

pub fn is_empty_dir(path: impl AsRef<Path>) -> io::Result<bool> {
    let mut entries = fs::read_dir(path.as_ref())?;
    Ok(entries.next().is_none())
}

/// 尽力删除 `files`，目录清空后再删除 `dir`。
///
/// 返回实际删除的文件数。
pub fn remove_files_then_dir<P: AsRef<Path>>(files: &[P], dir: &Path) -> usize {
    let mut removed = 0;
    for file in files {
        let file = file.as_ref();
        match fs::remove_file(file) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(target: "merge", "清理临时文件失败 {}: {e}", file.display()),
        }
    }
    match is_empty_dir(dir) {
        Ok(true) => {
            if let Err(e) = fs::remove_dir(dir) {
                warn!(target: "merge", "清理临时目录失败 {}: {e}", dir.display());
            }
        }
        Ok(false) => warn!(target: "merge", "临时目录非空，保留: {}", dir.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(target: "merge", "读取临时目录失败 {}: {e}", dir.display()),
    }
    removed
}
