//! 进度聚合与 CLI 进度条。
//!
//! 每次下载一个 `ProgressTracker`：所有 worker 的字节计数与速度计算都串行在同一把锁后面，
//! 回调也在锁内调用，保证发出的 `downloaded_bytes` 单调不减。

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::models::ProgressSample;

/// 进度回调。在 worker 线程上、持有聚合锁时调用，必须尽快返回。
pub type ProgressSink = Box<dyn FnMut(ProgressSample) + Send>;

struct TrackerState {
    total: u64,
    downloaded: u64,
    started: Instant,
    sink: Option<ProgressSink>,
}

pub struct ProgressTracker {
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new(total: u64, sink: Option<ProgressSink>) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                total,
                downloaded: 0,
                started: Instant::now(),
                sink,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 重置计时并发出 `(total, 0, 0)`。
    pub fn start(&self, total: u64) {
        let mut st = self.lock();
        st.total = total;
        st.downloaded = 0;
        st.started = Instant::now();
        let sample = ProgressSample::new(total, 0, 0.0);
        emit(&mut st, sample);
    }

    /// 累计 `delta` 字节，按开始以来的平均速度发出样本。
    pub fn add(&self, delta: u64) {
        let mut st = self.lock();
        st.downloaded = st.downloaded.saturating_add(delta);
        let speed = speed_since(st.started, st.downloaded);
        let sample = ProgressSample::new(st.total, st.downloaded, speed);
        emit(&mut st, sample);
    }

    /// 发出收尾样本：计数补齐，速度归零。
    pub fn finish(&self) {
        let mut st = self.lock();
        if st.total > 0 {
            st.downloaded = st.downloaded.max(st.total);
        }
        let sample = ProgressSample::new(st.total, st.downloaded, 0.0);
        emit(&mut st, sample);
    }

    pub fn downloaded(&self) -> u64 {
        self.lock().downloaded
    }

    pub fn elapsed(&self) -> Duration {
        self.lock().started.elapsed()
    }
}

fn emit(st: &mut TrackerState, sample: ProgressSample) {
    if let Some(sink) = st.sink.as_mut() {
        sink(sample);
    }
}

fn speed_since(started: Instant, downloaded: u64) -> f64 {
    let secs = started.elapsed().as_secs_f64();
    if secs > 0.0 {
        downloaded as f64 / secs
    } else {
        0.0
    }
}

pub fn format_bytes(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

/// 由 [`ProgressSink`] 驱动的终端进度条。
///
/// 首次收到带总大小的样本时由旋转指示切换为进度条。
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new(label: &str) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout());
        bar.set_style(spinner_style());
        bar.set_prefix(label.to_string());
        Self { bar }
    }

    pub fn sink(&self) -> ProgressSink {
        let bar = self.bar.clone();
        let mut sized = false;
        Box::new(move |sample: ProgressSample| {
            if sample.total_bytes > 0 {
                if !sized {
                    bar.set_style(bar_style());
                    sized = true;
                }
                bar.set_length(sample.total_bytes);
            }
            bar.set_position(sample.downloaded_bytes);
            bar.set_message(format!(
                "{}/s",
                format_bytes(sample.bytes_per_second as u64)
            ));
        })
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix} [{elapsed_precise}] {wide_bar} {bytes}/{total_bytes} {msg} ({eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("##-")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {prefix} [{elapsed_precise}] {bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn collecting_sink() -> (ProgressSink, Arc<Mutex<Vec<ProgressSample>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&seen);
        let sink: ProgressSink = Box::new(move |s| out.lock().unwrap().push(s));
        (sink, seen)
    }

    #[test]
    fn concurrent_adds_are_monotonic() {
        let (sink, seen) = collecting_sink();
        let tracker = ProgressTracker::new(0, Some(sink));
        tracker.start(8 * 1000);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        tracker.add(10);
                    }
                });
            }
        });
        tracker.finish();

        let samples = seen.lock().unwrap();
        assert_eq!(samples.len(), 1 + 800 + 1);
        assert!(
            samples
                .windows(2)
                .all(|w| w[0].downloaded_bytes <= w[1].downloaded_bytes)
        );
        assert_eq!(tracker.downloaded(), 8000);
        let last = samples.last().unwrap();
        assert_eq!(last.downloaded_bytes, 8000);
        assert_eq!(last.bytes_per_second, 0.0);
    }

    #[test]
    fn tracker_without_sink_still_counts() {
        let tracker = ProgressTracker::new(0, None);
        tracker.add(5);
        tracker.add(7);
        assert_eq!(tracker.downloaded(), 12);
    }

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512.0 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.0 MB");
    }
}
