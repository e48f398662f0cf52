//! HLS 分段并发下载工作池。
//!
//! 固定大小的线程池从任务通道取分段，每段最多尝试 `retry_times + 1` 次，间隔固定。
//! 单段失败不会取消其余任务：工作池总是跑完全部分段，失败集合因此是完整的。

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel as channel;
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use tracing::{debug, error, info, warn};

use super::progress::ProgressTracker;

/// 分段数据来源；工作池只关心完整的响应体。
pub trait SegmentSource: Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpSegmentSource<'a> {
    pub client: &'a Client,
    pub headers: &'a HeaderMap,
}

impl SegmentSource for HttpSegmentSource<'_> {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .context("send segment request")?
            .error_for_status()
            .context("segment status")?
            .bytes()
            .context("read segment body")?;
        Ok(bytes.to_vec())
    }
}

/// `segment_<NNNNNN>.ts`
pub fn segment_file_name(index: usize) -> String {
    format!("segment_{index:06}.ts")
}

#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub index: usize,
    pub url: String,
    pub dest: PathBuf,
}

impl SegmentJob {
    pub fn for_list(urls: &[String], dir: &Path) -> Vec<SegmentJob> {
        urls.iter()
            .enumerate()
            .map(|(index, url)| SegmentJob {
                index,
                url: url.clone(),
                dest: dir.join(segment_file_name(index)),
            })
            .collect()
    }
}

#[derive(Debug)]
enum SegmentEvent {
    Saved { index: usize, path: PathBuf },
    Failed { index: usize },
}

#[derive(Debug, Default)]
pub struct PoolReport {
    /// 按序号排序的 `(index, file)`。
    pub saved: Vec<(usize, PathBuf)>,
    pub failed: BTreeSet<usize>,
}

impl PoolReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn ordered_files(&self) -> Vec<PathBuf> {
        self.saved.iter().map(|(_, p)| p.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SegmentWorkerPool {
    pub parallelism: usize,
    pub retry_times: u32,
    pub retry_interval: Duration,
}

impl SegmentWorkerPool {
    pub fn worker_count(&self, segments: usize) -> usize {
        self.parallelism.min(segments).max(1)
    }

    /// 下载全部分段并汇报结果；阻塞到队列清空为止。
    pub fn run(
        &self,
        source: &dyn SegmentSource,
        jobs: Vec<SegmentJob>,
        tracker: &ProgressTracker,
    ) -> PoolReport {
        let workers = self.worker_count(jobs.len());
        let (tx, rx) = channel::unbounded::<SegmentJob>();
        for job in jobs {
            let _ = tx.send(job);
        }
        drop(tx);
        let (tx_evt, rx_evt) = channel::unbounded::<SegmentEvent>();

        thread::scope(|s| {
            let mut spawned = 0;
            for w in 0..workers {
                let rx = rx.clone();
                let tx_evt = tx_evt.clone();
                let spawn = thread::Builder::new()
                    .name(format!("segment-{w}"))
                    .spawn_scoped(s, move || {
                        for job in rx.iter() {
                            let _ = tx_evt.send(self.fetch_with_retry(source, &job, tracker));
                        }
                    });
                match spawn {
                    Ok(_) => spawned += 1,
                    Err(e) => warn!(target: "hls", "启动分段线程失败: {e}"),
                }
            }
            if spawned == 0 {
                for job in rx.iter() {
                    let _ = tx_evt.send(self.fetch_with_retry(source, &job, tracker));
                }
            }
        });
        drop(tx_evt);

        let mut report = PoolReport::default();
        for evt in rx_evt.try_iter() {
            match evt {
                SegmentEvent::Saved { index, path } => report.saved.push((index, path)),
                SegmentEvent::Failed { index } => {
                    report.failed.insert(index);
                }
            }
        }
        report.saved.sort_by_key(|(index, _)| *index);
        report
    }

    fn fetch_with_retry(
        &self,
        source: &dyn SegmentSource,
        job: &SegmentJob,
        tracker: &ProgressTracker,
    ) -> SegmentEvent {
        let attempts = self.retry_times.saturating_add(1);
        for attempt in 1..=attempts {
            let result = source.fetch(&job.url).and_then(|body| {
                fs::write(&job.dest, &body)
                    .with_context(|| format!("write {}", job.dest.display()))?;
                Ok(body.len() as u64)
            });
            match result {
                Ok(bytes) => {
                    tracker.add(bytes);
                    debug!(target: "hls", index = job.index, attempt, bytes, "分段完成");
                    return SegmentEvent::Saved {
                        index: job.index,
                        path: job.dest.clone(),
                    };
                }
                Err(e) if attempt < attempts => {
                    info!(
                        target: "hls",
                        "分段 {} 下载失败（第 {attempt}/{attempts} 次）: {e:#}，{:?} 后重试",
                        job.index,
                        self.retry_interval
                    );
                    thread::sleep(self.retry_interval);
                }
                Err(e) => {
                    error!(
                        target: "hls",
                        "分段 {} 重试 {attempts} 次后仍失败: {e:#}",
                        job.index
                    );
                }
            }
        }
        SegmentEvent::Failed { index: job.index }
    }
}
