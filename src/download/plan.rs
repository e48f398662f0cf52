//! 分块计划：根据探测结果与配置决定单线程或分块，并切分字节区间。

/// 不超过该大小的资源不分块。
pub const MIN_CHUNKED_SIZE: u64 = 1024 * 1024;

/// 单次下载并发 Range 请求的硬上限，与配置无关。
pub const MAX_CHUNKS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    SingleStream,
    Chunked(usize),
}

/// 资源中的一个闭区间 `[start, end]`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn byte_len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

pub fn decide(supports_range: bool, total_size: u64, configured_parallelism: usize) -> TransferMode {
    if supports_range && total_size > MIN_CHUNKED_SIZE && configured_parallelism > 1 {
        TransferMode::Chunked(configured_parallelism.min(MAX_CHUNKS))
    } else {
        TransferMode::SingleStream
    }
}

/// 把 `[0, total_size)` 切成 `chunks` 个连续区间，余数归最后一块，末块总是结束于 `total_size - 1`。
///
/// 块数多于字节数时每块一个字节；大小为 0 时不产生分块。
pub fn plan_chunks(total_size: u64, chunks: usize) -> Vec<ChunkRange> {
    if total_size == 0 {
        return Vec::new();
    }
    let n = (chunks.max(1) as u64).min(total_size);
    let step = total_size / n;

    (0..n)
        .map(|i| ChunkRange {
            index: i as usize,
            start: i * step,
            end: if i + 1 == n {
                total_size - 1
            } else {
                (i + 1) * step - 1
            },
        })
        .collect()
}
