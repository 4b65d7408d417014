use anyhow::{Context, Result, anyhow};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::future::Future;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::DownloadConfig;
use crate::core::types::{DownloadOutcome, WorkItem};

/// 值得自动重试的状态码；其余 4xx/5xx 直接判为本次失败
const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

/// 传输级失败，区分是否值得在本条目内继续重试
enum FetchError {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

impl FetchError {
    fn into_inner(self) -> anyhow::Error {
        match self {
            FetchError::Retryable(e) | FetchError::Fatal(e) => e,
        }
    }
}

/// 单篇论文的下载器：抖动 + 指数退避重试 + 半成品清理
pub struct Downloader {
    http: reqwest::Client,
    cfg: DownloadConfig,
    input_dir: PathBuf,
}

impl Downloader {
    pub fn new(cfg: DownloadConfig, input_dir: PathBuf) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("构建 HTTP 客户端失败")?;
        Ok(Self { http, cfg, input_dir })
    }

    /// 确保条目的 PDF 落盘；已有合法文件时跳过，损坏文件删除重下
    pub async fn fetch_item(&self, item: &WorkItem) -> DownloadOutcome {
        // 随机延迟，避免一批 worker 同时打到源站
        if self.cfg.jitter_max_ms > 0 {
            let jitter = fastrand::u64(self.cfg.jitter_min_ms..=self.cfg.jitter_max_ms);
            sleep(Duration::from_millis(jitter)).await;
        }

        let dest = item.pdf_path(&self.input_dir);
        match fs::metadata(&dest) {
            Ok(meta) if meta.len() > self.cfg.min_pdf_bytes => {
                debug!("已存在，跳过: {}", item.pdf_file_name());
                return DownloadOutcome::Skipped;
            }
            Ok(_) => {
                // 上次运行留下的损坏文件
                if let Err(e) = fs::remove_file(&dest) {
                    return DownloadOutcome::Error {
                        message: format!("删除损坏文件失败: {}", e),
                    };
                }
                debug!("删除损坏文件后重新下载: {}", item.pdf_file_name());
            }
            Err(_) => {}
        }

        if item.pdf_urls.is_empty() {
            return DownloadOutcome::Error { message: "没有可用的下载地址".to_string() };
        }

        let mut last_err = anyhow!("没有可用的下载地址");
        for url in &item.pdf_urls {
            match self.fetch_url(url, &dest).await {
                Ok(()) => return DownloadOutcome::Success,
                Err(e) => {
                    debug!("地址 {} 下载失败: {:#}", url, e);
                    last_err = e;
                }
            }
        }
        DownloadOutcome::Error { message: format!("{:#}", last_err) }
    }

    /// 单个地址的传输级重试：429/5xx 与连接错误按 1s,2s,4s... 退避
    async fn fetch_url(&self, url: &str, dest: &Path) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.download_once(url, dest).await {
                Ok(()) => return Ok(()),
                Err(FetchError::Retryable(e)) if attempt < self.cfg.max_attempts => {
                    let backoff = Duration::from_secs(1u64 << (attempt - 1));
                    warn!(
                        "第 {}/{} 次下载失败 ({:#})，{} 秒后重试",
                        attempt,
                        self.cfg.max_attempts,
                        e,
                        backoff.as_secs()
                    );
                    sleep(backoff).await;
                }
                Err(e) => return Err(e.into_inner()),
            }
        }
    }

    async fn download_once(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Retryable(anyhow!("请求失败: {}", e)))?;

        let status = resp.status();
        if RETRYABLE_STATUS.contains(&status.as_u16()) {
            return Err(FetchError::Retryable(anyhow!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::Fatal(anyhow!("HTTP {}", status)));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| FetchError::Fatal(anyhow!("创建文件失败: {}", e)))?;

        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    // 网络中途断开：目录里不允许留下半成品
                    drop(file);
                    let _ = tokio::fs::remove_file(dest).await;
                    return Err(FetchError::Retryable(anyhow!("下载中断: {}", e)));
                }
            };
            if let Err(e) = file.write_all(&bytes).await {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                return Err(FetchError::Fatal(anyhow!("写入文件失败: {}", e)));
            }
        }
        file.flush()
            .await
            .map_err(|e| FetchError::Fatal(anyhow!("落盘失败: {}", e)))?;
        Ok(())
    }
}

#[derive(Default, Debug, Clone, Copy)]
pub struct DownloadStats {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// 跑一轮批量下载，返回统计和本轮失败的条目
pub async fn process_round<F, Fut>(
    items: Vec<WorkItem>,
    concurrency: usize,
    fetch: F,
) -> (DownloadStats, Vec<WorkItem>)
where
    F: Fn(WorkItem) -> Fut,
    Fut: Future<Output = DownloadOutcome>,
{
    let pb = ProgressBar::new(items.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let (stats, failures) = stream::iter(items.into_iter().map(|item| {
        let fut = fetch(item.clone());
        async move {
            let outcome = fut.await;
            (item, outcome)
        }
    }))
    .buffer_unordered(concurrency.max(1))
    .fold(
        (DownloadStats::default(), Vec::new()),
        |(mut stats, mut failures), (item, outcome)| {
            pb.inc(1);
            match outcome {
                DownloadOutcome::Success => stats.success += 1,
                DownloadOutcome::Skipped => stats.skipped += 1,
                DownloadOutcome::Error { message } => {
                    warn!("❌ 下载失败: {} - {}", item.title, message);
                    stats.failed += 1;
                    failures.push(item);
                }
            }
            futures::future::ready((stats, failures))
        },
    )
    .await;

    pb.finish_and_clear();
    (stats, failures)
}

/// 多轮批量下载：每一轮只处理上一轮的失败，最终失败写入清单文件
pub async fn run_rounds<F, Fut>(
    items: Vec<WorkItem>,
    concurrency: usize,
    max_rounds: usize,
    ledger_path: &Path,
    fetch: F,
) -> Result<DownloadStats>
where
    F: Fn(WorkItem) -> Fut,
    Fut: Future<Output = DownloadOutcome>,
{
    let mut total = DownloadStats::default();
    let mut current = items;

    for round in 1..=max_rounds {
        if current.is_empty() {
            break;
        }
        if round > 1 {
            info!("--- 第 {}/{} 轮重试，共 {} 篇 ---", round, max_rounds, current.len());
        } else {
            info!("开始下载 {} 篇论文...", current.len());
        }

        let (stats, failures) = process_round(std::mem::take(&mut current), concurrency, &fetch).await;
        total.success += stats.success;
        total.skipped += stats.skipped;
        current = failures;
    }

    total.failed = current.len();
    if current.is_empty() {
        info!("✅ 全部论文下载完成");
    } else {
        warn!("⚠️ {} 篇论文在所有重试后仍然失败", current.len());
        write_failure_ledger(ledger_path, &current)?;
        info!("失败清单已写入 {}", ledger_path.display());
    }
    Ok(total)
}

/// 失败清单：每行 `<id> - <标题>`，下次运行时这些文件不在磁盘上会被自动重试
pub fn write_failure_ledger(path: &Path, failures: &[WorkItem]) -> Result<()> {
    let mut file = fs::File::create(path)
        .with_context(|| format!("写入失败清单失败: {}", path.display()))?;
    for item in failures {
        writeln!(file, "{} - {}", item.id, item.title)
            .with_context(|| format!("写入失败清单失败: {}", path.display()))?;
    }
    Ok(())
}
