use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use tracing::info;

use crate::analysis::{self, Analyzer, Provider, make_analyzer};
use crate::catalog::WorkCatalog;
use crate::catalog::openreview::{CatalogProvider, OpenReviewClient};
use crate::config::AppConfig;
use crate::core::types::{ProcessStats, WorkItem};
use crate::download::{self, Downloader};
use crate::ocr::supervisor::ExtractionSupervisor;

/// 一次流水线运行的选项（来自 CLI）
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub limit: Option<usize>,
    pub skip_download: bool,
    pub skip_ocr: bool,
    pub skip_analysis: bool,
    pub provider: Provider,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

/// 跑完整条流水线：下载 → 提取 → 分析
///
/// 每个阶段只看磁盘标记决定要不要做，阶段之间不传递本次运行的结果，
/// 所以任何时刻中断后重跑都会从断点继续。
pub async fn run(cfg: AppConfig, opts: PipelineOptions) -> Result<()> {
    // 目录建不起来属于配置级错误，直接终止
    fs::create_dir_all(&cfg.input_dir)
        .with_context(|| format!("创建输入目录失败: {}", cfg.input_dir.display()))?;
    fs::create_dir_all(&cfg.extracted_dir)
        .with_context(|| format!("创建输出目录失败: {}", cfg.extracted_dir.display()))?;

    let catalog = WorkCatalog::new(
        cfg.input_dir.clone(),
        cfg.extracted_dir.clone(),
        cfg.download.min_pdf_bytes,
    );

    if !opts.skip_download {
        info!("--- 第 1 步：下载论文 ---");
        let provider = OpenReviewClient::new(cfg.catalog.clone())?;
        let mut items = provider.list_accepted_items().await?;
        if let Some(n) = opts.limit {
            items.truncate(n);
        }

        let downloader = Downloader::new(cfg.download.clone(), cfg.input_dir.clone())?;
        let fetch = |item: WorkItem| {
            let downloader = &downloader;
            async move { downloader.fetch_item(&item).await }
        };
        let stats = download::run_rounds(
            items,
            cfg.download.concurrency,
            cfg.download.max_rounds,
            &cfg.failed_list,
            fetch,
        )
        .await?;
        info!(
            "下载完成: 成功 {}，已存在 {}，失败 {}",
            stats.success, stats.skipped, stats.failed
        );
    }

    let items = catalog.discover(opts.limit)?;
    if items.is_empty() {
        info!("没有可处理的论文");
        return Ok(());
    }

    // 分析器整次运行只初始化一次；初始化失败属于配置级错误
    let analyzer: Option<Box<dyn Analyzer>> = if opts.skip_analysis {
        None
    } else {
        info!("--- 第 3 步：准备分析器 ---");
        Some(make_analyzer(opts.provider, opts.model.clone(), opts.api_key.clone(), &cfg.analysis)?)
    };

    if !opts.skip_ocr {
        info!("--- 第 2 步：OCR 提取 ---");
    }
    let supervisor = ExtractionSupervisor::new(cfg.ocr.clone(), cfg.extracted_dir.clone());

    let pb = ProgressBar::new(items.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut ocr_stats = ProcessStats::default();
    let mut analysis_stats = ProcessStats::default();
    for item in &items {
        pb.set_message(item.file_stem().to_string());

        // 提取严格串行：引擎独占加速器，这里的"不并发"是正确性要求
        if !opts.skip_ocr {
            let result = supervisor.ensure_extracted(&catalog, item).await;
            ocr_stats.add_result(&result);
        }

        if let Some(analyzer) = &analyzer {
            let result =
                analysis::ensure_analyzed(&catalog, item, analyzer.as_ref(), &cfg.analysis).await;
            analysis_stats.add_result(&result);
        }

        pb.inc(1);
    }
    pb.finish_and_clear();

    if !opts.skip_ocr {
        info!(
            "提取汇总: 成功 {}，已存在 {}，失败 {}",
            ocr_stats.success, ocr_stats.exists, ocr_stats.failed
        );
    }
    if analyzer.is_some() {
        info!(
            "分析汇总: 成功 {}，已存在 {}，失败 {}",
            analysis_stats.success, analysis_stats.exists, analysis_stats.failed
        );
    }
    info!("🎉 流水线完成");
    Ok(())
}
