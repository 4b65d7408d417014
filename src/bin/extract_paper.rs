use anyhow::{Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use paper_pipeline::catalog::WorkCatalog;
use paper_pipeline::config::AppConfig;
use paper_pipeline::core::types::{ProcessResult, WorkItem};
use paper_pipeline::logger;
use paper_pipeline::ocr::supervisor::ExtractionSupervisor;

/// 单篇论文的受监督提取；成功退出 0，任何失败退出 1
#[derive(Parser)]
#[command(name = "extract_paper", version)]
struct Cli {
    /// 源 PDF 路径
    pdf_path: PathBuf,

    /// 提取输出根目录
    output_dir: PathBuf,

    /// 配置文件路径，默认 config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

async fn run(cli: Cli) -> Result<ProcessResult> {
    let cfg = AppConfig::load(cli.config.as_deref())?;

    let item = WorkItem::from_local_pdf(&cli.pdf_path)
        .ok_or_else(|| anyhow!("无法解析 PDF 文件名: {}", cli.pdf_path.display()))?;
    let input_dir = cli
        .pdf_path
        .parent()
        .ok_or_else(|| anyhow!("无法确定 PDF 所在目录: {}", cli.pdf_path.display()))?
        .to_path_buf();

    let catalog = WorkCatalog::new(input_dir, cli.output_dir.clone(), cfg.download.min_pdf_bytes);
    let supervisor = ExtractionSupervisor::new(cfg.ocr, cli.output_dir);
    Ok(supervisor.ensure_extracted(&catalog, &item).await)
}

#[tokio::main]
async fn main() -> ExitCode {
    logger::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(ProcessResult::Success) | Ok(ProcessResult::AlreadyExists) => ExitCode::SUCCESS,
        Ok(ProcessResult::Failed) => ExitCode::from(1),
        Err(e) => {
            tracing::error!("提取失败: {:#}", e);
            ExitCode::from(1)
        }
    }
}
