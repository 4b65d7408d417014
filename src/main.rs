use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use paper_pipeline::analysis::Provider;
use paper_pipeline::config::AppConfig;
use paper_pipeline::logger;
use paper_pipeline::workflow::pipeline::{self, PipelineOptions};

/// 自动论文阅读流水线：下载 → OCR 提取 → 模型分析
#[derive(Parser)]
#[command(name = "paper_pipeline", version)]
struct Cli {
    /// 最多处理的论文数
    #[arg(long)]
    limit: Option<usize>,

    /// 跳过下载阶段
    #[arg(long)]
    skip_download: bool,

    /// 跳过 OCR 提取阶段
    #[arg(long)]
    skip_ocr: bool,

    /// 跳过分析阶段
    #[arg(long)]
    skip_analysis: bool,

    /// 分析提供方
    #[arg(long, value_enum, default_value = "local")]
    provider: Provider,

    /// 分析所用模型，缺省按提供方取默认值
    #[arg(long)]
    model: Option<String>,

    /// 在线提供方的 API 密钥
    #[arg(long, env = "OPENAI_API_KEY")]
    api_key: Option<String>,

    /// 配置文件路径，默认 config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    let cli = Cli::parse();

    let cfg = AppConfig::load(cli.config.as_deref())?;
    let opts = PipelineOptions {
        limit: cli.limit,
        skip_download: cli.skip_download,
        skip_ocr: cli.skip_ocr,
        skip_analysis: cli.skip_analysis,
        provider: cli.provider,
        model: cli.model,
        api_key: cli.api_key,
    };

    pipeline::run(cfg, opts).await
}
