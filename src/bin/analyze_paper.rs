use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use paper_pipeline::analysis::content::PaperContent;
use paper_pipeline::analysis::{Provider, make_analyzer, save_report};
use paper_pipeline::config::AppConfig;
use paper_pipeline::logger;

/// 对一篇已提取的论文单独跑分析
#[derive(Parser)]
#[command(name = "analyze_paper", version)]
struct Cli {
    /// 该论文的提取输出目录
    extracted_folder: PathBuf,

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

    if !cli.extracted_folder.is_dir() {
        bail!("目录不存在: {}", cli.extracted_folder.display());
    }

    let cfg = AppConfig::load(cli.config.as_deref())?;
    let content = PaperContent::load(&cli.extracted_folder, &cfg.analysis)?;
    let analyzer = make_analyzer(cli.provider, cli.model, cli.api_key, &cfg.analysis)?;

    let report = analyzer.analyze(&content).await?;
    if report.trim().is_empty() {
        bail!("模型返回空报告");
    }
    save_report(&cli.extracted_folder, &report)?;
    info!("✅ 分析报告已保存到 {}", cli.extracted_folder.display());
    Ok(())
}
