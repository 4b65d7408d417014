use std::process::ExitCode;
use tracing::error;

use paper_pipeline::config::AppConfig;
use paper_pipeline::logger;
use paper_pipeline::ocr::supervisor::{check_entry_script, run_forever};

/// 无人值守的整批提取守护：引擎崩溃就重启，退出码 0 才收工
#[tokio::main]
async fn main() -> ExitCode {
    logger::init();

    let cfg = match AppConfig::load(None) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("加载配置失败: {:#}", e);
            return ExitCode::from(1);
        }
    };

    // 必须在项目根目录运行，保证引擎入口可达
    if let Err(e) = check_entry_script(&cfg.ocr) {
        error!("{:#}", e);
        return ExitCode::from(1);
    }

    match run_forever(&cfg.ocr).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("守护循环异常终止: {:#}", e);
            ExitCode::from(1)
        }
    }
}
