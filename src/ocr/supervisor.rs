use anyhow::{Context, Result, anyhow, bail};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::catalog::{EXTRACT_MARKER, WorkCatalog};
use crate::config::OcrConfig;
use crate::core::types::{ProcessResult, Stage, StageStatus, WorkItem};

/// 提取引擎一次运行的结局
enum EngineExit {
    /// 退出码为 0
    Clean,
    /// 非零退出，附带诊断输出
    Crashed { code: Option<i32>, stdout: String, stderr: String },
    /// 超过硬超时，进程已被强制终止
    TimedOut,
}

/// 提取阶段的监督者
///
/// 引擎内部故障（如加速器异常）会带崩整个宿主进程，所以每篇论文都放进
/// 独立子进程运行，并施加墙钟超时。任何失败都会整目录删除该篇的输出，
/// 保证磁盘上不会出现"有目录、标记却不可信"的状态。
pub struct ExtractionSupervisor {
    cfg: OcrConfig,
    extracted_root: PathBuf,
}

impl ExtractionSupervisor {
    pub fn new(cfg: OcrConfig, extracted_root: PathBuf) -> Self {
        Self { cfg, extracted_root }
    }

    /// 确保一篇论文完成提取；已有标记时直接跳过
    ///
    /// 引擎崩溃、超时或启动失败都只影响当前条目，调用方可以继续处理下一篇。
    pub async fn ensure_extracted(
        &self,
        catalog: &WorkCatalog,
        item: &WorkItem,
    ) -> ProcessResult {
        if catalog.stage_status(item, Stage::Extract) == StageStatus::Complete {
            debug!("已提取，跳过: {}", item.file_stem());
            return ProcessResult::AlreadyExists;
        }

        let pdf_path = item.pdf_path(&catalog.input_dir);
        info!("开始提取: {}", item.file_stem());

        match self.run_isolated(&pdf_path).await {
            Ok(EngineExit::Clean) => {
                // 退出码为 0 还不够，必须确认标记文件非空
                if catalog.stage_status(item, Stage::Extract) == StageStatus::Complete {
                    info!("✅ 提取完成: {}", item.file_stem());
                    ProcessResult::Success
                } else {
                    warn!("引擎正常退出但未生成标记 {}: {}", EXTRACT_MARKER, item.file_stem());
                    self.cleanup_item(item);
                    ProcessResult::Failed
                }
            }
            Ok(EngineExit::Crashed { code, stdout, stderr }) => {
                warn!("❌ 提取失败 (退出码 {:?}): {}", code, item.file_stem());
                debug!("引擎 stdout: {}", stdout);
                debug!("引擎 stderr: {}", stderr);
                self.cleanup_item(item);
                ProcessResult::Failed
            }
            Ok(EngineExit::TimedOut) => {
                warn!("⏰ 提取超时 ({} 秒): {}", self.cfg.timeout_secs, item.file_stem());
                self.cleanup_item(item);
                ProcessResult::Failed
            }
            Err(e) => {
                warn!("❌ 启动提取引擎失败: {}: {:#}", item.file_stem(), e);
                self.cleanup_item(item);
                ProcessResult::Failed
            }
        }
    }

    /// 在独立子进程里运行引擎，带硬超时；超时后进程随 future 丢弃被杀掉
    async fn run_isolated(&self, pdf_path: &Path) -> Result<EngineExit> {
        let (program, args) = self
            .cfg
            .command
            .split_first()
            .ok_or_else(|| anyhow!("提取引擎命令为空"))?;

        let child = Command::new(program)
            .args(args)
            .arg(pdf_path)
            .arg(&self.extracted_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("启动提取引擎失败: {}", program))?;

        let wait = child.wait_with_output();
        match timeout(Duration::from_secs(self.cfg.timeout_secs), wait).await {
            Ok(Ok(output)) => {
                if output.status.success() {
                    Ok(EngineExit::Clean)
                } else {
                    Ok(EngineExit::Crashed {
                        code: output.status.code(),
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    })
                }
            }
            Ok(Err(e)) => Err(anyhow!("等待提取引擎退出失败: {}", e)),
            Err(_) => Ok(EngineExit::TimedOut),
        }
    }

    /// 整目录删除该条目的提取输出，失败的运行不允许留下任何东西
    fn cleanup_item(&self, item: &WorkItem) {
        let dir = item.extracted_dir(&self.extracted_root);
        if dir.exists() {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => info!("已清理部分输出: {}", dir.display()),
                Err(e) => warn!("清理部分输出失败 {}: {}", dir.display(), e),
            }
        }
    }
}

/// 常驻守护模式：引擎批量入口崩溃就等待几秒后重新拉起，退出码 0 才停止
///
/// 用于无人值守的整批提取，牺牲单篇隔离换取"崩多少次都能跑完"。
pub async fn run_forever(cfg: &OcrConfig) -> Result<()> {
    let (program, args) = cfg
        .command
        .split_first()
        .ok_or_else(|| anyhow!("提取引擎命令为空"))?;

    loop {
        info!("🚀 启动提取引擎...");
        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .with_context(|| format!("启动提取引擎失败: {}", program))?;

        if status.success() {
            info!("✅ 提取引擎正常结束");
            return Ok(());
        }
        warn!(
            "引擎异常退出 (退出码 {:?})，{} 秒后重启...",
            status.code(),
            cfg.restart_delay_secs
        );
        sleep(Duration::from_secs(cfg.restart_delay_secs)).await;
    }
}

/// 常驻模式的前置检查：入口脚本必须能从当前目录访问到
pub fn check_entry_script(cfg: &OcrConfig) -> Result<()> {
    if let Some(script) = cfg.entry_script() {
        if !Path::new(script).exists() {
            bail!("找不到提取引擎入口 {}，请在项目根目录运行", script);
        }
    }
    Ok(())
}
