pub mod openreview;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::types::{Stage, StageStatus, WorkItem};

/// 提取阶段的完成标记文件
pub const EXTRACT_MARKER: &str = "full_extracted.md";
/// 分析阶段的完成标记文件
pub const ANALYSIS_MARKER: &str = "analysis_report.md";

/// 基于磁盘标记回答"哪些论文、各阶段做到哪了"的目录视图
///
/// 状态完全由文件存在性与大小推导，进程重启后不依赖任何内存状态，
/// 因此流水线随时可以安全重跑并从中断处继续。
#[derive(Debug, Clone)]
pub struct WorkCatalog {
    pub input_dir: PathBuf,
    pub extracted_root: PathBuf,
    /// 下载产物的最小合法字节数，小于等于它视为损坏
    pub min_pdf_bytes: u64,
}

impl WorkCatalog {
    pub fn new(input_dir: PathBuf, extracted_root: PathBuf, min_pdf_bytes: u64) -> Self {
        Self { input_dir, extracted_root, min_pdf_bytes }
    }

    /// 枚举本地已下载的论文，按文件名排序保证确定性，可选截断
    pub fn discover(&self, limit: Option<usize>) -> Result<Vec<WorkItem>> {
        let entries = fs::read_dir(&self.input_dir)
            .with_context(|| format!("读取输入目录失败: {}", self.input_dir.display()))?;

        let mut pdfs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")))
            .collect();
        pdfs.sort();

        let mut items: Vec<WorkItem> =
            pdfs.iter().filter_map(|p| WorkItem::from_local_pdf(p)).collect();

        if let Some(n) = limit {
            items.truncate(n);
        }
        Ok(items)
    }

    /// 查询某篇论文某个阶段的状态；纯粹的文件系统读取，无副作用
    pub fn stage_status(&self, item: &WorkItem, stage: Stage) -> StageStatus {
        match stage {
            Stage::Download => {
                file_status_with_min(&item.pdf_path(&self.input_dir), self.min_pdf_bytes)
            }
            Stage::Extract => {
                self.marker_status(item, EXTRACT_MARKER)
            }
            Stage::Analyze => {
                self.marker_status(item, ANALYSIS_MARKER)
            }
        }
    }

    fn marker_status(&self, item: &WorkItem, marker: &str) -> StageStatus {
        let dir = item.extracted_dir(&self.extracted_root);
        let marker_path = dir.join(marker);
        match fs::metadata(&marker_path) {
            Ok(meta) if meta.len() > 0 => StageStatus::Complete,
            // 标记存在但为空，或目录存在却没有标记，都属于半成品
            Ok(_) => StageStatus::Partial,
            Err(_) if dir.is_dir() => StageStatus::Partial,
            Err(_) => StageStatus::NotStarted,
        }
    }
}

fn file_status_with_min(path: &Path, min_bytes: u64) -> StageStatus {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > min_bytes => StageStatus::Complete,
        Ok(_) => StageStatus::Partial,
        Err(_) => StageStatus::NotStarted,
    }
}
