use std::path::{Path, PathBuf};

use crate::utils::text::sanitize_title;

/// 一篇待处理的论文，发现后不再修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    /// 候选下载地址，按优先级排列；本地发现的条目为空
    pub pdf_urls: Vec<String>,
    /// 各阶段共用的目录/文件名前缀
    file_stem: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, pdf_urls: Vec<String>) -> Self {
        let id = id.into();
        let title = title.into();
        let file_stem = format!("{}_{}", sanitize_title(&title), id);
        Self { id, title, pdf_urls, file_stem }
    }

    /// 从本地已下载的 PDF 还原工作项（仅用于后续阶段，不含下载地址）
    pub fn from_local_pdf(pdf_path: &Path) -> Option<Self> {
        let stem = pdf_path.file_stem()?.to_str()?.to_string();
        Some(Self {
            id: stem.clone(),
            title: stem.replace('_', " "),
            pdf_urls: Vec::new(),
            file_stem: stem,
        })
    }

    pub fn file_stem(&self) -> &str {
        &self.file_stem
    }

    pub fn pdf_file_name(&self) -> String {
        format!("{}.pdf", self.file_stem)
    }

    pub fn pdf_path(&self, input_dir: &Path) -> PathBuf {
        input_dir.join(self.pdf_file_name())
    }

    /// 该论文的提取输出目录（提取与分析的标记文件都在其中）
    pub fn extracted_dir(&self, extracted_root: &Path) -> PathBuf {
        extracted_root.join(&self.file_stem)
    }
}

/// 流水线的三个阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Extract,
    Analyze,
}

/// 按需从磁盘标记推导的阶段状态，跨进程不做缓存
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    NotStarted,
    Partial,
    Complete,
}

/// 单篇论文一次下载的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Success,
    /// 磁盘上已有通过大小校验的文件
    Skipped,
    Error { message: String },
}

/// 单篇论文在提取/分析阶段的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    Success,
    AlreadyExists,
    Failed,
}

#[derive(Default, Debug, Clone, Copy)]
pub struct ProcessStats {
    pub success: usize,
    pub exists: usize,
    pub failed: usize,
}

impl ProcessStats {
    pub fn add_result(&mut self, result: &ProcessResult) {
        match result {
            ProcessResult::Success => self.success += 1,
            ProcessResult::AlreadyExists => self.exists += 1,
            ProcessResult::Failed => self.failed += 1,
        }
    }

}
