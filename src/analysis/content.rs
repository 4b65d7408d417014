use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::AnalysisConfig;

/// 一页的提取结果：文本加上该页关联的图片
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub page_num: usize,
    pub text: String,
    pub images: Vec<PathBuf>,
}

/// 一篇论文的全部页面内容；分析前临时组装，从不落盘
#[derive(Debug, Clone)]
pub struct PaperContent {
    pub pages: Vec<PageRecord>,
}

impl PaperContent {
    /// 从提取输出目录组装内容
    ///
    /// 图片优先取 images/ 下的图表裁剪图；某些引擎不产出裁剪图，
    /// 此时按配置回退到整页截图 original.jpg。
    pub fn load(paper_dir: &Path, cfg: &AnalysisConfig) -> Result<Self> {
        let pages_dir = paper_dir.join("pages");
        if !pages_dir.is_dir() {
            warn!("找不到 pages 目录: {}", pages_dir.display());
            return Ok(Self { pages: Vec::new() });
        }

        let mut indexed: Vec<(usize, PathBuf)> = fs::read_dir(&pages_dir)
            .with_context(|| format!("读取 pages 目录失败: {}", pages_dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter_map(|p| {
                let idx = p
                    .file_name()?
                    .to_str()?
                    .strip_prefix("page_")?
                    .parse::<usize>()
                    .ok()?;
                Some((idx, p))
            })
            .collect();
        // 按页号数值排序，page_10 要排在 page_2 之后
        indexed.sort_by_key(|(idx, _)| *idx);

        let mut pages = Vec::with_capacity(indexed.len());
        for (page_num, folder) in indexed {
            let text_path = folder.join(&cfg.page_text_file);
            let text = match fs::read_to_string(&text_path) {
                Ok(t) => t,
                Err(_) => String::new(),
            };

            let mut images = list_images(&folder.join("images"));
            if images.is_empty() && cfg.fallback_to_page_image {
                let original = folder.join("original.jpg");
                if original.exists() {
                    images.push(original);
                }
            }

            pages.push(PageRecord { page_num, text, images });
        }

        Ok(Self { pages })
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

fn list_images(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut images: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg")
                })
        })
        .collect();
    images.sort();
    images
}
