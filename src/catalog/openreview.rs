use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::CatalogConfig;
use crate::core::types::WorkItem;

/// 论文目录源：返回被接收论文的有序列表
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn list_accepted_items(&self) -> Result<Vec<WorkItem>>;
}

/// OpenReview API v2 客户端
pub struct OpenReviewClient {
    http: reqwest::Client,
    cfg: CatalogConfig,
}

#[derive(Debug, Deserialize)]
struct NotesPage {
    #[serde(default)]
    notes: Vec<Note>,
    #[serde(default)]
    count: usize,
}

#[derive(Debug, Deserialize)]
struct Note {
    id: String,
    #[serde(default)]
    content: Value,
}

impl OpenReviewClient {
    pub fn new(cfg: CatalogConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("构建 HTTP 客户端失败")?;
        Ok(Self { http, cfg })
    }

    fn note_to_item(&self, note: &Note) -> WorkItem {
        let title = note.content["title"]["value"]
            .as_str()
            .unwrap_or("Untitled")
            .to_string();

        // 优先使用 note 自带的 pdf/file 字段，再退回按 id 拼出的直链
        let mut urls = Vec::new();
        for field in ["pdf", "file"] {
            if let Some(path) = note.content[field]["value"].as_str() {
                urls.push(format!("https://openreview.net{}", path));
            }
        }
        urls.push(format!("https://openreview.net/pdf?id={}", note.id));

        WorkItem::new(note.id.clone(), title, urls)
    }
}

#[async_trait]
impl CatalogProvider for OpenReviewClient {
    async fn list_accepted_items(&self) -> Result<Vec<WorkItem>> {
        info!("正在连接 OpenReview: {}", self.cfg.api_base);

        let mut items = Vec::new();
        let mut offset = 0usize;
        loop {
            let url = format!("{}/notes", self.cfg.api_base);
            let page: NotesPage = self
                .http
                .get(&url)
                .query(&[
                    ("content.venueid", self.cfg.venue_id.as_str()),
                    ("offset", &offset.to_string()),
                    ("limit", &self.cfg.page_size.to_string()),
                ])
                .send()
                .await
                .with_context(|| format!("请求 OpenReview 失败: {}", url))?
                .error_for_status()
                .context("OpenReview 返回错误状态")?
                .json()
                .await
                .context("解析 OpenReview 响应失败")?;

            debug!("拉取到 {} 条记录 (offset={}, 总数={})", page.notes.len(), offset, page.count);
            if page.notes.is_empty() {
                break;
            }
            offset += page.notes.len();
            items.extend(page.notes.iter().map(|n| self.note_to_item(n)));

            if offset >= page.count {
                break;
            }
        }

        // 按 id 排序，保证多次运行得到同样的候选顺序
        items.sort_by(|a, b| a.id.cmp(&b.id));
        info!("在 {} 找到 {} 篇论文", self.cfg.venue_id, items.len());
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenReviewClient {
        OpenReviewClient::new(CatalogConfig::default()).unwrap()
    }

    #[test]
    fn test_note_to_item_prefers_pdf_field() {
        let note = Note {
            id: "abc".to_string(),
            content: serde_json::json!({
                "title": { "value": "A Study" },
                "pdf": { "value": "/pdf/abc.pdf" },
            }),
        };

        let item = client().note_to_item(&note);
        assert_eq!(item.title, "A Study");
        assert_eq!(item.pdf_urls[0], "https://openreview.net/pdf/abc.pdf", "应优先使用 pdf 字段");
        assert_eq!(
            item.pdf_urls.last().unwrap(),
            "https://openreview.net/pdf?id=abc",
            "最后应保留按 id 拼出的兜底直链"
        );
    }

    #[test]
    fn test_note_to_item_without_pdf_falls_back() {
        let note = Note {
            id: "xyz".to_string(),
            content: serde_json::json!({}),
        };

        let item = client().note_to_item(&note);
        assert_eq!(item.title, "Untitled");
        assert_eq!(item.pdf_urls, vec!["https://openreview.net/pdf?id=xyz".to_string()]);
    }
}
