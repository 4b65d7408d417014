pub mod content;
pub mod vlm;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use clap::ValueEnum;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::catalog::{ANALYSIS_MARKER, WorkCatalog};
use crate::config::AnalysisConfig;
use crate::core::types::{ProcessResult, Stage, StageStatus, WorkItem};
use self::content::PaperContent;
use self::vlm::ChatClient;

/// 分析提供方
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// 本地部署的 OpenAI 兼容推理服务
    Local,
    /// OpenAI 官方接口
    Online,
}

/// 可插拔的分析能力：输入整篇内容，输出报告文本
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, content: &PaperContent) -> Result<String>;
}

const SYSTEM_PROMPT: &str = "You are an expert Computer Science researcher and reviewer.
You are analyzing a NeurIPS paper. The input consists of text extracted from each page, followed immediately by any figure/table images found on that page.
Use BOTH the text and the visual information to analyze the paper.

Report Structure:
1. **Background**: Problem context.
2. **Research Gap**: What is missing in literature?
3. **Method**: Technical approach (reference specific figures if relevant).
4. **Dataset**: Datasets used.
5. **Evaluation**: Metrics and baselines.
6. **Critical Thinking**: Strengths, weaknesses, and novelty judgment.
";

/// 在线分析器：system + user 双消息
pub struct OpenAiAnalyzer {
    client: ChatClient,
}

impl OpenAiAnalyzer {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Analyzer for OpenAiAnalyzer {
    async fn analyze(&self, content: &PaperContent) -> Result<String> {
        let mut user_content =
            vec![text_part("Please analyze this paper based on the following pages:\n\n")];
        append_pages(&mut user_content, content)?;

        info!("请求在线模型分析 ({})...", self.client.model());
        self.client
            .chat(vec![
                json!({ "role": "system", "content": SYSTEM_PROMPT }),
                json!({ "role": "user", "content": user_content }),
            ])
            .await
    }
}

/// 本地分析器：提示词并入单条 user 消息，贴合本地推理服务的模板习惯
pub struct LocalVlmAnalyzer {
    client: ChatClient,
}

impl LocalVlmAnalyzer {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Analyzer for LocalVlmAnalyzer {
    async fn analyze(&self, content: &PaperContent) -> Result<String> {
        let mut user_content = vec![text_part(&format!("{}\n\n", SYSTEM_PROMPT))];
        append_pages(&mut user_content, content)?;

        info!("请求本地模型分析 ({})...", self.client.model());
        self.client
            .chat(vec![json!({ "role": "user", "content": user_content })])
            .await
    }
}

/// 按 CLI 选项构造分析器；模型与密钥未指定时回落到配置默认值
pub fn make_analyzer(
    provider: Provider,
    model: Option<String>,
    api_key: Option<String>,
    cfg: &AnalysisConfig,
) -> Result<Box<dyn Analyzer>> {
    match provider {
        Provider::Online => {
            let model = model.unwrap_or_else(|| cfg.online_model.clone());
            info!("初始化在线分析器 ({})...", model);
            let client =
                ChatClient::new(cfg.online_api_base.clone(), api_key, model, cfg.max_tokens)?;
            Ok(Box::new(OpenAiAnalyzer::new(client)))
        }
        Provider::Local => {
            let model = model.unwrap_or_else(|| cfg.local_model.clone());
            info!("初始化本地分析器 ({})...", model);
            let client =
                ChatClient::new(cfg.local_api_base.clone(), api_key, model, cfg.max_tokens)?;
            Ok(Box::new(LocalVlmAnalyzer::new(client)))
        }
    }
}

fn text_part(text: &str) -> Value {
    json!({ "type": "text", "text": text })
}

/// 把每一页的文本和图片按顺序拼进消息内容
fn append_pages(user_content: &mut Vec<Value>, content: &PaperContent) -> Result<()> {
    for page in &content.pages {
        user_content.push(text_part(&format!(
            "--- Page {} Text ---\n{}\n",
            page.page_num, page.text
        )));

        if !page.images.is_empty() {
            user_content.push(text_part(&format!(
                "\n[Figures/Tables found on Page {}]:\n",
                page.page_num
            )));
            for image in &page.images {
                let bytes = fs::read(image)
                    .with_context(|| format!("读取图片失败: {}", image.display()))?;
                user_content.push(json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/jpeg;base64,{}", BASE64.encode(bytes)),
                        "detail": "high",
                    },
                }));
            }
            user_content.push(text_part("\n"));
        }

        user_content.push(text_part(&format!("\n[End of Page {}]\n\n", page.page_num)));
    }
    Ok(())
}

/// 报告先写临时文件再改名，崩溃也不会留下非空却不完整的标记
pub fn save_report(paper_dir: &Path, report: &str) -> Result<()> {
    let marker = paper_dir.join(ANALYSIS_MARKER);
    let tmp = paper_dir.join(format!("{}.tmp", ANALYSIS_MARKER));
    fs::write(&tmp, report).with_context(|| format!("写入报告失败: {}", tmp.display()))?;
    fs::rename(&tmp, &marker)
        .with_context(|| format!("报告改名失败: {}", marker.display()))?;
    Ok(())
}

/// 确保一篇论文完成分析；提取未完成时跳过，分析失败只影响当前条目
pub async fn ensure_analyzed(
    catalog: &WorkCatalog,
    item: &WorkItem,
    analyzer: &dyn Analyzer,
    cfg: &AnalysisConfig,
) -> ProcessResult {
    if catalog.stage_status(item, Stage::Extract) != StageStatus::Complete {
        warn!("无法分析 {}: 提取尚未完成", item.file_stem());
        return ProcessResult::Failed;
    }
    if catalog.stage_status(item, Stage::Analyze) == StageStatus::Complete {
        return ProcessResult::AlreadyExists;
    }

    let paper_dir = item.extracted_dir(&catalog.extracted_root);
    let content = match PaperContent::load(&paper_dir, cfg) {
        Ok(content) => content,
        Err(e) => {
            warn!("加载提取内容失败 {}: {:#}", item.file_stem(), e);
            return ProcessResult::Failed;
        }
    };

    info!("开始分析: {}", item.file_stem());
    match analyzer.analyze(&content).await {
        Ok(report) if report.trim().is_empty() => {
            // 空报告不写标记，下次运行自然重试
            warn!("模型返回空报告: {}", item.file_stem());
            ProcessResult::Failed
        }
        Ok(report) => match save_report(&paper_dir, &report) {
            Ok(()) => {
                info!("✅ 报告已保存: {}", item.file_stem());
                ProcessResult::Success
            }
            Err(e) => {
                warn!("保存报告失败 {}: {:#}", item.file_stem(), e);
                ProcessResult::Failed
            }
        },
        Err(e) => {
            warn!("❌ 分析失败 {}: {:#}", item.file_stem(), e);
            ProcessResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::content::PageRecord;
    use crate::catalog::EXTRACT_MARKER;
    use tempfile::TempDir;

    struct FixedAnalyzer {
        report: String,
    }

    #[async_trait]
    impl Analyzer for FixedAnalyzer {
        async fn analyze(&self, _content: &PaperContent) -> Result<String> {
            Ok(self.report.clone())
        }
    }

    struct FailingAnalyzer;

    #[async_trait]
    impl Analyzer for FailingAnalyzer {
        async fn analyze(&self, _content: &PaperContent) -> Result<String> {
            anyhow::bail!("模拟模型超时")
        }
    }

    fn setup(root: &TempDir, with_marker: bool) -> (WorkCatalog, WorkItem) {
        let input = root.path().join("input");
        let extracted = root.path().join("extracted");
        fs::create_dir_all(&input).unwrap();
        let item = WorkItem::new("a1", "Analyzed Paper", vec![]);
        let dir = item.extracted_dir(&extracted);
        fs::create_dir_all(dir.join("pages/page_0")).unwrap();
        fs::write(dir.join("pages/page_0/result.mmd"), "正文").unwrap();
        if with_marker {
            fs::write(dir.join(EXTRACT_MARKER), "# full").unwrap();
        }
        (WorkCatalog::new(input, extracted, 1024), item)
    }

    #[tokio::test]
    async fn test_report_written_once() {
        let root = TempDir::new().unwrap();
        let (catalog, item) = setup(&root, true);
        let analyzer = FixedAnalyzer { report: "report body".to_string() };
        let cfg = AnalysisConfig::default();

        let first = ensure_analyzed(&catalog, &item, &analyzer, &cfg).await;
        assert_eq!(first, ProcessResult::Success);

        let marker = item.extracted_dir(&catalog.extracted_root).join(ANALYSIS_MARKER);
        assert_eq!(fs::read_to_string(&marker).unwrap(), "report body");

        // 第二次应直接命中标记，不再调用模型
        let second = ensure_analyzed(&catalog, &item, &analyzer, &cfg).await;
        assert_eq!(second, ProcessResult::AlreadyExists);
    }

    #[tokio::test]
    async fn test_empty_report_writes_no_marker() {
        let root = TempDir::new().unwrap();
        let (catalog, item) = setup(&root, true);
        let analyzer = FixedAnalyzer { report: "  \n".to_string() };
        let cfg = AnalysisConfig::default();

        let result = ensure_analyzed(&catalog, &item, &analyzer, &cfg).await;
        assert_eq!(result, ProcessResult::Failed);
        assert!(
            !item.extracted_dir(&catalog.extracted_root).join(ANALYSIS_MARKER).exists(),
            "空报告不应产生标记，条目下次运行可重试"
        );
    }

    #[tokio::test]
    async fn test_analyzer_error_is_contained() {
        let root = TempDir::new().unwrap();
        let (catalog, item) = setup(&root, true);
        let cfg = AnalysisConfig::default();

        let result = ensure_analyzed(&catalog, &item, &FailingAnalyzer, &cfg).await;
        assert_eq!(result, ProcessResult::Failed, "模型异常只记日志，不中断批处理");
    }

    #[tokio::test]
    async fn test_analysis_gated_on_extraction_marker() {
        let root = TempDir::new().unwrap();
        let (catalog, item) = setup(&root, false);
        let analyzer = FixedAnalyzer { report: "r".to_string() };
        let cfg = AnalysisConfig::default();

        let result = ensure_analyzed(&catalog, &item, &analyzer, &cfg).await;
        assert_eq!(result, ProcessResult::Failed, "提取未完成时不应分析");
        assert!(!item.extracted_dir(&catalog.extracted_root).join(ANALYSIS_MARKER).exists());
    }

    #[test]
    fn test_append_pages_interleaves_text_and_images() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("fig.png");
        fs::write(&image, b"png-bytes").unwrap();

        let content = PaperContent {
            pages: vec![PageRecord {
                page_num: 3,
                text: "第三页".to_string(),
                images: vec![image],
            }],
        };

        let mut parts = Vec::new();
        append_pages(&mut parts, &content).unwrap();

        assert!(parts[0]["text"].as_str().unwrap().contains("Page 3"));
        assert_eq!(parts[2]["type"], "image_url");
        let url = parts[2]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"), "图片应内联为 base64 数据地址");
    }

    #[test]
    fn test_save_report_replaces_tmp() {
        let dir = TempDir::new().unwrap();
        save_report(dir.path(), "内容").unwrap();

        assert_eq!(fs::read_to_string(dir.path().join(ANALYSIS_MARKER)).unwrap(), "内容");
        assert!(
            !dir.path().join(format!("{}.tmp", ANALYSIS_MARKER)).exists(),
            "临时文件应在改名后消失"
        );
    }
}
