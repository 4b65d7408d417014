//! 流水线层面的端到端测试：幂等性、崩溃隔离、跳过开关
//!
//! 用 sh 脚本顶替真实提取引擎（接口相同：<pdf> <输出根目录>），
//! 用计数分析器顶替真实模型，这样断言能精确到"第二次运行零调用"。

use anyhow::Result;
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use paper_pipeline::analysis::content::PaperContent;
use paper_pipeline::analysis::{Analyzer, Provider, ensure_analyzed};
use paper_pipeline::catalog::{ANALYSIS_MARKER, EXTRACT_MARKER, WorkCatalog};
use paper_pipeline::config::{AnalysisConfig, AppConfig, OcrConfig};
use paper_pipeline::core::types::{ProcessResult, Stage, StageStatus, WorkItem};
use paper_pipeline::ocr::supervisor::ExtractionSupervisor;
use paper_pipeline::workflow::pipeline::{self, PipelineOptions};

/// 记录调用次数的分析器
struct CountingAnalyzer {
    calls: AtomicUsize,
}

impl CountingAnalyzer {
    fn new() -> Self {
        Self { calls: AtomicUsize::new(0) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for CountingAnalyzer {
    async fn analyze(&self, _content: &PaperContent) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("# 报告\n内容".to_string())
    }
}

fn setup_workspace(root: &TempDir, titles: &[(&str, &str)]) -> (WorkCatalog, Vec<WorkItem>) {
    let input = root.path().join("input");
    let extracted = root.path().join("extracted");
    fs::create_dir_all(&input).unwrap();
    fs::create_dir_all(&extracted).unwrap();

    let items: Vec<WorkItem> = titles
        .iter()
        .map(|(id, title)| {
            let item = WorkItem::new(*id, *title, vec![]);
            fs::write(item.pdf_path(&input), vec![0u8; 2048]).unwrap();
            item
        })
        .collect();

    (WorkCatalog::new(input, extracted, 1024), items)
}

/// 伪引擎：每次调用在 log 里追加一行，再按真实布局产出一页和标记
fn counting_engine(invocation_log: &Path, timeout_secs: u64) -> OcrConfig {
    let script = format!(
        r##"
        echo "$1" >> "{log}"
        stem=$(basename "$1" .pdf)
        mkdir -p "$2/$stem/pages/page_0"
        echo "page text" > "$2/$stem/pages/page_0/result.mmd"
        echo "# Page 0" > "$2/$stem/full_extracted.md"
        "##,
        log = invocation_log.display()
    );
    OcrConfig {
        command: vec!["sh".to_string(), "-c".to_string(), script, "sh".to_string()],
        timeout_secs,
        restart_delay_secs: 0,
    }
}

/// 伪引擎：文件名里带 bad 的条目写了一半输出就崩溃
fn crashing_engine(timeout_secs: u64) -> OcrConfig {
    let script = r##"
        stem=$(basename "$1" .pdf)
        mkdir -p "$2/$stem/pages/page_0"
        echo "page text" > "$2/$stem/pages/page_0/result.mmd"
        case "$stem" in
            *bad*) exit 1 ;;
        esac
        echo "# Page 0" > "$2/$stem/full_extracted.md"
    "##;
    OcrConfig {
        command: vec!["sh".to_string(), "-c".to_string(), script.to_string(), "sh".to_string()],
        timeout_secs,
        restart_delay_secs: 0,
    }
}

#[tokio::test]
async fn test_second_run_does_no_work() {
    let root = TempDir::new().unwrap();
    let (catalog, items) =
        setup_workspace(&root, &[("p1", "First Paper"), ("p2", "Second Paper")]);

    let log = root.path().join("invocations.log");
    let supervisor =
        ExtractionSupervisor::new(counting_engine(&log, 30), catalog.extracted_root.clone());
    let analyzer = CountingAnalyzer::new();
    let analysis_cfg = AnalysisConfig::default();

    // 第一次运行：两个阶段都真正做事
    for item in &items {
        supervisor.ensure_extracted(&catalog, item).await;
        ensure_analyzed(&catalog, item, &analyzer, &analysis_cfg).await;
    }
    assert_eq!(fs::read_to_string(&log).unwrap().lines().count(), 2);
    assert_eq!(analyzer.calls(), 2);

    let snapshot: Vec<String> = items
        .iter()
        .map(|i| {
            let dir = i.extracted_dir(&catalog.extracted_root);
            fs::read_to_string(dir.join(EXTRACT_MARKER)).unwrap()
                + &fs::read_to_string(dir.join(ANALYSIS_MARKER)).unwrap()
        })
        .collect();

    // 第二次运行：外部状态没变，必须零引擎调用、零模型调用
    for item in &items {
        let r = supervisor.ensure_extracted(&catalog, item).await;
        assert_eq!(r, ProcessResult::AlreadyExists);
        let r = ensure_analyzed(&catalog, item, &analyzer, &analysis_cfg).await;
        assert_eq!(r, ProcessResult::AlreadyExists);
    }
    assert_eq!(
        fs::read_to_string(&log).unwrap().lines().count(),
        2,
        "第二次运行不应再调提取引擎"
    );
    assert_eq!(analyzer.calls(), 2, "第二次运行不应再调分析模型");

    let snapshot_after: Vec<String> = items
        .iter()
        .map(|i| {
            let dir = i.extracted_dir(&catalog.extracted_root);
            fs::read_to_string(dir.join(EXTRACT_MARKER)).unwrap()
                + &fs::read_to_string(dir.join(ANALYSIS_MARKER)).unwrap()
        })
        .collect();
    assert_eq!(snapshot, snapshot_after, "两次运行后的磁盘产物应完全一致");
}

#[tokio::test]
async fn test_crash_on_one_item_does_not_affect_siblings() {
    let root = TempDir::new().unwrap();
    let (catalog, items) = setup_workspace(
        &root,
        &[("p1", "Good One"), ("p2", "bad apple"), ("p3", "Good Three")],
    );

    let supervisor =
        ExtractionSupervisor::new(crashing_engine(30), catalog.extracted_root.clone());

    let mut results = Vec::new();
    for item in &items {
        results.push(supervisor.ensure_extracted(&catalog, item).await);
    }

    assert_eq!(results[0], ProcessResult::Success);
    assert_eq!(results[1], ProcessResult::Failed);
    assert_eq!(results[2], ProcessResult::Success, "后续条目不应被前面的崩溃影响");

    assert_eq!(catalog.stage_status(&items[0], Stage::Extract), StageStatus::Complete);
    assert_eq!(catalog.stage_status(&items[2], Stage::Extract), StageStatus::Complete);
    assert!(
        !items[1].extracted_dir(&catalog.extracted_root).exists(),
        "崩溃条目不应留下任何输出目录"
    );

    // 重跑时只有崩溃过的条目会再进引擎
    let retried = supervisor.ensure_extracted(&catalog, &items[0]).await;
    assert_eq!(retried, ProcessResult::AlreadyExists);
}

#[tokio::test]
async fn test_skip_flags_touch_no_markers() {
    let root = TempDir::new().unwrap();
    let (catalog, items) = setup_workspace(&root, &[("p1", "Skipped Paper")]);

    // 预置一篇已完成提取的论文
    let dir = items[0].extracted_dir(&catalog.extracted_root);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(EXTRACT_MARKER), "# 已有提取").unwrap();

    let cfg = AppConfig {
        input_dir: catalog.input_dir.clone(),
        extracted_dir: catalog.extracted_root.clone(),
        failed_list: root.path().join("failed_downloads.txt"),
        ..AppConfig::default()
    };
    let opts = PipelineOptions {
        limit: None,
        skip_download: true,
        skip_ocr: true,
        skip_analysis: true,
        provider: Provider::Local,
        model: None,
        api_key: None,
    };

    pipeline::run(cfg, opts).await.unwrap();

    assert_eq!(
        fs::read_to_string(dir.join(EXTRACT_MARKER)).unwrap(),
        "# 已有提取",
        "跳过提取时已有标记不应被改动"
    );
    assert!(
        !dir.join(ANALYSIS_MARKER).exists(),
        "跳过分析时不应生成分析标记"
    );
}
