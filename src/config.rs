use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// 全局配置，来自 config.toml；文件不存在时使用默认值
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_extracted_dir")]
    pub extracted_dir: PathBuf,
    #[serde(default = "default_failed_list")]
    pub failed_list: PathBuf,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_venue_id")]
    pub venue_id: String,
    /// 单次分页请求返回的最大条数
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 批次级重试轮数：每一轮只处理上一轮失败的条目
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// 传输级重试次数（针对可重试状态码与连接错误）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 小于等于该字节数的文件视为损坏，删除后重新下载
    #[serde(default = "default_min_pdf_bytes")]
    pub min_pdf_bytes: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 每个条目请求前的随机延迟区间，避免同时打到源站
    #[serde(default = "default_jitter_min_ms")]
    pub jitter_min_ms: u64,
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// 提取引擎命令；单篇模式会在末尾追加 PDF 路径和输出根目录
    #[serde(default = "default_ocr_command")]
    pub command: Vec<String>,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
    /// 常驻守护模式下引擎崩溃后的重启间隔
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
}

impl OcrConfig {
    /// 引擎入口脚本（命令里第一个脚本参数），常驻模式启动前要求其存在
    pub fn entry_script(&self) -> Option<&str> {
        self.command.get(1).map(|s| s.as_str())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// 每页提取文本的文件名（由提取引擎决定）
    #[serde(default = "default_page_text_file")]
    pub page_text_file: String,
    /// 页面没有图表裁剪图时，是否退回整页截图
    #[serde(default = "default_fallback_to_page_image")]
    pub fallback_to_page_image: bool,
    #[serde(default = "default_online_api_base")]
    pub online_api_base: String,
    #[serde(default = "default_online_model")]
    pub online_model: String,
    #[serde(default = "default_local_api_base")]
    pub local_api_base: String,
    #[serde(default = "default_local_model")]
    pub local_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path.unwrap_or_else(|| Path::new("config.toml"));
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
            let cfg: AppConfig = toml::from_str(&raw)
                .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
            return Ok(cfg);
        }
        Ok(AppConfig::default())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            extracted_dir: default_extracted_dir(),
            failed_list: default_failed_list(),
            catalog: CatalogConfig::default(),
            download: DownloadConfig::default(),
            ocr: OcrConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            venue_id: default_venue_id(),
            page_size: default_page_size(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_rounds: default_max_rounds(),
            max_attempts: default_max_attempts(),
            min_pdf_bytes: default_min_pdf_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            command: default_ocr_command(),
            timeout_secs: default_ocr_timeout_secs(),
            restart_delay_secs: default_restart_delay_secs(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            page_text_file: default_page_text_file(),
            fallback_to_page_image: default_fallback_to_page_image(),
            online_api_base: default_online_api_base(),
            online_model: default_online_model(),
            local_api_base: default_local_api_base(),
            local_model: default_local_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("input")
}

fn default_extracted_dir() -> PathBuf {
    PathBuf::from("extracted")
}

fn default_failed_list() -> PathBuf {
    PathBuf::from("failed_downloads.txt")
}

fn default_api_base() -> String {
    "https://api2.openreview.net".to_string()
}

fn default_venue_id() -> String {
    "NeurIPS.cc/2025/Conference".to_string()
}

fn default_page_size() -> usize {
    1000
}

fn default_concurrency() -> usize {
    5
}

fn default_max_rounds() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    5
}

fn default_min_pdf_bytes() -> u64 {
    1024
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_jitter_min_ms() -> u64 {
    500
}

fn default_jitter_max_ms() -> u64 {
    2000
}

fn default_ocr_command() -> Vec<String> {
    vec!["python".to_string(), "src/ocr_engine.py".to_string()]
}

fn default_ocr_timeout_secs() -> u64 {
    1200
}

fn default_restart_delay_secs() -> u64 {
    5
}

fn default_page_text_file() -> String {
    "result.mmd".to_string()
}

fn default_fallback_to_page_image() -> bool {
    true
}

fn default_online_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_online_model() -> String {
    "gpt-5".to_string()
}

fn default_local_api_base() -> String {
    "http://localhost:8000/v1".to_string()
}

fn default_local_model() -> String {
    "Qwen/Qwen3-VL-4B-Thinking".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.download.concurrency, 5, "默认下载并发应为 5");
        assert_eq!(cfg.download.max_rounds, 3, "默认批次重试轮数应为 3");
        assert_eq!(cfg.ocr.timeout_secs, 1200, "默认提取超时应为 20 分钟");
        assert!(cfg.analysis.fallback_to_page_image, "默认应开启整页截图回退");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            input_dir = "papers"

            [download]
            concurrency = 2
            "#,
        )
        .expect("应能解析部分配置");

        assert_eq!(cfg.input_dir, PathBuf::from("papers"));
        assert_eq!(cfg.download.concurrency, 2);
        assert_eq!(cfg.download.max_attempts, 5, "未指定字段应回落到默认值");
        assert_eq!(cfg.ocr.entry_script(), Some("src/ocr_engine.py"));
    }
}
