use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tracing::debug;

/// OpenAI 兼容接口的会话客户端
///
/// 在线与本地两种提供方走同一套 chat/completions 协议，只是地址和
/// 鉴权不同。客户端整次运行只构造一次，各篇论文复用同一个连接池。
pub struct ChatClient {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
}

impl ChatClient {
    pub fn new(
        api_base: String,
        api_key: Option<String>,
        model: String,
        max_tokens: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("构建 HTTP 客户端失败")?;
        Ok(Self { http, api_base, api_key, model, max_tokens })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 发送一轮多模态对话，返回模型的文本回复
    pub async fn chat(&self, messages: Vec<Value>) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
        });

        debug!("请求 {} (model={})", url, self.model);
        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response: Value = request
            .send()
            .await
            .with_context(|| format!("请求模型服务失败: {}", url))?
            .error_for_status()
            .context("模型服务返回错误状态")?
            .json()
            .await
            .context("解析模型响应失败")?;

        response["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("模型响应缺少 choices[0].message.content"))
    }
}
