use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use common::{
    Mentions, MessageType, PlatformFactory, PushError, PushInitConfig, PushPlatform,
    PushPlatformCapabilities, PushResult,
};
use log::*;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub mod clock;
pub mod link;
pub mod payload;
pub mod sign;
pub mod throttle;

pub use clock::{Clock, SystemClock};
use link::LinkRewriter;
use payload::DingTalkPayload;
use sign::Endpoint;
use throttle::{SendWindow, WINDOW_CAPACITY};

const PLATFORM_NAME: &str = "dingtalk";
const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

/// 钉钉群机器人配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DingTalkConfig {
    /// 完整的 webhook 地址（含 access_token）
    pub webhook: String,
    /// 加签密钥，以 `SEC` 开头时启用加签
    #[serde(default)]
    pub secret: Option<String>,
    /// 链接是否在 PC 端侧边栏打开
    #[serde(default)]
    pub pc_slide: bool,
    /// 平台返回错误码时是否额外发送一条失败提醒
    #[serde(default)]
    pub fail_notice: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl DingTalkConfig {
    pub fn new(webhook: impl Into<String>) -> Self {
        Self {
            webhook: webhook.into(),
            secret: None,
            pc_slide: false,
            fail_notice: false,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_pc_slide(mut self, pc_slide: bool) -> Self {
        self.pc_slide = pc_slide;
        self
    }

    pub fn with_fail_notice(mut self, fail_notice: bool) -> Self {
        self.fail_notice = fail_notice;
        self
    }
}

impl PushInitConfig for DingTalkConfig {
    fn platform_name(&self) -> &str {
        PLATFORM_NAME
    }

    fn webhook_url(&self) -> String {
        self.webhook.clone()
    }

    fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    fn timeout(&self) -> u64 {
        self.timeout_secs
    }
}

/// 钉钉接口返回，`errcode` 为 0 表示成功
///
/// 2xx 响应缺少 `errcode` 时按成功处理，不触发失败提醒。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DingTalkResponse {
    #[serde(default)]
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl DingTalkResponse {
    pub fn is_ok(&self) -> bool {
        self.errcode == 0
    }
}

impl From<DingTalkResponse> for PushResult {
    fn from(response: DingTalkResponse) -> Self {
        PushResult {
            success: response.is_ok(),
            error_code: Some(response.errcode),
            error_message: Some(response.errmsg.clone()),
            response: serde_json::to_string(&response).ok(),
            ..Default::default()
        }
    }
}

/// 钉钉群机器人推送平台
///
/// 同一实例的发送共享签名缓存与限流窗口，需要限流生效时应复用实例。
pub struct DingTalkGroupBotPlatform {
    config: DingTalkConfig,
    endpoint: Endpoint,
    links: LinkRewriter,
    window: Mutex<SendWindow>,
    clock: Arc<dyn Clock>,
    http_client: Client,
}

#[async_trait]
impl PushPlatformCapabilities for DingTalkGroupBotPlatform {
    async fn send(&self, message: MessageType) -> Result<PushResult, PushError> {
        let response = self.send_message(&message).await?;
        Ok(response.into())
    }

    fn name(&self) -> &str {
        PLATFORM_NAME
    }
}

impl PushPlatform<DingTalkConfig> for DingTalkGroupBotPlatform {
    fn new(config: DingTalkConfig) -> Result<Self, PushError>
    where
        Self: Sized,
    {
        Self::with_clock(config, Arc::new(SystemClock))
    }
}

impl DingTalkGroupBotPlatform {
    pub fn with_clock(config: DingTalkConfig, clock: Arc<dyn Clock>) -> Result<Self, PushError> {
        let endpoint = Endpoint::new(&config.webhook, config.secret.as_deref())?;
        debug!(
            "DingTalk bot ready: signed={}, pc_slide={}, fail_notice={}",
            endpoint.is_signed(),
            config.pc_slide,
            config.fail_notice
        );
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout()))
            .build()
            .map_err(|e| PushError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            links: LinkRewriter::new(config.pc_slide),
            config,
            endpoint,
            window: Mutex::new(SendWindow::new()),
            clock,
            http_client,
        })
    }

    /// 发送消息并返回钉钉的原始响应，`errcode` 非 0 时同样返回 `Ok`
    pub async fn send_message(&self, message: &MessageType) -> Result<DingTalkResponse, PushError> {
        let payload = DingTalkPayload::build(message, &self.links)?;
        debug!("Sending {} message", message.kind());
        self.post(&payload).await
    }

    /// 记录本次发送；超过每分钟 20 条时挂起当前任务直到窗口允许
    async fn throttle(&self, now: DateTime<Utc>) {
        let wait = self
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .admit(now);

        if let Some(wait) = wait {
            info!(
                "More than {WINDOW_CAPACITY} messages within a minute, waiting {}s",
                wait.as_secs()
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn post(&self, payload: &DingTalkPayload) -> Result<DingTalkResponse, PushError> {
        self.throttle(self.clock.now()).await;
        // 限流等待之后再取签名，保证发出时签名未过期
        let url = self.endpoint.url_at(self.clock.now())?;

        let body = serde_json::to_string(payload).map_err(PushError::send)?;
        let (status, text) = self.post_json(url.clone(), body.clone()).await?;
        if !status.is_success() {
            return Err(PushError::TransportError {
                status: status.as_u16(),
                body: text,
            });
        }

        let response: DingTalkResponse = serde_json::from_str(&text).map_err(PushError::send)?;
        if !response.is_ok() {
            warn!(
                "DingTalk API error: code={}, message={}",
                response.errcode, response.errmsg
            );
            if self.config.fail_notice {
                self.notify_failure(url, &response.errmsg, &body).await;
            }
        }

        Ok(response)
    }

    async fn post_json(&self, url: Url, body: String) -> Result<(StatusCode, String), PushError> {
        let response = self
            .http_client
            .post(url)
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .body(body)
            .send()
            .await
            .map_err(PushError::send)?;

        let status = response.status();
        let text = response.text().await.map_err(PushError::send)?;
        Ok((status, text))
    }

    /// 失败提醒只尝试一次，不经过限流，自身的失败只记日志
    async fn notify_failure(&self, url: Url, reason: &str, original: &str) {
        let failed_at = self
            .clock
            .now()
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let content = format!(
            "[异常通知] 钉钉机器人消息发送失败\n失败时间：{failed_at}\n失败原因：{reason}\n原始消息：{original}\n请及时跟进"
        );

        if let Err(e) = self.send_notice(url, &content).await {
            warn!("Failed to deliver failure notice: {e}");
        }
    }

    async fn send_notice(&self, url: Url, content: &str) -> Result<(), PushError> {
        let notice = DingTalkPayload::text(content, &Mentions::none())?;
        let body = serde_json::to_string(&notice).map_err(PushError::send)?;
        let (status, text) = self.post_json(url, body).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(PushError::TransportError {
                status: status.as_u16(),
                body: text,
            })
        }
    }
}

// --- Platform Factory ---

pub struct DingTalkPlatformFactory;

impl PlatformFactory for DingTalkPlatformFactory {
    fn create(&self, config: Value) -> Result<Box<dyn PushPlatformCapabilities>, PushError> {
        let config: DingTalkConfig =
            serde_json::from_value(config).map_err(|e| PushError::ConfigError(e.to_string()))?;
        let platform = DingTalkGroupBotPlatform::new(config)?;
        Ok(Box::new(platform))
    }

    fn name(&self) -> &'static str {
        PLATFORM_NAME
    }
}
