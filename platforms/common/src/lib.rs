use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// 推送平台错误类型
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// 消息字段缺失或为空，在发起网络请求之前返回
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// 服务端返回非 2xx 状态码
    #[error("Transport error: status={status}, body={body}")]
    TransportError { status: u16, body: String },

    /// 发送过程中的其他失败（网络、序列化等），保留原始错误
    #[error("Send failed: {0}")]
    SendError(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Signing error: {0}")]
    SignError(String),
}

impl PushError {
    /// 将任意错误包装为 `SendError`
    pub fn send<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PushError::SendError(Box::new(err))
    }
}

use serde::{Deserialize, Serialize};

/// @提及对象
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mentions {
    /// 是否@所有人
    #[serde(default)]
    pub at_all: bool,
    /// 被@人的手机号
    #[serde(default)]
    pub mobiles: Vec<String>,
    /// 被@人的用户ID
    #[serde(default)]
    pub user_ids: Vec<String>,
    /// 是否自动在正文末尾追加 `@手机号`
    #[serde(default = "default_auto_at")]
    pub auto_at: bool,
}

fn default_auto_at() -> bool {
    true
}

impl Default for Mentions {
    fn default() -> Self {
        Self {
            at_all: false,
            mobiles: Vec::new(),
            user_ids: Vec::new(),
            auto_at: default_auto_at(),
        }
    }
}

impl Mentions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            at_all: true,
            ..Self::none()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.at_all && self.mobiles.is_empty() && self.user_ids.is_empty()
    }
}

/// 卡片条目，用作 ActionCard 的按钮或 FeedCard 的链接
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardItem {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub pic_url: Option<String>,
}

impl CardItem {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            pic_url: None,
        }
    }

    pub fn with_pic(mut self, pic_url: impl Into<String>) -> Self {
        self.pic_url = Some(pic_url.into());
        self
    }
}

/// 按钮排列方向
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BtnOrientation {
    #[default]
    Vertical,
    Horizontal,
}

/// ActionCard 消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCard {
    pub title: String,
    pub text: String,
    pub buttons: Vec<CardItem>,
    #[serde(default)]
    pub btn_orientation: BtnOrientation,
    #[serde(default)]
    pub hide_avatar: bool,
}

impl ActionCard {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            buttons: Vec::new(),
            btn_orientation: BtnOrientation::default(),
            hide_avatar: false,
        }
    }

    /// 追加一个按钮
    pub fn button(mut self, title: impl Into<String>, url: impl Into<String>) -> Self {
        self.buttons.push(CardItem::new(title, url));
        self
    }

    pub fn orientation(mut self, orientation: BtnOrientation) -> Self {
        self.btn_orientation = orientation;
        self
    }

    pub fn hide_avatar(mut self, hide: bool) -> Self {
        self.hide_avatar = hide;
        self
    }
}

/// 消息类型枚举
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum MessageType {
    /// 纯文本消息
    Text {
        content: String,
        #[serde(default = "Mentions::none")]
        mentions: Mentions,
    },
    /// 图片消息
    Image { url: String },
    /// 链接消息
    Link {
        title: String,
        text: String,
        url: String,
        #[serde(default)]
        pic_url: Option<String>,
    },
    /// Markdown格式消息
    Markdown {
        title: String,
        text: String,
        #[serde(default = "Mentions::none")]
        mentions: Mentions,
    },
    /// 按钮卡片消息
    ActionCard(ActionCard),
    /// 多条图文链接消息
    FeedCard(Vec<CardItem>),
}

impl MessageType {
    /// 消息类型名称，用于日志
    pub fn kind(&self) -> &'static str {
        match self {
            MessageType::Text { .. } => "text",
            MessageType::Image { .. } => "image",
            MessageType::Link { .. } => "link",
            MessageType::Markdown { .. } => "markdown",
            MessageType::ActionCard(_) => "actionCard",
            MessageType::FeedCard(_) => "feedCard",
        }
    }
}

/// 推送结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResult {
    /// 是否成功
    pub success: bool,
    /// 平台返回的错误码
    pub error_code: Option<i64>,
    /// 平台返回的错误信息
    pub error_message: Option<String>,
    /// 响应信息
    pub response: Option<String>,
    /// 时间戳
    pub timestamp: DateTime<Utc>,
}

impl Default for PushResult {
    fn default() -> Self {
        Self {
            success: false,
            error_code: None,
            error_message: None,
            response: None,
            timestamp: Utc::now(),
        }
    }
}

/// 初始化配置trait
pub trait PushInitConfig: Send + Sync {
    /// 获取平台名称
    fn platform_name(&self) -> &str;

    /// 获取webhook URL
    fn webhook_url(&self) -> String;

    /// 获取密钥
    fn secret(&self) -> Option<&str>;

    /// 获取超时时间（秒）
    fn timeout(&self) -> u64;
}

/// 推送平台能力trait（用于dyn兼容）
///
/// 具体平台只需实现 `send`，其余方法默认构造对应的 [`MessageType`] 后转发。
#[async_trait]
pub trait PushPlatformCapabilities: Send + Sync {
    /// 通用发送方法
    async fn send(&self, message: MessageType) -> Result<PushResult, PushError>;

    /// 发送纯文本消息
    async fn send_text(&self, content: &str) -> Result<PushResult, PushError> {
        self.send(MessageType::Text {
            content: content.to_string(),
            mentions: Mentions::none(),
        })
        .await
    }

    async fn send_text_with_mention(
        &self,
        content: &str,
        mentions: Mentions,
    ) -> Result<PushResult, PushError> {
        self.send(MessageType::Text {
            content: content.to_string(),
            mentions,
        })
        .await
    }

    /// 发送Markdown消息
    async fn send_markdown(&self, title: &str, text: &str) -> Result<PushResult, PushError> {
        self.send(MessageType::Markdown {
            title: title.to_string(),
            text: text.to_string(),
            mentions: Mentions::none(),
        })
        .await
    }

    /// 发送图片消息
    async fn send_image(&self, image_url: &str) -> Result<PushResult, PushError> {
        self.send(MessageType::Image {
            url: image_url.to_string(),
        })
        .await
    }

    /// 发送链接消息
    async fn send_link(
        &self,
        title: &str,
        text: &str,
        url: &str,
        pic_url: Option<&str>,
    ) -> Result<PushResult, PushError> {
        self.send(MessageType::Link {
            title: title.to_string(),
            text: text.to_string(),
            url: url.to_string(),
            pic_url: pic_url.map(str::to_string),
        })
        .await
    }

    async fn send_action_card(&self, card: ActionCard) -> Result<PushResult, PushError> {
        self.send(MessageType::ActionCard(card)).await
    }

    async fn send_feed_card(&self, links: Vec<CardItem>) -> Result<PushResult, PushError> {
        self.send(MessageType::FeedCard(links)).await
    }

    /// 平台名称
    fn name(&self) -> &str;
}

/// 推送平台trait（用于具体实现）
pub trait PushPlatform<C: PushInitConfig>: PushPlatformCapabilities {
    /// 创建一个新的推送平台实例
    fn new(config: C) -> Result<Self, PushError>
    where
        Self: Sized;
}

/// 消息构建器
pub struct MessageBuilder {
    message_type: MessageType,
}

impl MessageBuilder {
    /// 创建文本消息构建器
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Text {
                content: content.into(),
                mentions: Mentions::none(),
            },
        }
    }

    /// 创建Markdown消息构建器
    pub fn markdown(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Markdown {
                title: title.into(),
                text: text.into(),
                mentions: Mentions::none(),
            },
        }
    }

    fn mentions_mut(&mut self) -> Option<&mut Mentions> {
        match &mut self.message_type {
            MessageType::Text { mentions, .. } | MessageType::Markdown { mentions, .. } => {
                Some(mentions)
            }
            _ => None,
        }
    }

    /// @所有人
    pub fn at_all(mut self) -> Self {
        if let Some(m) = self.mentions_mut() {
            m.at_all = true;
        }
        self
    }

    /// 按手机号@
    pub fn mention_mobile(mut self, mobile: impl Into<String>) -> Self {
        if let Some(m) = self.mentions_mut() {
            m.mobiles.push(mobile.into());
        }
        self
    }

    /// 按用户ID@
    pub fn mention_user(mut self, user_id: impl Into<String>) -> Self {
        if let Some(m) = self.mentions_mut() {
            m.user_ids.push(user_id.into());
        }
        self
    }

    /// 关闭正文末尾自动追加 `@手机号`
    pub fn without_auto_at(mut self) -> Self {
        if let Some(m) = self.mentions_mut() {
            m.auto_at = false;
        }
        self
    }

    /// 构建消息
    pub fn build(self) -> MessageType {
        self.message_type
    }
}

/// 平台工厂trait
pub trait PlatformFactory: Send + Sync {
    /// 根据JSON Value创建平台实例
    fn create(&self, config: Value) -> Result<Box<dyn PushPlatformCapabilities>, PushError>;

    /// 获取平台名称
    fn name(&self) -> &'static str;
}

/// 平台注册表
#[derive(Default)]
pub struct PlatformRegistry {
    factories: std::collections::HashMap<String, Box<dyn PlatformFactory>>,
}

impl PlatformRegistry {
    /// 创建新的注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册平台工厂
    pub fn register(&mut self, factory: Box<dyn PlatformFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    /// 获取平台工厂
    pub fn get_factory(&self, name: &str) -> Option<&dyn PlatformFactory> {
        self.factories.get(name).map(|f| f.as_ref())
    }

    /// 获取所有支持的平台名称
    pub fn list_platforms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
