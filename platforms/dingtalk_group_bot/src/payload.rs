//! 钉钉机器人消息体
//!
//! 每种消息类型对应一个变体，序列化结果即为 webhook 请求体。

use crate::link::LinkRewriter;
use common::{ActionCard, BtnOrientation, CardItem, Mentions, MessageType, PushError};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "msgtype")]
pub enum DingTalkPayload {
    #[serde(rename = "text")]
    Text {
        text: TextBody,
        #[serde(skip_serializing_if = "At::is_empty")]
        at: At,
    },
    #[serde(rename = "image")]
    Image { image: ImageBody },
    #[serde(rename = "link")]
    Link { link: LinkBody },
    #[serde(rename = "markdown")]
    Markdown {
        markdown: MarkdownBody,
        #[serde(skip_serializing_if = "At::is_empty")]
        at: At,
    },
    #[serde(rename = "actionCard")]
    ActionCard {
        #[serde(rename = "actionCard")]
        action_card: ActionCardBody,
    },
    #[serde(rename = "feedCard")]
    FeedCard {
        #[serde(rename = "feedCard")]
        feed_card: FeedCardBody,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TextBody {
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct At {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_at_all: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub at_mobiles: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub at_user_ids: Vec<String>,
}

impl At {
    fn is_empty(&self) -> bool {
        !self.is_at_all && self.at_mobiles.is_empty() && self.at_user_ids.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageBody {
    #[serde(rename = "picURL")]
    pub pic_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkBody {
    pub text: String,
    pub title: String,
    pub pic_url: String,
    pub message_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkdownBody {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCardBody {
    pub title: String,
    pub text: String,
    pub hide_avatar: String,
    pub btn_orientation: String,
    #[serde(flatten)]
    pub buttons: Buttons,
}

/// 一个按钮时整张卡片可点击，多个按钮时各自跳转
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Buttons {
    Single {
        #[serde(rename = "singleTitle")]
        single_title: String,
        #[serde(rename = "singleURL")]
        single_url: String,
    },
    Independent { btns: Vec<Button> },
}

#[derive(Debug, Clone, Serialize)]
pub struct Button {
    pub title: String,
    #[serde(rename = "actionURL")]
    pub action_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedCardBody {
    pub links: Vec<FeedLink>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedLink {
    pub title: String,
    #[serde(rename = "messageURL")]
    pub message_url: String,
    #[serde(rename = "picURL", skip_serializing_if = "Option::is_none")]
    pub pic_url: Option<String>,
}

fn require(value: &str, what: &str) -> Result<(), PushError> {
    if value.trim().is_empty() {
        return Err(PushError::ValidationError(format!("{what} must not be blank")));
    }
    Ok(())
}

fn validate_item(item: &CardItem, what: &str) -> Result<(), PushError> {
    require(&item.title, &format!("{what} title"))?;
    require(&item.url, &format!("{what} url"))
}

/// 正文与 @ 信息；开启 auto_at 时在正文末尾追加 `\n@手机号`
fn with_mentions(mut content: String, mentions: &Mentions) -> (String, At) {
    if !mentions.mobiles.is_empty() && mentions.auto_at {
        content.push_str("\n@");
        content.push_str(&mentions.mobiles.join("@"));
    }
    let at = At {
        is_at_all: mentions.at_all,
        at_mobiles: mentions.mobiles.clone(),
        at_user_ids: mentions.user_ids.clone(),
    };
    (content, at)
}

fn orientation_flag(orientation: BtnOrientation) -> &'static str {
    match orientation {
        BtnOrientation::Vertical => "0",
        BtnOrientation::Horizontal => "1",
    }
}

impl DingTalkPayload {
    /// 校验必填字段并生成请求体，链接字段经过 `links` 改写
    pub fn build(message: &MessageType, links: &LinkRewriter) -> Result<Self, PushError> {
        match message {
            MessageType::Text { content, mentions } => Self::text(content, mentions),
            MessageType::Image { url } => {
                require(url, "image url")?;
                Ok(DingTalkPayload::Image {
                    image: ImageBody {
                        pic_url: url.clone(),
                    },
                })
            }
            MessageType::Link {
                title,
                text,
                url,
                pic_url,
            } => {
                require(title, "link title")?;
                require(text, "link text")?;
                require(url, "link url")?;
                Ok(DingTalkPayload::Link {
                    link: LinkBody {
                        text: text.clone(),
                        title: title.clone(),
                        pic_url: pic_url.clone().unwrap_or_default(),
                        message_url: links.rewrite(url),
                    },
                })
            }
            MessageType::Markdown {
                title,
                text,
                mentions,
            } => {
                require(title, "markdown title")?;
                require(text, "markdown text")?;
                let (text, at) = with_mentions(links.rewrite_markdown(text), mentions);
                Ok(DingTalkPayload::Markdown {
                    markdown: MarkdownBody {
                        title: title.clone(),
                        text,
                    },
                    at,
                })
            }
            MessageType::ActionCard(card) => Self::action_card(card, links),
            MessageType::FeedCard(items) => {
                if items.is_empty() {
                    return Err(PushError::ValidationError(
                        "feed card must contain at least one link".to_string(),
                    ));
                }
                let feed_links = items
                    .iter()
                    .map(|item| {
                        validate_item(item, "feed card link")?;
                        Ok(FeedLink {
                            title: item.title.clone(),
                            message_url: links.rewrite(&item.url),
                            pic_url: item.pic_url.clone().filter(|p| !p.trim().is_empty()),
                        })
                    })
                    .collect::<Result<Vec<_>, PushError>>()?;
                Ok(DingTalkPayload::FeedCard {
                    feed_card: FeedCardBody { links: feed_links },
                })
            }
        }
    }

    /// 纯文本消息，也用于发送失败提醒
    pub fn text(content: &str, mentions: &Mentions) -> Result<Self, PushError> {
        require(content, "text content")?;
        let (content, at) = with_mentions(content.to_string(), mentions);
        Ok(DingTalkPayload::Text {
            text: TextBody { content },
            at,
        })
    }

    fn action_card(card: &ActionCard, links: &LinkRewriter) -> Result<Self, PushError> {
        require(&card.title, "action card title")?;
        require(&card.text, "action card text")?;
        for item in &card.buttons {
            validate_item(item, "action card button")?;
        }

        let buttons = match card.buttons.as_slice() {
            [] => {
                return Err(PushError::ValidationError(
                    "action card must contain at least one button".to_string(),
                ));
            }
            [only] => Buttons::Single {
                single_title: only.title.clone(),
                single_url: links.rewrite(&only.url),
            },
            many => Buttons::Independent {
                btns: many
                    .iter()
                    .map(|b| Button {
                        title: b.title.clone(),
                        action_url: links.rewrite(&b.url),
                    })
                    .collect(),
            },
        };

        Ok(DingTalkPayload::ActionCard {
            action_card: ActionCardBody {
                title: card.title.clone(),
                text: card.text.clone(),
                hide_avatar: if card.hide_avatar { "1" } else { "0" }.to_string(),
                btn_orientation: orientation_flag(card.btn_orientation).to_string(),
                buttons,
            },
        })
    }
}
