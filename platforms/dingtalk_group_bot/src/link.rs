use regex::{Captures, Regex};
use std::sync::LazyLock;
use url::form_urlencoded;

const DEEP_LINK_BASE: &str = "dingtalk://dingtalkclient/page/link";

// `[text](url)`，前面的 `!` 单独捕获以便跳过图片
static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(!?)\[(.*?)\]\((.*?)\)").expect("valid markdown link regex"));

/// 把普通链接改写为钉钉客户端内打开的 deep link
///
/// `pc_slide` 为 true 时在 PC 端侧边栏打开，否则用浏览器打开。
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkRewriter {
    pub pc_slide: bool,
}

impl LinkRewriter {
    pub fn new(pc_slide: bool) -> Self {
        Self { pc_slide }
    }

    pub fn rewrite(&self, url: &str) -> String {
        let encoded: String = form_urlencoded::byte_serialize(url.as_bytes()).collect();
        format!("{DEEP_LINK_BASE}?url={encoded}&pc_slide={}", self.pc_slide)
    }

    /// 只改写 Markdown 中 `[text](url)` 的 url 部分，图片 `![alt](src)` 保持不变
    pub fn rewrite_markdown(&self, text: &str) -> String {
        MARKDOWN_LINK
            .replace_all(text, |caps: &Captures| {
                let url = &caps[3];
                if &caps[1] == "!" || url.trim().is_empty() {
                    return caps[0].to_string();
                }
                format!("[{}]({})", &caps[2], self.rewrite(url))
            })
            .into_owned()
    }
}
