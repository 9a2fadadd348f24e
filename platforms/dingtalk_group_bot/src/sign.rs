//! 加签：`sign = urlEncode(base64(HMAC-SHA256(secret, "{timestamp}\n{secret}")))`
//!
//! 配置的 webhook 地址保持不变，每次发送时在其上拼接 `timestamp` 与 `sign`，
//! 签名超过一小时后重新计算。

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::{DateTime, Utc};
use common::PushError;
use hmac::{Hmac, Mac};
use log::*;
use reqwest::Url;
use sha2::Sha256;
use std::sync::{Mutex, PoisonError};

type HmacSha256 = Hmac<Sha256>;

/// 加签密钥前缀
pub const SECRET_PREFIX: &str = "SEC";

/// 签名有效期（毫秒）
pub const SIGN_TTL_MS: i64 = 3600 * 1000;

/// 计算签名，返回未经 URL 编码的 base64 字符串
pub fn sign(secret: &str, timestamp_ms: i64) -> Result<String, PushError> {
    let string_to_sign = format!("{timestamp_ms}\n{secret}");

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PushError::SignError(format!("Failed to create HMAC: {e}")))?;
    mac.update(string_to_sign.as_bytes());

    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub timestamp_ms: i64,
    pub sign: String,
}

impl Signature {
    fn create(secret: &str, now: DateTime<Utc>) -> Result<Self, PushError> {
        let timestamp_ms = now.timestamp_millis();
        Ok(Self {
            timestamp_ms,
            sign: sign(secret, timestamp_ms)?,
        })
    }

    fn expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() - self.timestamp_ms >= SIGN_TTL_MS
    }
}

/// 发送目标：不可变的基础地址 + 按需刷新的签名
#[derive(Debug)]
pub struct Endpoint {
    base: Url,
    secret: Option<String>,
    signature: Mutex<Option<Signature>>,
}

impl Endpoint {
    pub fn new(webhook: &str, secret: Option<&str>) -> Result<Self, PushError> {
        let mut base = Url::parse(webhook)
            .map_err(|e| PushError::ConfigError(format!("Invalid webhook url '{webhook}': {e}")))?;

        // 地址里残留的旧签名参数会在发送时重新生成
        let kept: Vec<(String, String)> = base
            .query_pairs()
            .filter(|(k, _)| k != "timestamp" && k != "sign")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        base.set_query(None);
        if !kept.is_empty() {
            base.query_pairs_mut().extend_pairs(kept);
        }

        let secret = match secret {
            Some(s) if s.starts_with(SECRET_PREFIX) => Some(s.to_string()),
            Some(_) => {
                warn!("Secret does not start with '{SECRET_PREFIX}', requests will not be signed");
                None
            }
            None => None,
        };

        Ok(Self {
            base,
            secret,
            signature: Mutex::new(None),
        })
    }

    /// 是否启用加签
    pub fn is_signed(&self) -> bool {
        self.secret.is_some()
    }

    /// 最近一次生成的签名
    pub fn signature(&self) -> Option<Signature> {
        self.signature
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 返回 `now` 时刻应使用的发送地址，必要时刷新签名
    pub fn url_at(&self, now: DateTime<Utc>) -> Result<Url, PushError> {
        let Some(secret) = &self.secret else {
            return Ok(self.base.clone());
        };

        let signature = {
            let mut cached = self.signature.lock().unwrap_or_else(PoisonError::into_inner);
            let fresh = cached.as_ref().filter(|sig| !sig.expired_at(now)).cloned();
            match fresh {
                Some(sig) => sig,
                None => {
                    let sig = Signature::create(secret, now)?;
                    debug!("Refreshed webhook signature, timestamp={}", sig.timestamp_ms);
                    *cached = Some(sig.clone());
                    sig
                }
            }
        };

        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("timestamp", &signature.timestamp_ms.to_string())
            .append_pair("sign", &signature.sign);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const WEBHOOK: &str = "https://oapi.dingtalk.com/robot/send?access_token=abc";
    const SECRET: &str = "SECtest-secret";
    const T0: i64 = 1_700_000_000_000;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_sign_known_vector() {
        assert_eq!(
            sign(SECRET, T0).unwrap(),
            "LC7hxZ4wslL+P7j7gu1hoQ+wzByekL+yWgiUMekZs0g="
        );
    }

    #[test]
    fn test_signed_url_is_url_encoded() {
        let endpoint = Endpoint::new(WEBHOOK, Some(SECRET)).unwrap();
        let url = endpoint.url_at(at(T0)).unwrap();
        assert_eq!(
            url.as_str(),
            "https://oapi.dingtalk.com/robot/send?access_token=abc&timestamp=1700000000000\
             &sign=LC7hxZ4wslL%2BP7j7gu1hoQ%2BwzByekL%2ByWgiUMekZs0g%3D"
        );
    }

    #[test]
    fn test_signature_reused_within_an_hour() {
        let endpoint = Endpoint::new(WEBHOOK, Some(SECRET)).unwrap();
        let first = endpoint.url_at(at(T0)).unwrap();
        let later = endpoint
            .url_at(at(T0) + TimeDelta::seconds(3599))
            .unwrap();
        assert_eq!(first, later);
        assert_eq!(endpoint.signature().unwrap().timestamp_ms, T0);
    }

    #[test]
    fn test_signature_refreshed_after_an_hour() {
        let endpoint = Endpoint::new(WEBHOOK, Some(SECRET)).unwrap();
        endpoint.url_at(at(T0)).unwrap();
        let before = endpoint.signature().unwrap();

        let refreshed_at = T0 + SIGN_TTL_MS;
        let url = endpoint.url_at(at(refreshed_at)).unwrap();
        let after = endpoint.signature().unwrap();

        assert_ne!(before.sign, after.sign);
        assert_eq!(after.timestamp_ms, refreshed_at);
        assert_eq!(after.sign, "djPOcld+ul31RTK2PhLkXWwVp3BPJEBapRp5NBwunlw=");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("access_token".to_string(), "abc".to_string()),
                ("timestamp".to_string(), refreshed_at.to_string()),
                ("sign".to_string(), after.sign.clone()),
            ]
        );
    }

    #[test]
    fn test_stale_signature_params_replaced() {
        let stale = format!("{WEBHOOK}&timestamp=1&sign=old");
        let endpoint = Endpoint::new(&stale, Some(SECRET)).unwrap();
        let url = endpoint.url_at(at(T0)).unwrap();
        assert_eq!(url.query_pairs().filter(|(k, _)| k == "sign").count(), 1);
        assert!(!url.as_str().contains("sign=old"));
    }

    #[test]
    fn test_no_signing_without_prefixed_secret() {
        for secret in [None, Some("not-a-dingtalk-secret")] {
            let endpoint = Endpoint::new(WEBHOOK, secret).unwrap();
            assert!(!endpoint.is_signed());
            assert_eq!(endpoint.url_at(at(T0)).unwrap().as_str(), WEBHOOK);
            assert!(endpoint.signature().is_none());
        }
    }

    #[test]
    fn test_invalid_webhook_is_config_error() {
        let err = Endpoint::new("not a url", None).unwrap_err();
        assert!(matches!(err, PushError::ConfigError(_)));
    }
}
