use common::{PlatformRegistry, PushPlatformCapabilities};
use log::*;
use moka::sync::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// 最多缓存的平台实例数
const MAX_INSTANCES: u64 = 256;

/// 空闲超过该时长的实例被回收，此时其限流窗口早已过期
const INSTANCE_IDLE: Duration = Duration::from_secs(10 * 60);

/// 服务共享状态
///
/// 同一平台、同一配置复用同一个实例，签名缓存和限流窗口才能跨请求生效。
pub struct AppState {
    registry: PlatformRegistry,
    instances: Cache<String, Arc<dyn PushPlatformCapabilities>>,
}

impl AppState {
    pub fn new(registry: PlatformRegistry) -> Self {
        Self::with_capacity(registry, MAX_INSTANCES)
    }

    pub fn with_capacity(registry: PlatformRegistry, capacity: u64) -> Self {
        let instances = Cache::builder()
            .max_capacity(capacity)
            .time_to_idle(INSTANCE_IDLE)
            .eviction_listener(|key: Arc<String>, _, cause| {
                if cause.was_evicted() {
                    // key 中含 webhook 与密钥，只记录平台名
                    let platform = key.split(':').next().unwrap_or_default();
                    debug!("Evicted cached {platform} platform instance ({cause:?})");
                }
            })
            .build();

        Self {
            registry,
            instances,
        }
    }

    pub fn list_platforms(&self) -> Vec<String> {
        self.registry.list_platforms()
    }

    /// 取出或创建平台实例，失败时返回可直接回给调用方的说明
    ///
    /// 创建只锁住对应的 key，不阻塞其它配置的请求；失败的结果不会被缓存。
    pub fn platform(
        &self,
        name: &str,
        config: &Value,
    ) -> Result<Arc<dyn PushPlatformCapabilities>, String> {
        let factory = self
            .registry
            .get_factory(name)
            .ok_or_else(|| format!("Platform '{name}' not found"))?;

        let key = format!("{name}:{config}");
        self.instances
            .try_get_with(key, || {
                debug!("Creating new {name} platform instance");
                let platform: Arc<dyn PushPlatformCapabilities> = factory
                    .create(config.clone())
                    .map_err(|e| format!("Failed to create platform: {e}"))?
                    .into();
                Ok::<_, String>(platform)
            })
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dingtalk_group_bot::DingTalkPlatformFactory;
    use serde_json::json;

    fn registry() -> PlatformRegistry {
        let mut registry = PlatformRegistry::new();
        registry.register(Box::new(DingTalkPlatformFactory));
        registry
    }

    fn state() -> AppState {
        AppState::new(registry())
    }

    fn config(token: usize) -> Value {
        json!({"webhook": format!("https://oapi.dingtalk.com/robot/send?access_token={token}")})
    }

    #[test]
    fn test_same_config_reuses_instance() {
        let state = state();
        let first = state.platform("dingtalk", &config(1)).unwrap();
        let second = state.platform("dingtalk", &config(1)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let third = state.platform("dingtalk", &config(2)).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_instance_cache_is_bounded() {
        let state = AppState::with_capacity(registry(), 4);
        for token in 0..50 {
            let platform = state.platform("dingtalk", &config(token)).unwrap();
            assert_eq!(platform.name(), "dingtalk");
        }

        state.instances.run_pending_tasks();
        assert!(state.instances.entry_count() <= 4);
    }

    #[test]
    fn test_failed_creation_not_cached() {
        let state = state();
        let bad = json!({"webhook": "::not a url::"});
        let err = state.platform("dingtalk", &bad).err().unwrap();
        assert!(err.starts_with("Failed to create platform"));

        state.instances.run_pending_tasks();
        assert_eq!(state.instances.entry_count(), 0);
    }

    #[test]
    fn test_unknown_platform() {
        let err = state()
            .platform("slack", &json!({}))
            .err()
            .unwrap();
        assert_eq!(err, "Platform 'slack' not found");
    }
}
