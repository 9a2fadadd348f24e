use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

/// 窗口内允许的最大发送次数
pub const WINDOW_CAPACITY: usize = 20;

/// 滑动窗口长度（毫秒）
pub const WINDOW_MS: i64 = 60 * 1000;

/// 最近发送时间的滑动窗口，钉钉限制每个机器人每分钟最多 20 条
#[derive(Debug, Default)]
pub struct SendWindow {
    stamps: VecDeque<DateTime<Utc>>,
}

impl SendWindow {
    pub fn new() -> Self {
        Self {
            stamps: VecDeque::with_capacity(WINDOW_CAPACITY + 1),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.stamps.len()
    }

    /// 记录一次发送，返回发送前需要等待的时长。
    ///
    /// 第 21 次记录会挤出最早的一条；若最早那条距 `now` 不足 60 秒，
    /// 需等待 `trunc(60 - elapsed) + 1` 秒。
    pub fn admit(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        self.stamps.push_back(now);
        if self.stamps.len() <= WINDOW_CAPACITY {
            return None;
        }

        let oldest = self.stamps.pop_front()?;
        let elapsed_ms = (now - oldest).num_milliseconds();
        if elapsed_ms >= WINDOW_MS {
            return None;
        }

        // elapsed 可能为负（时钟回拨），此时按等满一个窗口处理
        let remaining_ms = (WINDOW_MS - elapsed_ms).min(WINDOW_MS);
        let wait_secs = remaining_ms / 1000 + 1;
        Some(Duration::from_secs(wait_secs as u64))
    }
}
