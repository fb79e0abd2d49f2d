use std::time::Duration;

/// 连接错误的隐式重试策略
///
/// 重试次数有上限, 延迟按指数退避并加入少量抖动,
/// 避免网络抖动时所有描述符同时重连。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 每个描述符允许的最大连接重试次数
    pub max_connection_retries: u32,
    /// 首次重试的基础延迟
    pub base_delay: Duration,
    /// 延迟上限
    pub max_delay: Duration,
    /// 退避倍数
    pub backoff_multiplier: f64,
    /// 抖动比例(0.0 ~ 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_connection_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// attempt 为已经消耗的重试次数, 从 0 开始
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_connection_retries
    }

    /// 第 attempt 次重试前的等待时长
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exp as i32);
        let jitter = base * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let delay = (base + jitter).max(0.1);
        Duration::from_secs_f64(delay).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(100));
    }

    #[test]
    fn test_delay_grows_with_attempts() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..Default::default()
        };
        let d1 = policy.delay_for(1);
        let d2 = policy.delay_for(2);
        let d3 = policy.delay_for(3);
        assert!(d1 < d2, "延迟应当递增: {:?} {:?}", d1, d2);
        assert!(d2 < d3, "延迟应当递增: {:?} {:?}", d2, d3);
    }

    #[test]
    fn test_delay_respects_cap() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.0,
            ..Default::default()
        };
        assert!(policy.delay_for(30) <= Duration::from_secs(5));
    }

    #[test]
    fn test_delay_never_zero() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(0),
            jitter_factor: 0.0,
            ..Default::default()
        };
        assert!(policy.delay_for(1) >= Duration::from_millis(100));
    }
}
