use podforge_config::RecoveryConfig;
use std::time::Duration;

/// ジッターなしの指数バックオフ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&RecoveryConfig::default())
    }
}

impl From<&RecoveryConfig> for Backoff {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            min: config.min_wait,
            max: config.max_wait,
            factor: config.factor,
        }
    }
}

impl Backoff {
    /// `attempt` 回目のリトライまでの待ち時間: `min(max(min * factor^attempt, min), max)`
    pub fn for_attempt(&self, attempt: u32) -> Duration {
        let min = self.min.as_secs_f64();
        let max = self.max.as_secs_f64();
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let wait = min * self.factor.powi(exponent);

        if !wait.is_finite() || wait >= max {
            return self.max;
        }
        Duration::from_secs_f64(wait.max(min))
    }
}
