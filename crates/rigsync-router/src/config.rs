//! Router configuration.

use std::time::Duration;

/// Timings and set-points of one node's router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Target sensor temperature used by pre-cool.
    pub pre_cool_temp: f64,
    /// Whether local mount/scheduler changes drive the thermal policy.
    /// Followers drive it from the mirrored leader state instead.
    pub local_thermal_policy: bool,
    /// How long the application entry object may stay unreachable
    /// before the application is relaunched.
    pub reach_timeout: Duration,
    /// Pause after a relaunch before probing again.
    pub relaunch_grace: Duration,
    /// Poll interval while waiting for the application.
    pub startup_poll: Duration,
    /// Readiness check interval once ready.
    pub ready_poll: Duration,
    /// Thermal controller tick.
    pub thermal_period: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            pre_cool_temp: -15.0,
            local_thermal_policy: true,
            reach_timeout: Duration::from_secs(15),
            relaunch_grace: Duration::from_secs(10),
            startup_poll: Duration::from_secs(1),
            ready_poll: Duration::from_secs(5),
            thermal_period: Duration::from_secs(1),
        }
    }
}

impl RouterConfig {
    pub fn with_pre_cool_temp(mut self, celsius: f64) -> Self {
        self.pre_cool_temp = celsius;
        self
    }

    pub fn with_local_thermal_policy(mut self, enabled: bool) -> Self {
        self.local_thermal_policy = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_supervision_timings() {
        let config = RouterConfig::default();
        assert_eq!(config.reach_timeout, Duration::from_secs(15));
        assert_eq!(config.ready_poll, Duration::from_secs(5));
        assert!(config.local_thermal_policy);
    }

    #[test]
    fn builders_override() {
        let config = RouterConfig::default()
            .with_pre_cool_temp(-5.0)
            .with_local_thermal_policy(false);
        assert_eq!(config.pre_cool_temp, -5.0);
        assert!(!config.local_thermal_policy);
    }
}
