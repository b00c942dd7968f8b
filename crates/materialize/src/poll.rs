//! Bounded polling policy and per-session poll progress

use std::time::Duration;

use tokio::time::Instant;

use crate::MaterializeError;

/// How long to wait for an artifact, and how often to look.
///
/// Every probe is preceded by one `interval`; the session times out after
/// `max_attempts` probes have come back not ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Result<Self, MaterializeError> {
        if max_attempts == 0 {
            return Err(MaterializeError::Configuration(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        if interval.is_zero() {
            return Err(MaterializeError::Configuration(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            interval,
        })
    }

    /// Apply `LIVEPUB_POLL_MAX_ATTEMPTS` / `LIVEPUB_POLL_INTERVAL_MS` on top of `base`.
    pub fn from_env(base: PollPolicy) -> Result<Self, MaterializeError> {
        use livepub_common::config::env_positive;

        let to_config_error = |e: anyhow::Error| MaterializeError::Configuration(format!("{e:#}"));

        let max_attempts = match env_positive("LIVEPUB_POLL_MAX_ATTEMPTS").map_err(to_config_error)? {
            Some(n) => u32::try_from(n).map_err(|_| {
                MaterializeError::Configuration(format!(
                    "LIVEPUB_POLL_MAX_ATTEMPTS is out of range: {n}"
                ))
            })?,
            None => base.max_attempts,
        };
        let interval = env_positive("LIVEPUB_POLL_INTERVAL_MS")
            .map_err(to_config_error)?
            .map(Duration::from_millis)
            .unwrap_or(base.interval);

        Self::new(max_attempts, interval)
    }

    /// Wait before the probe that follows `attempt` failed probes.
    pub fn delay_before(&self, _attempt: u32) -> Duration {
        self.interval
    }

    /// Total wait budget before the session gives up.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Progress of one session's polling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub interval: Duration,
    pub started_at: Instant,
}

impl PollState {
    pub fn start(policy: &PollPolicy) -> Self {
        Self::started_at(policy, Instant::now())
    }

    pub fn started_at(policy: &PollPolicy, started_at: Instant) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.max_attempts,
            interval: policy.interval,
            started_at,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    /// `min(elapsed / (max_attempts * interval), 1.0)`
    pub fn progress_fraction(&self) -> f64 {
        self.progress_fraction_at(Instant::now())
    }

    pub fn progress_fraction_at(&self, now: Instant) -> f64 {
        let budget = (self.interval * self.max_attempts).as_secs_f64();
        if budget <= 0.0 {
            return 1.0;
        }
        (self.elapsed_at(now).as_secs_f64() / budget).min(1.0)
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
