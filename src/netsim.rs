//! Network-restriction simulation hooks: optional, global
//! rate/latency/loss shaping applied to a connection's writer side
//! only, configured once at startup. Used by scenario authors who
//! want to study the reputation engine's and aggregation buffer's
//! behavior under a degraded network without standing up real
//! network impairment tooling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;

/// Shaping parameters for one simulated network profile. `None`
/// fields disable that dimension of shaping.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkSimConfig {
    /// Extra delay applied before every outbound frame.
    pub latency: Option<Duration>,
    /// Probability in `[0.0, 1.0]` that an outbound frame is dropped
    /// instead of sent.
    pub loss: Option<f64>,
    /// Maximum outbound bytes per second; frames beyond the budget
    /// wait for the next refill rather than being dropped.
    pub rate_bytes_per_sec: Option<u64>,
}

/// Shared, immutable-after-construction shaping profile plus the
/// mutable token-bucket state backing the rate limit. One instance is
/// configured at node startup and handed to every `Connection`'s
/// writer task.
pub struct NetworkSim {
    config: NetworkSimConfig,
    tokens: AtomicU64,
    last_refill: AtomicU64,
    started: std::time::Instant,
}

impl NetworkSim {
    pub fn new(config: NetworkSimConfig) -> Self {
        Self {
            config,
            tokens: AtomicU64::new(config.rate_bytes_per_sec.unwrap_or(u64::MAX)),
            last_refill: AtomicU64::new(0),
            started: std::time::Instant::now(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(NetworkSimConfig::default())
    }

    /// Whether this frame should be dropped outright, per the
    /// configured loss probability.
    pub fn should_drop(&self) -> bool {
        match self.config.loss {
            Some(p) if p > 0.0 => rand::thread_rng().gen_bool(p.clamp(0.0, 1.0)),
            _ => false,
        }
    }

    pub fn extra_latency(&self) -> Duration {
        self.config.latency.unwrap_or_default()
    }

    /// Blocks (conceptually; callers `.await` the returned duration as
    /// a sleep) until `bytes` worth of budget is available under the
    /// configured rate limit. Returns zero when no rate limit is set.
    pub fn rate_limit_wait(&self, bytes: usize) -> Duration {
        let Some(rate) = self.config.rate_bytes_per_sec else {
            return Duration::ZERO;
        };
        if rate == 0 {
            return Duration::from_secs(3600);
        }

        self.refill(rate);

        let bytes = bytes as u64;
        let available = self.tokens.load(Ordering::Acquire);
        if available >= bytes {
            self.tokens.fetch_sub(bytes, Ordering::AcqRel);
            Duration::ZERO
        } else {
            let deficit = bytes - available;
            self.tokens.store(0, Ordering::Release);
            Duration::from_secs_f64(deficit as f64 / rate as f64)
        }
    }

    fn refill(&self, rate: u64) {
        let now = self.started.elapsed().as_millis() as u64;
        let last = self.last_refill.swap(now, Ordering::AcqRel);
        let elapsed_ms = now.saturating_sub(last);
        if elapsed_ms == 0 {
            return;
        }
        let refill = (rate as u128 * elapsed_ms as u128 / 1000) as u64;
        if refill > 0 {
            self.tokens.fetch_add(refill, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sim_never_drops_or_delays() {
        let sim = NetworkSim::disabled();
        assert!(!sim.should_drop());
        assert_eq!(sim.extra_latency(), Duration::ZERO);
        assert_eq!(sim.rate_limit_wait(1_000_000), Duration::ZERO);
    }

    #[test]
    fn full_loss_always_drops() {
        let sim = NetworkSim::new(NetworkSimConfig {
            loss: Some(1.0),
            ..Default::default()
        });
        assert!(sim.should_drop());
    }

    #[test]
    fn zero_rate_stalls_indefinitely() {
        let sim = NetworkSim::new(NetworkSimConfig {
            rate_bytes_per_sec: Some(0),
            ..Default::default()
        });
        assert!(sim.rate_limit_wait(1) > Duration::from_secs(1));
    }
}
