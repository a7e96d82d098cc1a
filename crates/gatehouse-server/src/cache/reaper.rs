//! Idle connection eviction for the Redis pool.

use std::cell::Cell;
use std::time::Duration;

use deadpool_redis::Pool;
use tokio::task::JoinHandle;

/// Periodically closes pooled connections that sat idle longer than
/// `idle_timeout`, keeping at least `min_idle` of them open.
pub struct IdleConnectionReaper {
    pub pool: Pool,
    pub idle_timeout: Duration,
    pub min_idle: usize,
}

impl IdleConnectionReaper {
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = (self.idle_timeout / 2).max(Duration::from_secs(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let closed = self.reap();
                if closed > 0 {
                    tracing::debug!(closed, "closed idle Redis connections");
                }
            }
        })
    }

    /// Runs one eviction pass and returns how many connections were closed.
    pub fn reap(&self) -> usize {
        let status = self.pool.status();
        let allowed = status.available.saturating_sub(self.min_idle);
        let budget = Cell::new(allowed);
        let idle_timeout = self.idle_timeout;

        self.pool.retain(|_, metrics| {
            if budget.get() == 0 || metrics.last_used() < idle_timeout {
                return true;
            }
            budget.set(budget.get() - 1);
            false
        });
        allowed - budget.get()
    }
}
