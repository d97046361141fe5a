use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{self, Interval, MissedTickBehavior};

/// Source of reconciliation ticks
#[async_trait]
pub trait Ticker: Send {
    /// Resolve when the next tick is due
    async fn tick(&mut self);
}

/// Fixed-period ticker; the first tick completes immediately
#[derive(Debug)]
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
