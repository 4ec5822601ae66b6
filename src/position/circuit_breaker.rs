//! Portfolio circuit breaker.
//!
//! Trips after a run of losing closes or when the day's realized loss crosses
//! the configured share of total capital. While tripped, new entries are
//! refused; monitoring and exits carry on. Expiry is checked lazily on the next
//! open attempt.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, instrument, warn};

use crate::config::TradingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TripReason {
    ConsecutiveLosses(u32),
    DailyLossLimit { loss_percent: f64 },
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripReason::ConsecutiveLosses(count) => write!(f, "{} consecutive losses", count),
            TripReason::DailyLossLimit { loss_percent } => {
                write!(f, "daily loss limit hit: {:.1}%", loss_percent)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BreakerState {
    Armed,
    Tripped { until: DateTime<Utc>, reason: TripReason },
}

/// Result of asking whether new entries are allowed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreakerCheck {
    Available,
    /// The pause just ran out on this check
    Resumed,
    Paused { until: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: BreakerState,
    consecutive_losses: u32,
    consecutive_loss_limit: u32,
    daily_loss_limit_percent: f64,
    pause_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(consecutive_loss_limit: u32, daily_loss_limit_percent: f64, pause_minutes: i64) -> Self {
        Self {
            state: BreakerState::Armed,
            consecutive_losses: 0,
            consecutive_loss_limit,
            daily_loss_limit_percent,
            pause_duration: Duration::minutes(pause_minutes),
        }
    }

    pub fn from_config(config: &TradingConfig) -> Self {
        Self::new(
            config.consecutive_loss_pause,
            config.daily_loss_limit_percent,
            config.pause_duration_minutes,
        )
    }

    pub fn state(&self) -> &BreakerState {
        &self.state
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    /// Pause expiry, if tripped. Does not check the clock.
    pub fn paused_until(&self) -> Option<DateTime<Utc>> {
        match self.state {
            BreakerState::Tripped { until, .. } => Some(until),
            BreakerState::Armed => None,
        }
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.paused_until().is_some_and(|until| now < until)
    }

    /// Gate for new entries. Re-arms the breaker once the pause has elapsed.
    #[instrument(skip(self))]
    pub fn check(&mut self, now: DateTime<Utc>) -> BreakerCheck {
        match self.state {
            BreakerState::Armed => BreakerCheck::Available,
            BreakerState::Tripped { until, .. } if now < until => BreakerCheck::Paused { until },
            BreakerState::Tripped { .. } => {
                self.state = BreakerState::Armed;
                info!("Circuit breaker pause expired, entries resumed");
                BreakerCheck::Resumed
            }
        }
    }

    /// Updates the loss streak for a closed position and trips if a limit is crossed.
    ///
    /// A zero P&L close counts as a win. Tripping while already tripped extends
    /// the pause from `now`.
    #[instrument(skip(self))]
    pub fn record_close(
        &mut self,
        pnl: f64,
        daily_pnl: f64,
        total_capital: f64,
        now: DateTime<Utc>,
    ) -> Option<(TripReason, DateTime<Utc>)> {
        if pnl >= 0.0 {
            self.consecutive_losses = 0;
            return None;
        }
        self.consecutive_losses += 1;

        let reason = if self.consecutive_losses >= self.consecutive_loss_limit {
            Some(TripReason::ConsecutiveLosses(self.consecutive_losses))
        } else {
            let loss_percent = if total_capital > 0.0 { daily_pnl / total_capital * 100.0 } else { 0.0 };
            (loss_percent <= -self.daily_loss_limit_percent).then_some(TripReason::DailyLossLimit { loss_percent })
        }?;

        let until = now + self.pause_duration;
        self.state = BreakerState::Tripped { until, reason };
        warn!("Circuit breaker tripped: {}. Entries paused until {}", reason, until);
        Some((reason, until))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, 15.0, 240)
    }

    #[test]
    fn test_trips_after_consecutive_losses() {
        let mut breaker = create_test_breaker();
        let now = Utc::now();

        assert!(breaker.record_close(-1.0, -1.0, 100.0, now).is_none());
        assert!(breaker.record_close(-1.0, -2.0, 100.0, now).is_none());
        let (reason, until) = breaker.record_close(-1.0, -3.0, 100.0, now).unwrap();

        assert_eq!(reason, TripReason::ConsecutiveLosses(3));
        assert_eq!(until, now + Duration::minutes(240));
        assert!(breaker.is_paused(now));
    }

    #[test]
    fn test_win_resets_streak() {
        let mut breaker = create_test_breaker();
        let now = Utc::now();

        breaker.record_close(-1.0, -1.0, 100.0, now);
        breaker.record_close(-1.0, -2.0, 100.0, now);
        breaker.record_close(0.0, -2.0, 100.0, now);
        assert_eq!(breaker.consecutive_losses(), 0);
        assert!(breaker.record_close(-1.0, -3.0, 100.0, now).is_none());
    }

    #[test]
    fn test_daily_loss_limit_trips() {
        let mut breaker = create_test_breaker();
        let now = Utc::now();

        let (reason, _) = breaker.record_close(-15.0, -15.0, 100.0, now).unwrap();
        assert!(matches!(reason, TripReason::DailyLossLimit { .. }));
    }

    #[test]
    fn test_lazy_expiry_on_check() {
        let mut breaker = create_test_breaker();
        let now = Utc::now();
        breaker.record_close(-20.0, -20.0, 100.0, now);

        let until = now + Duration::minutes(240);
        assert_eq!(breaker.check(now + Duration::minutes(10)), BreakerCheck::Paused { until });
        assert_eq!(breaker.check(until), BreakerCheck::Resumed);
        assert_eq!(breaker.check(until), BreakerCheck::Available);
        assert_eq!(*breaker.state(), BreakerState::Armed);
    }
}
