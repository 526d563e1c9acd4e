use common::types::{Position, PositionSide, RejectionReason, RiskEvent};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};

use crate::rate_limiter::SlidingWindowRateLimiter;

#[derive(Debug, Clone, Copy, Default)]
pub struct LiqDistanceCheck {
    pub dist_to_liq: Option<Decimal>,
    pub breach: bool,
    pub missing_mark_price: bool,
    pub missing_liquidation_price: bool,
}

/// Pure computation, no I/O: `dist_to_liq = |mark - liquidation| / mark`.
/// Missing inputs are flagged but never block trading.
pub fn compute_liq_distance(position: &Position, threshold: Decimal) -> LiqDistanceCheck {
    let mark = match position.mark_price {
        Some(m) if !m.is_zero() => m,
        _ => {
            return LiqDistanceCheck {
                missing_mark_price: true,
                ..Default::default()
            }
        }
    };
    let liq = match position.liquidation_price {
        Some(l) => l,
        None => {
            return LiqDistanceCheck {
                missing_liquidation_price: true,
                ..Default::default()
            }
        }
    };

    let dist = (mark - liq).abs() / mark;
    LiqDistanceCheck {
        dist_to_liq: Some(dist),
        breach: dist < threshold,
        missing_mark_price: false,
        missing_liquidation_price: false,
    }
}

/// Account-wide admission gate consulted by the Execution Engine before any
/// venue call. Unlike the teacher's `RiskManager` (a signal-approving actor
/// forwarding `Signal -> Order` over channels) this is a shared, directly
/// callable gate: admission here is a synchronous pre-flight check the
/// Execution Engine makes inline, not a pipeline stage, so there is no
/// message loop to drive.
pub struct RiskManager {
    order_limiter: Mutex<SlidingWindowRateLimiter>,
    cancel_limiter: Mutex<SlidingWindowRateLimiter>,
    risk_event_tx: mpsc::UnboundedSender<RiskEvent>,
}

impl RiskManager {
    pub fn new(
        max_orders_per_sec: u32,
        max_cancels_per_sec: u32,
        risk_event_tx: mpsc::UnboundedSender<RiskEvent>,
    ) -> Self {
        RiskManager {
            order_limiter: Mutex::new(SlidingWindowRateLimiter::new(max_orders_per_sec, 1000)),
            cancel_limiter: Mutex::new(SlidingWindowRateLimiter::new(max_cancels_per_sec, 1000)),
            risk_event_tx,
        }
    }

    pub async fn admit_order(
        &self,
        symbol: &str,
        side: PositionSide,
        now_ms: i64,
    ) -> Result<(), RejectionReason> {
        let admitted = self.order_limiter.lock().await.try_acquire(now_ms);
        if !admitted {
            self.emit(RiskEvent::OrderRejected {
                symbol: symbol.to_string(),
                side,
                reason: RejectionReason::RateLimited,
            });
            return Err(RejectionReason::RateLimited);
        }
        self.emit(RiskEvent::OrderAdmitted {
            symbol: symbol.to_string(),
            side,
        });
        Ok(())
    }

    pub async fn admit_cancel(&self, now_ms: i64) -> bool {
        self.cancel_limiter.lock().await.try_acquire(now_ms)
    }

    /// Runs the liquidation-distance gate and emits the corresponding
    /// `RiskEvent`. The breach flag never blocks reduce activity on its own
    /// — callers decide whether to suppress protective-stop placement.
    pub fn check_liq_distance(
        &self,
        symbol: &str,
        side: PositionSide,
        position: &Position,
        threshold: Decimal,
    ) -> LiqDistanceCheck {
        let check = compute_liq_distance(position, threshold);
        if check.missing_mark_price {
            self.emit(RiskEvent::MissingMarkPrice {
                symbol: symbol.to_string(),
                side,
            });
        }
        if check.missing_liquidation_price {
            self.emit(RiskEvent::MissingLiquidationPrice {
                symbol: symbol.to_string(),
                side,
            });
        }
        if check.breach {
            if let Some(dist_to_liq) = check.dist_to_liq {
                self.emit(RiskEvent::LiqDistanceBreach {
                    symbol: symbol.to_string(),
                    side,
                    dist_to_liq,
                });
            }
        }
        check
    }

    fn emit(&self, event: RiskEvent) {
        if self.risk_event_tx.send(event).is_err() {
            tracing::debug!("risk event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_position(mark: Option<Decimal>, liq: Option<Decimal>) -> Position {
        Position {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            position_amt: dec!(0.01),
            entry_price: dec!(49000),
            unrealized_pnl: dec!(10),
            leverage: dec!(10),
            mark_price: mark,
            liquidation_price: liq,
        }
    }

    #[test]
    fn flags_breach_below_threshold() {
        let position = make_position(Some(dec!(100)), Some(dec!(99)));
        let check = compute_liq_distance(&position, dec!(0.015));
        assert!(check.breach);
        assert_eq!(check.dist_to_liq, Some(dec!(0.01)));
    }

    #[test]
    fn no_breach_above_threshold() {
        let position = make_position(Some(dec!(100)), Some(dec!(90)));
        let check = compute_liq_distance(&position, dec!(0.015));
        assert!(!check.breach);
    }

    #[test]
    fn flags_missing_inputs_without_blocking() {
        let position = make_position(None, Some(dec!(90)));
        let check = compute_liq_distance(&position, dec!(0.015));
        assert!(check.missing_mark_price);
        assert!(!check.breach);

        let position = make_position(Some(dec!(100)), None);
        let check = compute_liq_distance(&position, dec!(0.015));
        assert!(check.missing_liquidation_price);
        assert!(!check.breach);
    }

    #[tokio::test]
    async fn s6_rate_limit_blocks_third_order_then_recovers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = RiskManager::new(2, 8, tx);

        assert!(manager.admit_order("BTCUSDT", PositionSide::Long, 0).await.is_ok());
        assert!(manager.admit_order("BTCUSDT", PositionSide::Long, 100).await.is_ok());
        assert_eq!(
            manager.admit_order("BTCUSDT", PositionSide::Long, 200).await,
            Err(RejectionReason::RateLimited)
        );
        assert!(manager.admit_order("BTCUSDT", PositionSide::Long, 1001).await.is_ok());

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
    }
}
