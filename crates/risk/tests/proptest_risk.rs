use proptest::prelude::*;
use rust_decimal::Decimal;

use common::types::{Position, PositionSide};
use risk::manager::compute_liq_distance;
use risk::rate_limiter::SlidingWindowRateLimiter;

fn dec(x: f64) -> Decimal {
    Decimal::from_f64_retain(x).unwrap()
}

fn position_with(mark: f64, liq: f64) -> Position {
    Position {
        symbol: "TESTUSDT".into(),
        side: PositionSide::Long,
        position_amt: dec(0.01),
        entry_price: dec(liq),
        unrealized_pnl: dec(0.0),
        leverage: dec(10.0),
        mark_price: Some(dec(mark)),
        liquidation_price: Some(dec(liq)),
    }
}

proptest! {
    /// Liquidation-distance computation never panics on extreme inputs, and
    /// its breach flag always agrees with a direct recomputation.
    #[test]
    fn liq_distance_never_panics_and_matches_definition(
        mark in 0.0001f64..1_000_000.0f64,
        liq in 0.0001f64..1_000_000.0f64,
        threshold in 0.0001f64..0.5f64,
    ) {
        let position = position_with(mark, liq);
        let check = compute_liq_distance(&position, dec(threshold));

        let expected_dist = (dec(mark) - dec(liq)).abs() / dec(mark);
        prop_assert_eq!(check.dist_to_liq, Some(expected_dist));
        prop_assert_eq!(check.breach, expected_dist < dec(threshold));
    }

    /// Invariant 5: within any 1000ms sliding window, admitted orders never
    /// exceed the configured cap, for arbitrary admission request timing.
    #[test]
    fn rate_limiter_never_exceeds_cap_in_any_window(
        max_events in 1u32..20,
        timestamps in proptest::collection::vec(0i64..50_000, 1..200),
    ) {
        let mut limiter = SlidingWindowRateLimiter::new(max_events, 1000);
        let mut admitted_ms: Vec<i64> = Vec::new();

        let mut ts = timestamps;
        ts.sort_unstable();
        for now_ms in ts {
            if limiter.try_acquire(now_ms) {
                admitted_ms.push(now_ms);
            }
        }

        for &t in &admitted_ms {
            let count_in_window = admitted_ms
                .iter()
                .filter(|&&m| m > t - 1000 && m <= t)
                .count();
            prop_assert!(count_in_window as u32 <= max_events);
        }
    }
}
