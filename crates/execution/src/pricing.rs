use rust_decimal::Decimal;

use common::config::MakerPriceMode;
use common::rounding::{round_to_tick, round_up_to_tick};
use common::types::PositionSide;

/// Computed maker price, or `None` if it would cross the opposite book and
/// needs a re-plan next cycle.
pub fn compute_maker_price(
    side: PositionSide,
    mode: MakerPriceMode,
    bid: Decimal,
    ask: Decimal,
    tick: Decimal,
    n_ticks: u32,
    safety_ticks: u32,
) -> Option<Decimal> {
    let raw = match (mode, side) {
        (MakerPriceMode::AtTouch, PositionSide::Long) => bid,
        (MakerPriceMode::AtTouch, PositionSide::Short) => ask,
        (MakerPriceMode::InsideSpread1Tick, PositionSide::Long) => bid + tick,
        (MakerPriceMode::InsideSpread1Tick, PositionSide::Short) => ask - tick,
        (MakerPriceMode::CustomTicks, PositionSide::Long) => bid + tick * Decimal::from(n_ticks),
        (MakerPriceMode::CustomTicks, PositionSide::Short) => ask - tick * Decimal::from(n_ticks),
    };

    let safety = tick * Decimal::from(safety_ticks);
    let adjusted = match side {
        PositionSide::Long => raw + safety,
        PositionSide::Short => raw - safety,
    };

    let price = match side {
        // Our reduce order for a long position is SELL.
        PositionSide::Long => round_to_tick(adjusted, tick),
        // Our reduce order for a short position is BUY.
        PositionSide::Short => round_up_to_tick(adjusted, tick),
    };

    match side {
        PositionSide::Long if price < bid => None,
        PositionSide::Short if price > ask => None,
        _ => Some(price),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn at_touch_long_uses_bid() {
        let price = compute_maker_price(
            PositionSide::Long,
            MakerPriceMode::AtTouch,
            dec!(100),
            dec!(100.2),
            dec!(0.1),
            1,
            0,
        );
        assert_eq!(price, Some(dec!(100)));
    }

    #[test]
    fn safety_ticks_push_long_price_up_away_from_bid() {
        let price = compute_maker_price(
            PositionSide::Long,
            MakerPriceMode::AtTouch,
            dec!(100),
            dec!(100.2),
            dec!(0.1),
            1,
            1,
        );
        assert_eq!(price, Some(dec!(100.1)));
    }

    #[test]
    fn price_resting_exactly_at_the_touch_is_not_a_cross() {
        let price = compute_maker_price(
            PositionSide::Short,
            MakerPriceMode::AtTouch,
            dec!(100),
            dec!(100.2),
            dec!(0.1),
            1,
            0,
        );
        assert_eq!(price, Some(dec!(100.2)));
    }

    #[test]
    fn inside_spread_short_uses_ask_minus_tick() {
        let price = compute_maker_price(
            PositionSide::Short,
            MakerPriceMode::InsideSpread1Tick,
            dec!(100),
            dec!(100.2),
            dec!(0.1),
            1,
            0,
        )
        .unwrap();
        assert_eq!(price, dec!(100.1));
    }
}
