use rust_decimal::Decimal;

/// Round `value` down to the nearest multiple of `increment`.
fn floor_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    if increment.is_zero() {
        return value;
    }
    (value / increment).floor() * increment
}

/// Round `value` up to the nearest multiple of `increment`.
fn ceil_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    if increment.is_zero() {
        return value;
    }
    (value / increment).ceil() * increment
}

/// `round_to_tick(x, t) <= x < round_to_tick(x, t) + t`.
pub fn round_to_tick(value: Decimal, tick: Decimal) -> Decimal {
    floor_to_increment(value, tick)
}

/// `round_up_to_tick(x, t) >= x`.
pub fn round_up_to_tick(value: Decimal, tick: Decimal) -> Decimal {
    ceil_to_increment(value, tick)
}

/// Quantity is always rounded toward zero exposure change, i.e. downward.
pub fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    floor_to_increment(value, step)
}

pub fn round_up_to_step(value: Decimal, step: Decimal) -> Decimal {
    ceil_to_increment(value, step)
}

pub fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `BTCUSDT` <-> `btcusdt@...` style stream-name conversion used when
/// subscribing to combined market streams.
pub fn symbol_to_ws_stream(symbol: &str) -> String {
    symbol.to_ascii_lowercase()
}

pub fn ws_stream_to_symbol(stream: &str) -> String {
    stream.to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_up_to_tick_matches_protective_stop_long_example() {
        let raw = dec!(100) / dec!(0.99);
        assert_eq!(round_up_to_tick(raw, dec!(0.1)), dec!(101.1));
    }

    #[test]
    fn round_to_tick_matches_protective_stop_short_example() {
        let raw = dec!(100) / dec!(1.01);
        assert_eq!(round_to_tick(raw, dec!(0.1)), dec!(99.0));
    }

    #[test]
    fn round_trip_laws_hold() {
        let x = dec!(50000.37);
        let t = dec!(0.1);
        let down = round_to_tick(x, t);
        assert!(down <= x && x < down + t);
        let up = round_up_to_tick(x, t);
        assert!(up >= x);
    }

    #[test]
    fn step_rounding_is_exact_multiple() {
        let qty = dec!(0.0137);
        let step = dec!(0.001);
        let rounded = round_to_step(qty, step);
        assert_eq!(rounded, dec!(0.013));
        assert_eq!(rounded % step, Decimal::ZERO);
    }
}
