use rust_decimal::Decimal;

use common::rounding::round_to_step;
use common::types::SymbolRules;

/// Reduce-only order sizing per `4.2 Execution Engine`. Returns `None` when
/// no quantity satisfies `min_qty`/`min_notional` without oversizing past the
/// open position.
#[allow(clippy::too_many_arguments)]
pub fn compute_order_qty(
    rules: &SymbolRules,
    base_lot_mult: u32,
    roi_mult: u32,
    accel_mult: u32,
    max_mult: u32,
    max_order_notional: Decimal,
    position_amt_abs: Decimal,
    reference_price: Decimal,
) -> Option<Decimal> {
    if reference_price <= Decimal::ZERO || position_amt_abs <= Decimal::ZERO {
        return None;
    }

    let q0 = rules.step_size * Decimal::from(base_lot_mult);
    let effective_mult = (roi_mult.saturating_mul(accel_mult)).min(max_mult).max(1);
    let mut qty = q0 * Decimal::from(effective_mult);

    qty = qty.min(position_amt_abs);

    if qty * reference_price > max_order_notional && reference_price > Decimal::ZERO {
        let max_steps = (max_order_notional / reference_price / rules.step_size).floor();
        qty = (max_steps * rules.step_size).min(qty);
    }

    qty = round_to_step(qty, rules.step_size);

    if qty < rules.min_qty || qty * reference_price < rules.min_notional {
        return None;
    }

    Some(qty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rules() -> SymbolRules {
        SymbolRules {
            tick_size: dec!(0.1),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(5),
        }
    }

    #[test]
    fn sizes_by_roi_and_accel_multiplier() {
        let qty = compute_order_qty(&rules(), 1, 3, 2, 50, dec!(100000), dec!(1), dec!(50000)).unwrap();
        // q0 = 0.001, m = min(6, 50) = 6 -> qty = 0.006
        assert_eq!(qty, dec!(0.006));
    }

    #[test]
    fn clamps_to_open_position() {
        let qty = compute_order_qty(&rules(), 1, 10, 10, 50, dec!(100000), dec!(0.002), dec!(50000)).unwrap();
        assert_eq!(qty, dec!(0.002));
    }

    #[test]
    fn returns_none_below_min_notional() {
        let qty = compute_order_qty(&rules(), 1, 1, 1, 50, dec!(100000), dec!(0.001), dec!(100));
        assert!(qty.is_none());
    }

    #[test]
    fn shrinks_to_respect_max_order_notional() {
        let qty = compute_order_qty(&rules(), 1, 20, 20, 50, dec!(100), dec!(1), dec!(50000)).unwrap();
        // unclamped qty = 0.001 * 50 = 0.05 -> notional 2500, cap 100 -> max_steps = floor(100/50000/0.001) = 2 -> 0.002
        assert_eq!(qty, dec!(0.002));
    }
}
