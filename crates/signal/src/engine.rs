use std::collections::{HashMap, VecDeque};

use rust_decimal::Decimal;

use common::config::{AccelTier, MergedSymbolConfig, RoiTier};
use common::types::{
    ExitReason, ExitSignal, MarketState, MarketStreamEvent, Position, PositionSide,
};

type Key = (String, PositionSide);

/// Per-instrument microstructure state machine. Pure function of market
/// state, position, and time — no I/O, consistent with the contract in
/// `4.1 Signal Engine`.
pub struct SignalEngine {
    default_min_signal_interval_ms: i64,
    market_states: HashMap<String, MarketState>,
    symbol_configs: HashMap<String, MergedSymbolConfig>,
    last_signal_ms: HashMap<Key, i64>,
    last_logged_signal: HashMap<Key, (ExitReason, Decimal, Decimal, Decimal)>,
    trade_history: HashMap<String, VecDeque<(i64, Decimal)>>,
}

const DEFAULT_ACCEL_WINDOW_MS: i64 = 2000;

impl SignalEngine {
    pub fn new(default_min_signal_interval_ms: i64) -> Self {
        SignalEngine {
            default_min_signal_interval_ms,
            market_states: HashMap::new(),
            symbol_configs: HashMap::new(),
            last_signal_ms: HashMap::new(),
            last_logged_signal: HashMap::new(),
            trade_history: HashMap::new(),
        }
    }

    /// Installs per-instrument throttle interval / accel window / accel and
    /// ROI tiers. Tiers are expected already sorted ascending by threshold
    /// (`GlobalConfig::merge` guarantees this).
    pub fn configure_symbol(&mut self, symbol: &str, config: MergedSymbolConfig) {
        self.symbol_configs.insert(symbol.to_string(), config);
        self.trade_history.entry(symbol.to_string()).or_default();
    }

    pub fn update_market(&mut self, event: &MarketStreamEvent) {
        let symbol = event.symbol().to_string();
        let state = self.market_states.entry(symbol.clone()).or_default();

        match event {
            MarketStreamEvent::BookTicker {
                ts_ms,
                best_bid,
                best_ask,
                ..
            } => {
                state.last_update_ms = *ts_ms;
                state.best_bid = *best_bid;
                state.best_ask = *best_ask;
                state.has_book_data = true;
            }
            MarketStreamEvent::AggTrade {
                ts_ms,
                last_trade_price,
                ..
            } => {
                state.last_update_ms = *ts_ms;
                self.trade_history
                    .entry(symbol)
                    .or_default()
                    .push_back((*ts_ms, *last_trade_price));

                if state.last_trade_price > Decimal::ZERO {
                    state.previous_trade_price = Some(state.last_trade_price);
                }
                state.last_trade_price = *last_trade_price;
                state.has_trade_data = true;
            }
        }
    }

    pub fn evaluate(
        &mut self,
        symbol: &str,
        position_side: PositionSide,
        position: &Position,
        current_ms: i64,
    ) -> Option<ExitSignal> {
        let state = self.market_states.get(symbol)?;
        if !state.is_ready() {
            return None;
        }

        if self.is_throttled(symbol, position_side, current_ms) {
            return None;
        }

        if position.position_amt.is_zero() {
            return None;
        }

        let reason = match position_side {
            PositionSide::Long => check_long_exit(state),
            PositionSide::Short => check_short_exit(state),
        }?;

        let best_bid = state.best_bid;
        let best_ask = state.best_ask;
        let last_trade = state.last_trade_price;

        let ret_window = self.compute_accel_ret(symbol, current_ms, last_trade);
        let accel_mult = self.select_accel_mult(symbol, position_side, ret_window);

        let roi = compute_roi(position);
        let roi_mult = self.select_roi_mult(symbol, roi);

        let key = (symbol.to_string(), position_side);
        self.last_signal_ms.insert(key.clone(), current_ms);

        let signature = (reason, best_bid, best_ask, last_trade);
        if self.last_logged_signal.get(&key) != Some(&signature) {
            self.last_logged_signal.insert(key, signature);
            tracing::info!(
                symbol,
                side = %position_side,
                reason = %reason,
                %best_bid,
                %best_ask,
                %last_trade,
                roi_mult,
                accel_mult,
                ?roi,
                ?ret_window,
                "exit signal"
            );
        }

        Some(ExitSignal {
            symbol: symbol.to_string(),
            side: position_side,
            reason,
            timestamp_ms: current_ms,
            best_bid,
            best_ask,
            last_trade,
            roi_mult,
            accel_mult,
            roi,
            ret_window,
        })
    }

    fn is_throttled(&self, symbol: &str, position_side: PositionSide, current_ms: i64) -> bool {
        let key = (symbol.to_string(), position_side);
        let last_signal_ms = match self.last_signal_ms.get(&key) {
            Some(&t) => t,
            None => return false,
        };
        if last_signal_ms == 0 {
            return false;
        }
        let interval = self
            .symbol_configs
            .get(symbol)
            .map(|c| c.min_signal_interval_ms)
            .unwrap_or(self.default_min_signal_interval_ms);
        current_ms - last_signal_ms < interval
    }

    /// `ret = last / earliest_price_still_in_window - 1`, evicting stale
    /// trade-history entries before reading the window's oldest price.
    fn compute_accel_ret(&mut self, symbol: &str, current_ms: i64, last_price: Decimal) -> Option<Decimal> {
        if last_price <= Decimal::ZERO {
            return None;
        }

        let window_ms = self
            .symbol_configs
            .get(symbol)
            .map(|c| c.accel_window_ms)
            .unwrap_or(DEFAULT_ACCEL_WINDOW_MS);
        let cutoff = current_ms - window_ms;

        let history = self.trade_history.get_mut(symbol)?;
        if history.len() < 2 {
            return None;
        }
        while let Some(&(ts, _)) = history.front() {
            if ts < cutoff {
                history.pop_front();
            } else {
                break;
            }
        }

        let &(_, window_price) = history.front()?;
        if window_price <= Decimal::ZERO {
            return None;
        }

        Some(last_price / window_price - Decimal::ONE)
    }

    fn select_accel_mult(
        &self,
        symbol: &str,
        position_side: PositionSide,
        ret_window: Option<Decimal>,
    ) -> u32 {
        let ret_window = match ret_window {
            Some(r) => r,
            None => return 1,
        };
        let tiers: &[AccelTier] = self
            .symbol_configs
            .get(symbol)
            .map(|c| c.accel_tiers.as_slice())
            .unwrap_or(&[]);

        let mut best = 1u32;
        for tier in tiers {
            let candidate = tier.mult.max(1);
            let matches = match position_side {
                PositionSide::Long => ret_window >= tier.threshold,
                PositionSide::Short => ret_window <= -tier.threshold,
            };
            if matches {
                best = best.max(candidate);
            }
        }
        best
    }

    fn select_roi_mult(&self, symbol: &str, roi: Option<Decimal>) -> u32 {
        let roi = match roi {
            Some(r) => r,
            None => return 1,
        };
        let tiers: &[RoiTier] = self
            .symbol_configs
            .get(symbol)
            .map(|c| c.roi_tiers.as_slice())
            .unwrap_or(&[]);

        let mut best = 1u32;
        for tier in tiers {
            if roi >= tier.threshold {
                best = best.max(tier.mult.max(1));
            }
        }
        best
    }

    pub fn market_state(&self, symbol: &str) -> Option<&MarketState> {
        self.market_states.get(symbol)
    }

    pub fn is_data_ready(&self, symbol: &str) -> bool {
        self.market_states.get(symbol).is_some_and(|s| s.is_ready())
    }

    pub fn reset_throttle(&mut self, symbol: &str, position_side: PositionSide) {
        let key = (symbol.to_string(), position_side);
        self.last_signal_ms.remove(&key);
        self.last_logged_signal.remove(&key);
    }

    pub fn clear_state(&mut self, symbol: &str) {
        self.market_states.remove(symbol);
        self.trade_history.remove(symbol);
        self.last_signal_ms.retain(|(s, _), _| s != symbol);
        self.last_logged_signal.retain(|(s, _), _| s != symbol);
    }
}

fn check_long_exit(state: &MarketState) -> Option<ExitReason> {
    let prev = state.previous_trade_price?;
    let last = state.last_trade_price;
    let bid = state.best_bid;

    if last > prev && bid >= last {
        return Some(ExitReason::LongPrimary);
    }
    if bid >= last && bid > prev {
        return Some(ExitReason::LongBidImprove);
    }
    None
}

fn check_short_exit(state: &MarketState) -> Option<ExitReason> {
    let prev = state.previous_trade_price?;
    let last = state.last_trade_price;
    let ask = state.best_ask;

    if last < prev && ask <= last {
        return Some(ExitReason::ShortPrimary);
    }
    if ask <= last && ask < prev {
        return Some(ExitReason::ShortAskImprove);
    }
    None
}

/// `roi = unrealized_pnl / (|position_amt| * entry_price / leverage)`.
fn compute_roi(position: &Position) -> Option<Decimal> {
    let qty = position.position_amt.abs();
    if qty <= Decimal::ZERO || position.entry_price <= Decimal::ZERO {
        return None;
    }
    let leverage = if position.leverage > Decimal::ZERO {
        position.leverage
    } else {
        Decimal::ONE
    };
    let notional = qty * position.entry_price;
    let initial_margin = notional / leverage;
    if initial_margin <= Decimal::ZERO {
        return None;
    }
    Some(position.unrealized_pnl / initial_margin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::GlobalConfig;
    use rust_decimal_macros::dec;

    fn position(amt: Decimal, entry: Decimal, pnl: Decimal, leverage: Decimal) -> Position {
        Position {
            symbol: "BTCUSDT".into(),
            side: PositionSide::Long,
            position_amt: amt,
            entry_price: entry,
            unrealized_pnl: pnl,
            leverage,
            mark_price: None,
            liquidation_price: None,
        }
    }

    fn feed_book_and_trades(engine: &mut SignalEngine, symbol: &str, bid: Decimal, ask: Decimal, trades: &[(i64, Decimal)]) {
        engine.update_market(&MarketStreamEvent::BookTicker {
            symbol: symbol.into(),
            ts_ms: trades.first().map(|(t, _)| *t).unwrap_or(0),
            best_bid: bid,
            best_ask: ask,
        });
        for &(ts, price) in trades {
            engine.update_market(&MarketStreamEvent::AggTrade {
                symbol: symbol.into(),
                ts_ms: ts,
                last_trade_price: price,
            });
        }
    }

    #[test]
    fn s1_long_primary_exit() {
        let mut engine = SignalEngine::new(200);
        feed_book_and_trades(
            &mut engine,
            "BTCUSDT",
            dec!(50000.0),
            dec!(50001.0),
            &[(1100, dec!(49999)), (1200, dec!(50000))],
        );
        let position = position(dec!(0.01), dec!(49000), dec!(10), dec!(10));
        let signal = engine
            .evaluate("BTCUSDT", PositionSide::Long, &position, 1300)
            .expect("expected a signal");
        assert_eq!(signal.reason, ExitReason::LongPrimary);
        assert_eq!(signal.last_trade, dec!(50000));
    }

    #[test]
    fn s2_short_ask_improve_not_primary() {
        let mut engine = SignalEngine::new(200);
        feed_book_and_trades(
            &mut engine,
            "BTCUSDT",
            dec!(49999.0),
            dec!(50000.0),
            &[(1100, dec!(50001)), (1200, dec!(50002))],
        );
        let position = position(dec!(-0.01), dec!(51000), dec!(5), dec!(10));
        let signal = engine
            .evaluate("BTCUSDT", PositionSide::Short, &position, 1300)
            .expect("expected a signal");
        assert_eq!(signal.reason, ExitReason::ShortAskImprove);
    }

    #[test]
    fn not_ready_until_both_sides_and_a_previous_trade_are_known() {
        let mut engine = SignalEngine::new(200);
        engine.update_market(&MarketStreamEvent::BookTicker {
            symbol: "BTCUSDT".into(),
            ts_ms: 0,
            best_bid: dec!(100),
            best_ask: dec!(101),
        });
        assert!(!engine.is_data_ready("BTCUSDT"));

        engine.update_market(&MarketStreamEvent::AggTrade {
            symbol: "BTCUSDT".into(),
            ts_ms: 1,
            last_trade_price: dec!(100),
        });
        // first trade never populates previous_trade_price
        assert!(!engine.is_data_ready("BTCUSDT"));

        engine.update_market(&MarketStreamEvent::AggTrade {
            symbol: "BTCUSDT".into(),
            ts_ms: 2,
            last_trade_price: dec!(100.5),
        });
        assert!(engine.is_data_ready("BTCUSDT"));
    }

    #[test]
    fn property_7_throttle_suppresses_signals_within_interval() {
        let mut engine = SignalEngine::new(200);
        feed_book_and_trades(
            &mut engine,
            "BTCUSDT",
            dec!(50000.0),
            dec!(50001.0),
            &[(0, dec!(49999)), (1, dec!(50000))],
        );
        let position = position(dec!(0.01), dec!(49000), dec!(10), dec!(10));
        assert!(engine.evaluate("BTCUSDT", PositionSide::Long, &position, 100).is_some());
        assert!(engine.evaluate("BTCUSDT", PositionSide::Long, &position, 150).is_none());
        assert!(engine.evaluate("BTCUSDT", PositionSide::Long, &position, 301).is_some());
    }

    #[test]
    fn accel_and_roi_tiers_select_max_matching_multiplier() {
        let mut config = GlobalConfig::default();
        config.accel.tiers = vec![
            AccelTier { threshold: dec!(0.001), mult: 2 },
            AccelTier { threshold: dec!(0.005), mult: 5 },
        ];
        config.roi.tiers = vec![RoiTier { threshold: dec!(0.1), mult: 3 }];
        let merged = config.merge(None);

        let mut engine = SignalEngine::new(200);
        engine.configure_symbol("BTCUSDT", merged);
        feed_book_and_trades(
            &mut engine,
            "BTCUSDT",
            dec!(50600.0),
            dec!(50601.0),
            &[(0, dec!(50000)), (500, dec!(50600))],
        );
        let position = position(dec!(0.01), dec!(50000), dec!(100), dec!(10));
        let signal = engine
            .evaluate("BTCUSDT", PositionSide::Long, &position, 600)
            .expect("expected a signal");
        assert_eq!(signal.accel_mult, 5);
        assert_eq!(signal.roi_mult, 3);
    }

    #[test]
    fn clear_state_removes_all_per_symbol_bookkeeping() {
        let mut engine = SignalEngine::new(200);
        feed_book_and_trades(
            &mut engine,
            "BTCUSDT",
            dec!(50000.0),
            dec!(50001.0),
            &[(0, dec!(49999)), (1, dec!(50000))],
        );
        let position = position(dec!(0.01), dec!(49000), dec!(10), dec!(10));
        engine.evaluate("BTCUSDT", PositionSide::Long, &position, 100);
        engine.clear_state("BTCUSDT");
        assert!(!engine.is_data_ready("BTCUSDT"));
        assert!(!engine.is_throttled("BTCUSDT", PositionSide::Long, 150));
    }
}
