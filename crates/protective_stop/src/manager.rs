use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex;

use common::error::{Error, Result};
use common::exchange::ExchangeAdapter;
use common::ids;
use common::rounding::{round_to_tick, round_up_to_tick};
use common::types::{
    OrderIntent, OrderSide, OrderStatus, OrderType, Position, PositionSide, ProtectiveStopState,
    SymbolRules, VenueOrder,
};

type Key = (String, PositionSide);

/// Maintains exactly one venue-side close-position conditional stop per
/// (instrument, side), with tighten-only semantics. Serialized per
/// instrument the way the original's `asyncio.Lock` per symbol is, here a
/// `tokio::sync::Mutex` per symbol.
pub struct ProtectiveStopManager {
    exchange: Arc<dyn ExchangeAdapter>,
    client_order_id_prefix: String,
    states: Mutex<HashMap<Key, ProtectiveStopState>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    startup_existing_logged: Mutex<HashSet<Key>>,
    startup_existing_external_logged: Mutex<HashSet<Key>>,
}

impl ProtectiveStopManager {
    pub fn new(exchange: Arc<dyn ExchangeAdapter>, client_order_id_prefix: impl Into<String>) -> Self {
        ProtectiveStopManager {
            exchange,
            client_order_id_prefix: client_order_id_prefix.into(),
            states: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            startup_existing_logged: Mutex::new(HashSet::new()),
            startup_existing_external_logged: Mutex::new(HashSet::new()),
        }
    }

    async fn lock_for(&self, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn build_prefix(&self, symbol: &str, side: PositionSide) -> String {
        ids::build_prefix(&self.client_order_id_prefix, symbol, side)
    }

    pub fn build_client_order_id(&self, symbol: &str, side: PositionSide, now_ms: i64) -> String {
        ids::build_client_order_id(&self.client_order_id_prefix, symbol, side, now_ms)
    }

    fn matches_own(&self, client_order_id: &str, symbol: &str, side: PositionSide) -> bool {
        ids::matches_prefix(client_order_id, &self.build_prefix(symbol, side))
    }

    /// Whether `client_order_id` was minted by this manager for this
    /// (symbol, side). Used by callers deciding if an observed order belongs
    /// to someone else's external protective stop.
    pub fn owns(&self, symbol: &str, side: PositionSide, client_order_id: &str) -> bool {
        self.matches_own(client_order_id, symbol, side)
    }

    /// Long: `raw = L / (1 - d)`, round up (earlier trigger, safer).
    /// Short: `raw = L / (1 + d)`, round down.
    pub fn compute_stop_price(
        &self,
        side: PositionSide,
        liquidation_price: Decimal,
        dist_to_liq: Decimal,
        tick_size: Decimal,
    ) -> Result<Decimal> {
        if liquidation_price <= Decimal::ZERO {
            return Err(Error::Other("liquidation_price must be > 0".into()));
        }
        if dist_to_liq <= Decimal::ZERO || dist_to_liq >= Decimal::ONE {
            return Err(Error::Other("dist_to_liq must be in (0, 1)".into()));
        }

        if side == PositionSide::Long {
            let raw = liquidation_price / (Decimal::ONE - dist_to_liq);
            Ok(round_up_to_tick(raw, tick_size))
        } else {
            let raw = liquidation_price / (Decimal::ONE + dist_to_liq);
            Ok(round_to_tick(raw, tick_size))
        }
    }

    /// Clears local state for a terminal order-status update matching our
    /// ownership prefix. Note the narrower terminal set than algo updates —
    /// regular orders never report TRIGGERED/FINISHED.
    pub async fn on_order_update(&self, symbol: &str, client_order_id: &str, status: OrderStatus) {
        if !matches!(
            status,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        ) {
            return;
        }
        self.clear_if_owned(symbol, client_order_id, status).await;
    }

    pub async fn on_algo_order_update(&self, symbol: &str, client_algo_id: &str, status: OrderStatus) {
        if !status.is_terminal() {
            return;
        }
        self.clear_if_owned(symbol, client_algo_id, status).await;
    }

    async fn clear_if_owned(&self, symbol: &str, client_order_id: &str, status: OrderStatus) {
        for side in [PositionSide::Long, PositionSide::Short] {
            let key = (symbol.to_string(), side);
            let mut states = self.states.lock().await;
            if !states.contains_key(&key) {
                continue;
            }
            if !self.matches_own(client_order_id, symbol, side) {
                continue;
            }
            states.remove(&key);
            tracing::info!(symbol, side = %side, status = ?status, "protective stop cleared by update");
        }
    }

    /// Fetches open regular + algo orders, classifies ownership, and
    /// reconciles both sides. Holds the per-symbol lock for the duration —
    /// multiple venue round-trips here must be atomic with respect to each
    /// other.
    pub async fn sync_symbol(
        &self,
        symbol: &str,
        rules: SymbolRules,
        positions: &HashMap<PositionSide, Position>,
        enabled: bool,
        dist_to_liq: Decimal,
        external_stop_hint_by_side: &HashMap<PositionSide, bool>,
        sync_reason: Option<&str>,
    ) {
        let lock = self.lock_for(symbol).await;
        let _guard = lock.lock().await;

        let open_orders = match self.exchange.fetch_open_orders(symbol).await {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(symbol, error = %e, "protective stop sync failed fetching open orders");
                return;
            }
        };
        let algo_orders = match self.exchange.fetch_open_algo_orders(symbol).await {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(symbol, error = %e, "protective stop sync failed fetching algo orders");
                return;
            }
        };

        let mut orders_by_side: HashMap<PositionSide, Vec<VenueOrder>> = HashMap::new();
        let mut external_stops_by_side: HashMap<PositionSide, bool> = HashMap::new();
        let mut external_stop_sample_by_side: HashMap<PositionSide, VenueOrder> = HashMap::new();

        for order in open_orders.into_iter().chain(algo_orders.into_iter()) {
            let ps = order.position_side;
            if self.matches_own(&order.client_order_id, symbol, ps) {
                orders_by_side.entry(ps).or_default().push(order);
            } else if is_close_position_stop(&order) {
                external_stops_by_side.insert(ps, true);
                external_stop_sample_by_side.entry(ps).or_insert(order);
            }
        }

        if sync_reason == Some("startup") {
            self.log_startup_existing(symbol, &orders_by_side, &external_stops_by_side, &external_stop_sample_by_side)
                .await;
        }

        for side in [PositionSide::Long, PositionSide::Short] {
            self.sync_side(
                symbol,
                side,
                rules,
                positions.get(&side),
                enabled,
                dist_to_liq,
                orders_by_side.remove(&side).unwrap_or_default(),
                external_stops_by_side.get(&side).copied().unwrap_or(false),
                external_stop_sample_by_side.get(&side),
                external_stop_hint_by_side.get(&side).copied().unwrap_or(false),
            )
            .await;
        }
    }

    async fn log_startup_existing(
        &self,
        symbol: &str,
        orders_by_side: &HashMap<PositionSide, Vec<VenueOrder>>,
        external_stops_by_side: &HashMap<PositionSide, bool>,
        external_stop_sample_by_side: &HashMap<PositionSide, VenueOrder>,
    ) {
        let mut logged = self.startup_existing_logged.lock().await;
        for side in [PositionSide::Long, PositionSide::Short] {
            let key = (symbol.to_string(), side);
            if logged.contains(&key) {
                continue;
            }
            if let Some(existing) = orders_by_side.get(&side) {
                if let Some(first) = existing.first() {
                    logged.insert(key.clone());
                    tracing::info!(
                        symbol,
                        side = %side,
                        count = existing.len(),
                        order_id = %first.order_id,
                        client_order_id = %first.client_order_id,
                        "startup: existing own protective stop"
                    );
                }
            }
        }
        drop(logged);

        let mut logged = self.startup_existing_external_logged.lock().await;
        for side in [PositionSide::Long, PositionSide::Short] {
            let key = (symbol.to_string(), side);
            if logged.contains(&key) {
                continue;
            }
            if external_stops_by_side.get(&side).copied().unwrap_or(false) {
                logged.insert(key.clone());
                if let Some(sample) = external_stop_sample_by_side.get(&side) {
                    tracing::info!(
                        symbol,
                        side = %side,
                        order_id = %sample.order_id,
                        client_order_id = %sample.client_order_id,
                        "startup: existing external protective stop"
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_side(
        &self,
        symbol: &str,
        side: PositionSide,
        rules: SymbolRules,
        position: Option<&Position>,
        enabled: bool,
        dist_to_liq: Decimal,
        existing_orders: Vec<VenueOrder>,
        has_external_stop: bool,
        external_stop_sample: Option<&VenueOrder>,
        has_external_stop_hint: bool,
    ) {
        let key = (symbol.to_string(), side);
        let now_ms = common::rounding::current_time_ms();
        let desired_cid = self.build_client_order_id(symbol, side, now_ms);

        let mut iter = existing_orders.into_iter();
        let keep_order = iter.next();
        for extra in iter {
            if let Err(e) = self.exchange.cancel_order(symbol, &extra.order_id).await {
                tracing::error!(symbol, order_id = %extra.order_id, error = %e, "protective stop cancel of duplicate failed");
            }
        }

        let has_position = position.is_some_and(|p| !p.position_amt.is_zero());

        if !enabled || !has_position {
            if let Some(order) = &keep_order {
                match self.exchange.cancel_order(symbol, &order.order_id).await {
                    Ok(_) => {
                        tracing::info!(
                            symbol,
                            side = %side,
                            reason = if has_position { "cancel_disabled" } else { "cancel_no_position" },
                            order_id = %order.order_id,
                            "protective stop canceled"
                        );
                    }
                    Err(e) => {
                        tracing::error!(symbol, order_id = %order.order_id, error = %e, "protective stop cancel failed");
                    }
                }
            }
            self.states.lock().await.remove(&key);
            return;
        }
        let position = match position {
            Some(p) => p,
            None => return,
        };

        if has_external_stop {
            if let Some(order) = &keep_order {
                match self.exchange.cancel_order(symbol, &order.order_id).await {
                    Ok(_) => {
                        tracing::info!(symbol, side = %side, order_id = %order.order_id, "protective stop canceled due to external stop");
                    }
                    Err(e) => {
                        tracing::error!(symbol, order_id = %order.order_id, error = %e, "protective stop cancel failed");
                        return;
                    }
                }
            }
            self.states.lock().await.remove(&key);
            tracing::info!(
                symbol,
                side = %side,
                external_order_id = external_stop_sample.map(|o| o.order_id.as_str()),
                external_client_order_id = external_stop_sample.map(|o| o.client_order_id.as_str()),
                "skipping placement: external close-position stop takes precedence"
            );
            return;
        }

        if has_external_stop_hint {
            tracing::info!(
                symbol,
                side = %side,
                keep_order_id = keep_order.as_ref().map(|o| o.order_id.as_str()),
                "skipping modification this cycle: recent external stop activity observed"
            );
            return;
        }

        let liquidation_price = match position.liquidation_price {
            Some(l) if l > Decimal::ZERO => l,
            _ => {
                tracing::info!(symbol, side = %side, "skipping: missing liquidation price");
                return;
            }
        };

        let desired_stop_price =
            match self.compute_stop_price(side, liquidation_price, dist_to_liq, rules.tick_size) {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(symbol, side = %side, error = %e, "stop price computation failed");
                    return;
                }
            };

        let existing_stop_price = keep_order.as_ref().and_then(|o| o.stop_price);
        let existing_order_id = keep_order.as_ref().map(|o| o.order_id.clone());
        let existing_cid = keep_order.as_ref().map(|o| o.client_order_id.clone());

        if let Some(existing_stop_price) = existing_stop_price {
            let existing_norm = round_to_tick(existing_stop_price, rules.tick_size);
            let desired_norm = round_to_tick(desired_stop_price, rules.tick_size);

            let looser = (side == PositionSide::Long && desired_norm < existing_norm)
                || (side == PositionSide::Short && desired_norm > existing_norm);

            if looser || existing_norm == desired_norm {
                self.states.lock().await.insert(
                    key,
                    ProtectiveStopState {
                        symbol: symbol.to_string(),
                        position_side: side,
                        client_order_id: existing_cid.unwrap_or(desired_cid),
                        order_id: existing_order_id,
                        stop_price: Some(existing_norm),
                    },
                );
                return;
            }
        }

        if let Some(order_id) = &existing_order_id {
            if let Err(e) = self.exchange.cancel_order(symbol, order_id).await {
                tracing::error!(symbol, order_id = %order_id, error = %e, "protective stop cancel before replace failed");
                return;
            }
        }

        let order_side = if side == PositionSide::Long { OrderSide::Sell } else { OrderSide::Buy };
        let intent = OrderIntent {
            symbol: symbol.to_string(),
            side: order_side,
            position_side: side,
            qty: Decimal::ZERO,
            order_type: OrderType::StopMarket,
            price: None,
            stop_price: Some(desired_stop_price),
            reduce_only: true,
            close_position: true,
            client_order_id: desired_cid.clone(),
            is_risk: true,
        };

        let result = match self.exchange.place_order(&intent).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(symbol, side = %side, error = %e, "protective stop placement failed");
                return;
            }
        };
        if !result.success || result.order_id.is_none() {
            tracing::error!(symbol, side = %side, error = ?result.error_message, "protective stop rejected");
            return;
        }

        self.states.lock().await.insert(
            key,
            ProtectiveStopState {
                symbol: symbol.to_string(),
                position_side: side,
                client_order_id: desired_cid,
                order_id: result.order_id,
                stop_price: Some(desired_stop_price),
            },
        );
        tracing::info!(symbol, side = %side, price = %desired_stop_price, "protective stop placed or updated");
    }
}

fn is_close_position_stop(order: &VenueOrder) -> bool {
    order.close_position == Some(true)
        && order.order_type.is_some_and(|t| t.is_close_position_stop())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn manager() -> ProtectiveStopManager {
        struct Unused;
        #[async_trait::async_trait]
        impl ExchangeAdapter for Unused {
            async fn fetch_symbol_rules(&self, _: &str) -> Result<SymbolRules> {
                unimplemented!()
            }
            async fn fetch_open_orders(&self, _: &str) -> Result<Vec<VenueOrder>> {
                unimplemented!()
            }
            async fn fetch_open_algo_orders(&self, _: &str) -> Result<Vec<VenueOrder>> {
                unimplemented!()
            }
            async fn fetch_positions(&self) -> Result<Vec<Position>> {
                unimplemented!()
            }
            async fn place_order(&self, _: &OrderIntent) -> Result<common::types::OrderResult> {
                unimplemented!()
            }
            async fn cancel_order(&self, _: &str, _: &str) -> Result<common::types::OrderResult> {
                unimplemented!()
            }
        }
        ProtectiveStopManager::new(Arc::new(Unused), "BOT-")
    }

    #[test]
    fn s3_long_stop_price_rounds_up() {
        let mgr = manager();
        let price = mgr
            .compute_stop_price(PositionSide::Long, dec!(100), dec!(0.01), dec!(0.1))
            .unwrap();
        assert_eq!(price, dec!(101.1));
    }

    #[test]
    fn s4_short_stop_price_rounds_down() {
        let mgr = manager();
        let price = mgr
            .compute_stop_price(PositionSide::Short, dec!(100), dec!(0.01), dec!(0.1))
            .unwrap();
        assert_eq!(price, dec!(99.0));
    }

    #[test]
    fn rejects_out_of_range_dist_to_liq() {
        let mgr = manager();
        assert!(mgr.compute_stop_price(PositionSide::Long, dec!(100), dec!(0), dec!(0.1)).is_err());
        assert!(mgr.compute_stop_price(PositionSide::Long, dec!(100), dec!(1), dec!(0.1)).is_err());
        assert!(mgr.compute_stop_price(PositionSide::Long, dec!(0), dec!(0.01), dec!(0.1)).is_err());
    }

    #[test]
    fn external_close_position_stop_detection() {
        let order = VenueOrder {
            symbol: "BTCUSDT".into(),
            order_id: "1".into(),
            client_order_id: "someone-else-1".into(),
            position_side: PositionSide::Long,
            order_type: Some(OrderType::StopMarket),
            status: Some(OrderStatus::New),
            stop_price: Some(dec!(100)),
            close_position: Some(true),
            reduce_only: true,
        };
        assert!(is_close_position_stop(&order));

        let mut limit_order = order.clone();
        limit_order.order_type = Some(OrderType::Limit);
        assert!(!is_close_position_stop(&limit_order));
    }
}
