use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::error::{Error, Result};
use common::exchange::ExchangeAdapter;
use common::types::{OrderIntent, OrderResult, OrderStatus, Position, SymbolRules, VenueOrder};

/// Scriptable in-memory `ExchangeAdapter` for `execution`/`protective_stop`
/// tests. Not a trading mode — dev/test dependency only, the way the
/// teacher's `PaperClient` holds its state behind `Arc<RwLock<_>>` but
/// without any slippage/fill simulation, since callers here script exactly
/// the responses a test scenario needs.
#[derive(Default)]
pub struct MockExchange {
    rules: RwLock<HashMap<String, SymbolRules>>,
    open_orders: RwLock<HashMap<String, Vec<VenueOrder>>>,
    open_algo_orders: RwLock<HashMap<String, Vec<VenueOrder>>>,
    positions: RwLock<Vec<Position>>,
    place_responses: RwLock<Vec<Result<OrderResult>>>,
    cancel_responses: RwLock<Vec<Result<OrderResult>>>,
    placed: RwLock<Vec<OrderIntent>>,
    canceled: RwLock<Vec<(String, String)>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_symbol_rules(&self, symbol: &str, rules: SymbolRules) {
        self.rules.write().await.insert(symbol.to_string(), rules);
    }

    pub async fn set_open_orders(&self, symbol: &str, orders: Vec<VenueOrder>) {
        self.open_orders.write().await.insert(symbol.to_string(), orders);
    }

    pub async fn set_open_algo_orders(&self, symbol: &str, orders: Vec<VenueOrder>) {
        self.open_algo_orders.write().await.insert(symbol.to_string(), orders);
    }

    pub async fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.write().await = positions;
    }

    /// Queues the next `place_order` result (FIFO). Falls back to a
    /// successful `NEW` ack when the queue is empty.
    pub async fn push_place_response(&self, response: Result<OrderResult>) {
        self.place_responses.write().await.push(response);
    }

    pub async fn push_cancel_response(&self, response: Result<OrderResult>) {
        self.cancel_responses.write().await.push(response);
    }

    pub async fn placed_orders(&self) -> Vec<OrderIntent> {
        self.placed.read().await.clone()
    }

    pub async fn canceled_orders(&self) -> Vec<(String, String)> {
        self.canceled.read().await.clone()
    }
}

fn default_ack(order_id: &str) -> OrderResult {
    OrderResult {
        success: true,
        order_id: Some(order_id.to_string()),
        status: Some(OrderStatus::New),
        error_message: None,
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    async fn fetch_symbol_rules(&self, symbol: &str) -> Result<SymbolRules> {
        self.rules
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::Exchange(format!("no rules scripted for {symbol}")))
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<VenueOrder>> {
        Ok(self.open_orders.read().await.get(symbol).cloned().unwrap_or_default())
    }

    async fn fetch_open_algo_orders(&self, symbol: &str) -> Result<Vec<VenueOrder>> {
        Ok(self.open_algo_orders.read().await.get(symbol).cloned().unwrap_or_default())
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.read().await.clone())
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderResult> {
        self.placed.write().await.push(intent.clone());
        let next = self.place_responses.write().await.pop();
        match next {
            Some(r) => r,
            None => Ok(default_ack(&intent.client_order_id)),
        }
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderResult> {
        self.canceled.write().await.push((symbol.to_string(), order_id.to_string()));
        let next = self.cancel_responses.write().await.pop();
        match next {
            Some(r) => r,
            None => Ok(default_ack(order_id)),
        }
    }
}

/// Convenience constructor for tests that only need a single shared handle.
pub fn shared() -> Arc<MockExchange> {
    Arc::new(MockExchange::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{OrderSide, OrderType, PositionSide};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn records_placed_and_canceled_orders() {
        let mock = MockExchange::new();
        let intent = OrderIntent {
            symbol: "BTCUSDT".into(),
            side: OrderSide::Sell,
            position_side: PositionSide::Long,
            qty: dec!(0.01),
            order_type: OrderType::Limit,
            price: Some(dec!(50000)),
            stop_price: None,
            reduce_only: true,
            close_position: false,
            client_order_id: "BOT-BTCUSDT-L-1".into(),
            is_risk: false,
        };
        let result = mock.place_order(&intent).await.unwrap();
        assert!(result.success);
        assert_eq!(mock.placed_orders().await.len(), 1);

        mock.cancel_order("BTCUSDT", "1").await.unwrap();
        assert_eq!(mock.canceled_orders().await, vec![("BTCUSDT".to_string(), "1".to_string())]);
    }

    #[tokio::test]
    async fn scripted_response_takes_priority_over_default_ack() {
        let mock = MockExchange::new();
        mock.push_place_response(Ok(OrderResult {
            success: false,
            order_id: None,
            status: Some(OrderStatus::Rejected),
            error_message: Some("would cross".into()),
        }))
        .await;

        let intent = OrderIntent {
            symbol: "BTCUSDT".into(),
            side: OrderSide::Sell,
            position_side: PositionSide::Long,
            qty: dec!(0.01),
            order_type: OrderType::Limit,
            price: Some(dec!(50000)),
            stop_price: None,
            reduce_only: true,
            close_position: false,
            client_order_id: "BOT-BTCUSDT-L-1".into(),
            is_risk: false,
        };
        let result = mock.place_order(&intent).await.unwrap();
        assert!(!result.success);
    }
}
