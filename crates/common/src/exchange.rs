use async_trait::async_trait;

use crate::error::Result;
use crate::types::{OrderIntent, OrderResult, Position, SymbolRules, VenueOrder};

/// The only venue contract the core depends on. Wire-level details (signing,
/// reconnection, subscription multiplexing) live entirely behind a concrete
/// implementor such as `exchange-binance`.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn fetch_symbol_rules(&self, symbol: &str) -> Result<SymbolRules>;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<VenueOrder>>;

    async fn fetch_open_algo_orders(&self, symbol: &str) -> Result<Vec<VenueOrder>>;

    async fn fetch_positions(&self) -> Result<Vec<Position>>;

    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderResult>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderResult>;
}
