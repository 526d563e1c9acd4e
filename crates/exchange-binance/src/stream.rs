use std::str::FromStr;
use std::time::Duration;

use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use url::Url;

use common::error::Error;
use common::types::{MarketStreamEvent, OrderStatus, PositionSide, UserDataStreamEvent};
use common::rounding::symbol_to_ws_stream;

use crate::rest::{map_order_type, map_position_side};

const WS_BASE_URL: &str = "wss://fstream.binance.com/stream";

/// Combined bookTicker + aggTrade market stream for one or more symbols.
/// Reconnects with exponential backoff the way the teacher's `BinanceStream`
/// does for its single kline stream; this one multiplexes several symbols
/// over Binance's combined-stream endpoint instead of one connection per
/// pair.
pub struct MarketStream {
    symbols: Vec<String>,
    tx: broadcast::Sender<MarketStreamEvent>,
}

impl MarketStream {
    pub fn new(symbols: Vec<String>, tx: broadcast::Sender<MarketStreamEvent>) -> Self {
        Self { symbols, tx }
    }

    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);
        const MAX_BACKOFF: Duration = Duration::from_secs(30);

        loop {
            info!(symbols = ?self.symbols, "connecting to Binance futures market stream");
            match self.connect_once().await {
                Ok(()) => {
                    info!("market stream closed cleanly, reconnecting");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(error = %e, backoff = ?backoff, "market stream error, reconnecting");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect_once(&self) -> common::error::Result<()> {
        let streams = self
            .symbols
            .iter()
            .flat_map(|s| {
                let stream = symbol_to_ws_stream(s);
                vec![format!("{stream}@bookTicker"), format!("{stream}@aggTrade")]
            })
            .collect::<Vec<_>>()
            .join("/");
        let url_str = format!("{WS_BASE_URL}?streams={streams}");
        let url = Url::parse(&url_str).map_err(|e| Error::WebSocket(e.to_string()))?;

        let (ws_stream, _) = connect_async(url).await.map_err(|e| Error::WebSocket(e.to_string()))?;
        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;
            if let Message::Text(text) = msg {
                match parse_combined_event(&text) {
                    Ok(Some(event)) => {
                        let _ = self.tx.send(event);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "failed to parse market stream message"),
                }
            }
        }
        Ok(())
    }
}

/// User-data stream (order/position/leverage updates), keyed off a
/// `listenKey` the caller has already obtained and is keeping alive via
/// `PUT /fapi/v1/listenKey`.
pub struct UserDataStream {
    listen_key: String,
    tx: broadcast::Sender<UserDataStreamEvent>,
}

impl UserDataStream {
    pub fn new(listen_key: impl Into<String>, tx: broadcast::Sender<UserDataStreamEvent>) -> Self {
        Self { listen_key: listen_key.into(), tx }
    }

    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);
        const MAX_BACKOFF: Duration = Duration::from_secs(30);

        loop {
            info!("connecting to Binance futures user-data stream");
            match self.connect_once().await {
                Ok(()) => {
                    info!("user-data stream closed cleanly, reconnecting");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(error = %e, backoff = ?backoff, "user-data stream error, reconnecting");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect_once(&self) -> common::error::Result<()> {
        let url_str = format!("wss://fstream.binance.com/ws/{}", self.listen_key);
        let url = Url::parse(&url_str).map_err(|e| Error::WebSocket(e.to_string()))?;

        let (ws_stream, _) = connect_async(url).await.map_err(|e| Error::WebSocket(e.to_string()))?;
        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;
            if let Message::Text(text) = msg {
                match parse_user_data_event(&text) {
                    Ok(events) => {
                        for event in events {
                            let _ = self.tx.send(event);
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to parse user-data stream message"),
                }
            }
        }
        Ok(())
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s).ok()
}

#[derive(Deserialize)]
struct CombinedWrapper {
    stream: String,
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct BookTickerPayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    best_bid: String,
    #[serde(rename = "a")]
    best_ask: String,
    #[serde(rename = "E", default)]
    event_time_ms: i64,
}

#[derive(Deserialize)]
struct AggTradePayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "T")]
    trade_time_ms: i64,
}

fn parse_combined_event(text: &str) -> common::error::Result<Option<MarketStreamEvent>> {
    let wrapper: CombinedWrapper = serde_json::from_str(text)?;
    let event_type = wrapper.data.get("e").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "bookTicker" => {
            let payload: BookTickerPayload = serde_json::from_value(wrapper.data)?;
            let (Some(bid), Some(ask)) = (parse_decimal(&payload.best_bid), parse_decimal(&payload.best_ask)) else {
                return Ok(None);
            };
            Ok(Some(MarketStreamEvent::BookTicker {
                symbol: payload.symbol,
                ts_ms: payload.event_time_ms,
                best_bid: bid,
                best_ask: ask,
            }))
        }
        "aggTrade" => {
            let payload: AggTradePayload = serde_json::from_value(wrapper.data)?;
            let Some(price) = parse_decimal(&payload.price) else {
                return Ok(None);
            };
            Ok(Some(MarketStreamEvent::AggTrade {
                symbol: payload.symbol,
                ts_ms: payload.trade_time_ms,
                last_trade_price: price,
            }))
        }
        _ => Ok(None),
    }
}

#[derive(Deserialize)]
struct OrderTradeUpdateWrapper {
    o: OrderTradeUpdate,
}

#[derive(Deserialize)]
struct OrderTradeUpdate {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "i")]
    order_id: i64,
    #[serde(rename = "c")]
    client_order_id: String,
    #[serde(rename = "ps")]
    position_side: String,
    #[serde(rename = "o")]
    order_type: String,
    #[serde(rename = "cp", default)]
    close_position: bool,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "z")]
    filled_qty: String,
}

#[derive(Deserialize)]
struct AccountUpdateWrapper {
    a: AccountUpdatePositions,
}

#[derive(Deserialize)]
struct AccountUpdatePositions {
    #[serde(rename = "P")]
    positions: Vec<AccountUpdatePosition>,
}

#[derive(Deserialize)]
struct AccountUpdatePosition {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "ps")]
    position_side: String,
    #[serde(rename = "pa")]
    position_amt: String,
}

fn map_status(s: &str) -> Option<OrderStatus> {
    match s {
        "NEW" => Some(OrderStatus::New),
        "PARTIALLY_FILLED" => Some(OrderStatus::PartiallyFilled),
        "FILLED" => Some(OrderStatus::Filled),
        "CANCELED" => Some(OrderStatus::Canceled),
        "REJECTED" => Some(OrderStatus::Rejected),
        "EXPIRED" => Some(OrderStatus::Expired),
        _ => None,
    }
}

/// Returns every event carried by one user-data stream message.
/// `ACCOUNT_UPDATE` in particular carries every changed position in `a.P`,
/// not just the one that triggered it, so this returns a `Vec` rather than
/// at most one event.
fn parse_user_data_event(text: &str) -> common::error::Result<Vec<UserDataStreamEvent>> {
    let envelope: serde_json::Value = serde_json::from_str(text)?;
    let event_type = envelope.get("e").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "ORDER_TRADE_UPDATE" => {
            let wrapper: OrderTradeUpdateWrapper = serde_json::from_value(envelope)?;
            let Some(status) = map_status(&wrapper.o.status) else {
                return Ok(Vec::new());
            };
            let filled_qty = parse_decimal(&wrapper.o.filled_qty).unwrap_or(Decimal::ZERO);
            let is_close_position_stop = wrapper.o.close_position
                && map_order_type(&wrapper.o.order_type).is_some_and(|t| t.is_close_position_stop());
            Ok(vec![UserDataStreamEvent::OrderUpdate {
                symbol: wrapper.o.symbol,
                order_id: wrapper.o.order_id.to_string(),
                client_order_id: wrapper.o.client_order_id,
                position_side: map_position_side(&wrapper.o.position_side),
                is_close_position_stop,
                status,
                filled_qty,
                avg_price: Decimal::ZERO,
            }])
        }
        "ACCOUNT_UPDATE" => {
            let wrapper: AccountUpdateWrapper = serde_json::from_value(envelope)?;
            let events = wrapper
                .a
                .positions
                .into_iter()
                .filter_map(|position| {
                    let position_amt = parse_decimal(&position.position_amt)?;
                    Some(UserDataStreamEvent::PositionUpdate {
                        symbol: position.symbol,
                        side: map_position_side(&position.position_side),
                        position_amt,
                    })
                })
                .collect();
            Ok(events)
        }
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_update_emits_one_position_update_per_entry() {
        let text = r#"{"e":"ACCOUNT_UPDATE","a":{"P":[
            {"s":"BTCUSDT","ps":"LONG","pa":"0.010"},
            {"s":"BTCUSDT","ps":"SHORT","pa":"-0.020"}
        ]}}"#;
        let events = parse_user_data_event(text).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            UserDataStreamEvent::PositionUpdate { side: PositionSide::Long, .. }
        ));
        assert!(matches!(
            events[1],
            UserDataStreamEvent::PositionUpdate { side: PositionSide::Short, .. }
        ));
    }

    #[test]
    fn order_trade_update_flags_external_close_position_stop() {
        let text = r#"{"e":"ORDER_TRADE_UPDATE","o":{
            "s":"BTCUSDT","i":1,"c":"someone-else-1","ps":"LONG","o":"STOP_MARKET",
            "cp":true,"X":"NEW","z":"0"
        }}"#;
        let events = parse_user_data_event(text).unwrap();
        match &events[0] {
            UserDataStreamEvent::OrderUpdate { is_close_position_stop, position_side, .. } => {
                assert!(*is_close_position_stop);
                assert_eq!(*position_side, PositionSide::Long);
            }
            _ => panic!("expected OrderUpdate"),
        }
    }

    #[test]
    fn order_trade_update_without_close_position_is_not_flagged() {
        let text = r#"{"e":"ORDER_TRADE_UPDATE","o":{
            "s":"BTCUSDT","i":1,"c":"ord-1","ps":"LONG","o":"LIMIT",
            "X":"NEW","z":"0"
        }}"#;
        let events = parse_user_data_event(text).unwrap();
        match &events[0] {
            UserDataStreamEvent::OrderUpdate { is_close_position_stop, .. } => {
                assert!(!is_close_position_stop);
            }
            _ => panic!("expected OrderUpdate"),
        }
    }
}
