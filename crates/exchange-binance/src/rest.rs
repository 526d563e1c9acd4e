use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use common::error::{Error, Result};
use common::exchange::ExchangeAdapter;
use common::types::{
    OrderIntent, OrderResult, OrderStatus, OrderType, Position, PositionSide, SymbolRules,
    VenueOrder,
};

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

/// USDⓈ-M futures REST client. Every call is signed the way the teacher's
/// spot `BinanceClient` signs (`timestamp` query param + HMAC-SHA256 over
/// the query string), adapted from `/api/v3/*` spot endpoints to
/// `/fapi/v1|v2/*` futures endpoints with `positionSide`/`closePosition`.
pub struct BinanceFuturesClient {
    api_key: String,
    secret: String,
    http: Client,
    base_url: String,
}

impl BinanceFuturesClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::with_base_url(api_key, secret, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            http: Client::builder()
                .use_rustls_tls()
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into(),
        }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
    }

    fn sign(&self, query: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn public_get(&self, path: &str, query: &str) -> Result<String> {
        let url = if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        };
        let resp = self.http.get(&url).send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn signed_get(&self, path: &str, params: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let query = format!("{params}&timestamp={ts}");
        let signature = self.sign(&query);
        let url = format!("{}{path}?{query}&signature={signature}", self.base_url);

        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn signed_post(&self, path: &str, params: &str) -> Result<String> {
        self.signed_write(reqwest::Method::POST, path, params).await
    }

    async fn signed_delete(&self, path: &str, params: &str) -> Result<String> {
        self.signed_write(reqwest::Method::DELETE, path, params).await
    }

    async fn signed_write(&self, method: reqwest::Method, path: &str, params: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let query = format!("{params}&timestamp={ts}");
        let signature = self.sign(&query);
        let body = format!("{query}&signature={signature}");
        let url = format!("{}{path}", self.base_url);

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {text}")));
        }
        Ok(text)
    }
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).map_err(|e| Error::Decimal(e.to_string()))
}

pub(crate) fn map_order_type(t: &str) -> Option<OrderType> {
    match t {
        "LIMIT" => Some(OrderType::Limit),
        "MARKET" => Some(OrderType::Market),
        "STOP_MARKET" => Some(OrderType::StopMarket),
        "TAKE_PROFIT_MARKET" => Some(OrderType::TakeProfitMarket),
        "STOP" => Some(OrderType::Stop),
        "TAKE_PROFIT" => Some(OrderType::TakeProfit),
        _ => None,
    }
}

fn map_order_status(s: &str) -> Option<OrderStatus> {
    match s {
        "NEW" => Some(OrderStatus::New),
        "PARTIALLY_FILLED" => Some(OrderStatus::PartiallyFilled),
        "FILLED" => Some(OrderStatus::Filled),
        "CANCELED" => Some(OrderStatus::Canceled),
        "REJECTED" => Some(OrderStatus::Rejected),
        "EXPIRED" => Some(OrderStatus::Expired),
        "NEW_INSURANCE" | "NEW_ADL" => Some(OrderStatus::Triggered),
        _ => None,
    }
}

pub(crate) fn map_position_side(s: &str) -> PositionSide {
    if s.eq_ignore_ascii_case("SHORT") {
        PositionSide::Short
    } else {
        PositionSide::Long
    }
}

#[derive(Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct FuturesOrderEntry {
    #[serde(rename = "orderId")]
    order_id: i64,
    #[serde(rename = "clientOrderId")]
    client_order_id: String,
    #[serde(rename = "positionSide")]
    position_side: String,
    #[serde(rename = "type")]
    order_type: String,
    status: String,
    #[serde(rename = "stopPrice")]
    stop_price: String,
    #[serde(rename = "closePosition", default)]
    close_position: bool,
    #[serde(rename = "reduceOnly", default)]
    reduce_only: bool,
}

#[derive(Deserialize)]
struct PositionRiskEntry {
    symbol: String,
    #[serde(rename = "positionSide")]
    position_side: String,
    #[serde(rename = "positionAmt")]
    position_amt: String,
    #[serde(rename = "entryPrice")]
    entry_price: String,
    #[serde(rename = "unRealizedProfit")]
    unrealized_profit: String,
    leverage: String,
    #[serde(rename = "markPrice")]
    mark_price: String,
    #[serde(rename = "liquidationPrice")]
    liquidation_price: String,
}

#[derive(Deserialize)]
struct OrderAckResponse {
    #[serde(rename = "orderId")]
    order_id: i64,
    status: String,
}

fn venue_order_from_entry(symbol: &str, entry: FuturesOrderEntry) -> VenueOrder {
    let stop_price = parse_decimal(&entry.stop_price).ok().filter(|d| !d.is_zero());
    VenueOrder {
        symbol: symbol.to_string(),
        order_id: entry.order_id.to_string(),
        client_order_id: entry.client_order_id,
        position_side: map_position_side(&entry.position_side),
        order_type: map_order_type(&entry.order_type),
        status: map_order_status(&entry.status),
        stop_price,
        close_position: Some(entry.close_position),
        reduce_only: entry.reduce_only,
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceFuturesClient {
    async fn fetch_symbol_rules(&self, symbol: &str) -> Result<SymbolRules> {
        let body = self.public_get("/fapi/v1/exchangeInfo", "").await?;
        let info: ExchangeInfoResponse = serde_json::from_str(&body)?;

        let entry = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| Error::Exchange(format!("symbol {symbol} not found in exchangeInfo")))?;

        let mut tick_size = Decimal::ZERO;
        let mut step_size = Decimal::ZERO;
        let mut min_qty = Decimal::ZERO;
        let mut min_notional = Decimal::ZERO;

        for filter in &entry.filters {
            let filter_type = filter.get("filterType").and_then(|v| v.as_str()).unwrap_or("");
            match filter_type {
                "PRICE_FILTER" => {
                    if let Some(v) = filter.get("tickSize").and_then(|v| v.as_str()) {
                        tick_size = parse_decimal(v)?;
                    }
                }
                "LOT_SIZE" => {
                    if let Some(v) = filter.get("stepSize").and_then(|v| v.as_str()) {
                        step_size = parse_decimal(v)?;
                    }
                    if let Some(v) = filter.get("minQty").and_then(|v| v.as_str()) {
                        min_qty = parse_decimal(v)?;
                    }
                }
                "MIN_NOTIONAL" | "NOTIONAL" => {
                    if let Some(v) = filter.get("notional").and_then(|v| v.as_str()) {
                        min_notional = parse_decimal(v)?;
                    }
                }
                _ => {}
            }
        }

        Ok(SymbolRules { tick_size, step_size, min_qty, min_notional })
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<VenueOrder>> {
        let params = format!("symbol={symbol}");
        let body = self.signed_get("/fapi/v1/openOrders", &params).await?;
        let entries: Vec<FuturesOrderEntry> = serde_json::from_str(&body)?;
        Ok(entries
            .into_iter()
            .filter(|e| !e.close_position)
            .map(|e| venue_order_from_entry(symbol, e))
            .collect())
    }

    async fn fetch_open_algo_orders(&self, symbol: &str) -> Result<Vec<VenueOrder>> {
        let params = format!("symbol={symbol}");
        let body = self.signed_get("/fapi/v1/openOrders", &params).await?;
        let entries: Vec<FuturesOrderEntry> = serde_json::from_str(&body)?;
        Ok(entries
            .into_iter()
            .filter(|e| e.close_position)
            .map(|e| venue_order_from_entry(symbol, e))
            .collect())
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        let body = self.signed_get("/fapi/v2/positionRisk", "").await?;
        let entries: Vec<PositionRiskEntry> = serde_json::from_str(&body)?;

        entries
            .into_iter()
            .filter(|e| parse_decimal(&e.position_amt).map(|d| !d.is_zero()).unwrap_or(false))
            .map(|e| {
                let mark_price = parse_decimal(&e.mark_price)?;
                let liquidation_price = parse_decimal(&e.liquidation_price)?;
                Ok(Position {
                    symbol: e.symbol,
                    side: map_position_side(&e.position_side),
                    position_amt: parse_decimal(&e.position_amt)?,
                    entry_price: parse_decimal(&e.entry_price)?,
                    unrealized_pnl: parse_decimal(&e.unrealized_profit)?,
                    leverage: parse_decimal(&e.leverage)?,
                    mark_price: if mark_price.is_zero() { None } else { Some(mark_price) },
                    liquidation_price: if liquidation_price.is_zero() { None } else { Some(liquidation_price) },
                })
            })
            .collect()
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderResult> {
        let mut params = format!(
            "symbol={}&side={}&positionSide={}&type={}&newClientOrderId={}",
            intent.symbol,
            intent.side,
            if intent.position_side == PositionSide::Long { "LONG" } else { "SHORT" },
            intent.order_type.as_str(),
            intent.client_order_id,
        );

        if !intent.close_position {
            params.push_str(&format!("&quantity={}", intent.qty));
        }
        if let Some(price) = intent.price {
            params.push_str(&format!("&price={price}&timeInForce=GTC"));
        }
        if let Some(stop_price) = intent.stop_price {
            params.push_str(&format!("&stopPrice={stop_price}"));
        }
        if intent.reduce_only && !intent.close_position {
            params.push_str("&reduceOnly=true");
        }
        if intent.close_position {
            params.push_str("&closePosition=true");
        }

        debug!(symbol = %intent.symbol, side = %intent.side, "submitting order to Binance futures");
        match self.signed_post("/fapi/v1/order", &params).await {
            Ok(body) => {
                let ack: OrderAckResponse = serde_json::from_str(&body)?;
                Ok(OrderResult {
                    success: true,
                    order_id: Some(ack.order_id.to_string()),
                    status: map_order_status(&ack.status),
                    error_message: None,
                })
            }
            Err(e) => Ok(OrderResult {
                success: false,
                order_id: None,
                status: None,
                error_message: Some(e.to_string()),
            }),
        }
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderResult> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        match self.signed_delete("/fapi/v1/order", &params).await {
            Ok(body) => {
                let ack: OrderAckResponse = serde_json::from_str(&body)?;
                Ok(OrderResult {
                    success: true,
                    order_id: Some(ack.order_id.to_string()),
                    status: map_order_status(&ack.status),
                    error_message: None,
                })
            }
            Err(e) => Ok(OrderResult {
                success: false,
                order_id: None,
                status: None,
                error_message: Some(e.to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_order_types_and_statuses() {
        assert_eq!(map_order_type("STOP_MARKET"), Some(OrderType::StopMarket));
        assert_eq!(map_order_type("UNKNOWN"), None);
        assert_eq!(map_order_status("FILLED"), Some(OrderStatus::Filled));
        assert_eq!(map_order_status("PARTIALLY_FILLED"), Some(OrderStatus::PartiallyFilled));
    }

    #[test]
    fn maps_position_side_defaults_to_long() {
        assert_eq!(map_position_side("SHORT"), PositionSide::Short);
        assert_eq!(map_position_side("LONG"), PositionSide::Long);
        assert_eq!(map_position_side("BOTH"), PositionSide::Long);
    }
}
