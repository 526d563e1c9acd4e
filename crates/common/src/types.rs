use std::fmt;

use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn code(self) -> char {
        match self {
            PositionSide::Long => 'L',
            PositionSide::Short => 'S',
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

/// Venue-mandated rounding increments and minimums for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRules {
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
}

/// Per-instrument book + last-trade snapshot. `is_ready` is recomputed from
/// the fields it depends on rather than tracked as separate mutable state.
#[derive(Debug, Clone, Default)]
pub struct MarketState {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub last_trade_price: Decimal,
    pub previous_trade_price: Option<Decimal>,
    pub last_update_ms: i64,
    pub has_book_data: bool,
    pub has_trade_data: bool,
}

impl MarketState {
    pub fn is_ready(&self) -> bool {
        self.has_book_data
            && self.has_trade_data
            && self.previous_trade_price.is_some()
            && self.best_bid > Decimal::ZERO
            && self.best_ask > Decimal::ZERO
            && self.last_trade_price > Decimal::ZERO
    }
}

/// One open position on a single (instrument, side) key. Hedge mode keeps
/// long and short as independent positions on the same instrument.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: Decimal,
    pub mark_price: Option<Decimal>,
    pub liquidation_price: Option<Decimal>,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.position_amt.is_zero()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    MakerOnly,
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Idle,
    Placing,
    Working,
    Canceling,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    LongPrimary,
    LongBidImprove,
    ShortPrimary,
    ShortAskImprove,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::LongPrimary => "LONG_PRIMARY",
            ExitReason::LongBidImprove => "LONG_BID_IMPROVE",
            ExitReason::ShortPrimary => "SHORT_PRIMARY",
            ExitReason::ShortAskImprove => "SHORT_ASK_IMPROVE",
        };
        write!(f, "{s}")
    }
}

/// Ephemeral output of the signal engine; never persisted.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    pub symbol: String,
    pub side: PositionSide,
    pub reason: ExitReason,
    pub timestamp_ms: i64,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub last_trade: Decimal,
    pub roi_mult: u32,
    pub accel_mult: u32,
    pub roi: Option<Decimal>,
    pub ret_window: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
    StopMarket,
    TakeProfitMarket,
    Stop,
    TakeProfit,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            OrderType::Stop => "STOP",
            OrderType::TakeProfit => "TAKE_PROFIT",
        }
    }

    pub fn is_close_position_stop(self) -> bool {
        matches!(
            self,
            OrderType::StopMarket
                | OrderType::TakeProfitMarket
                | OrderType::Stop
                | OrderType::TakeProfit
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Ephemeral order request. `is_risk` marks protective-stop intents so
/// bookkeeping can distinguish them from ordinary reduce orders.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub qty: Decimal,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub reduce_only: bool,
    pub close_position: bool,
    pub client_order_id: String,
    pub is_risk: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Triggered,
    Finished,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
                | OrderStatus::Triggered
                | OrderStatus::Finished
        )
    }
}

/// Uniform shape every adapter maps its venue's order representation onto.
#[derive(Debug, Clone)]
pub struct VenueOrder {
    pub symbol: String,
    pub order_id: String,
    pub client_order_id: String,
    pub position_side: PositionSide,
    pub order_type: Option<OrderType>,
    pub status: Option<OrderStatus>,
    pub stop_price: Option<Decimal>,
    pub close_position: Option<bool>,
    pub reduce_only: bool,
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub status: Option<OrderStatus>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    RateLimited,
    ReduceOnlyViolation,
    BelowMinNotional,
    BelowMinQty,
    LiqDistanceBreach,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectionReason::RateLimited => "rate limited",
            RejectionReason::ReduceOnlyViolation => "reduce-only violation",
            RejectionReason::BelowMinNotional => "below minimum notional",
            RejectionReason::BelowMinQty => "below minimum quantity",
            RejectionReason::LiqDistanceBreach => "liquidation distance breach",
        };
        write!(f, "{s}")
    }
}

/// Emitted by the Risk Manager for anything downstream that wants to observe
/// admission decisions (alerting is out of scope, but the event source isn't).
#[derive(Debug, Clone)]
pub enum RiskEvent {
    OrderAdmitted {
        symbol: String,
        side: PositionSide,
    },
    OrderRejected {
        symbol: String,
        side: PositionSide,
        reason: RejectionReason,
    },
    LiqDistanceBreach {
        symbol: String,
        side: PositionSide,
        dist_to_liq: Decimal,
    },
    MissingMarkPrice {
        symbol: String,
        side: PositionSide,
    },
    MissingLiquidationPrice {
        symbol: String,
        side: PositionSide,
    },
}

/// Per-(instrument, side) protective-stop bookkeeping.
#[derive(Debug, Clone)]
pub struct ProtectiveStopState {
    pub symbol: String,
    pub position_side: PositionSide,
    pub client_order_id: String,
    pub order_id: Option<String>,
    pub stop_price: Option<Decimal>,
}

/// Market stream events, as delivered by an Exchange Adapter.
#[derive(Debug, Clone)]
pub enum MarketStreamEvent {
    BookTicker {
        symbol: String,
        ts_ms: i64,
        best_bid: Decimal,
        best_ask: Decimal,
    },
    AggTrade {
        symbol: String,
        ts_ms: i64,
        last_trade_price: Decimal,
    },
}

impl MarketStreamEvent {
    pub fn symbol(&self) -> &str {
        match self {
            MarketStreamEvent::BookTicker { symbol, .. } => symbol,
            MarketStreamEvent::AggTrade { symbol, .. } => symbol,
        }
    }
}

/// User-data stream events.
#[derive(Debug, Clone)]
pub enum UserDataStreamEvent {
    OrderUpdate {
        symbol: String,
        order_id: String,
        client_order_id: String,
        position_side: PositionSide,
        is_close_position_stop: bool,
        status: OrderStatus,
        filled_qty: Decimal,
        avg_price: Decimal,
    },
    AlgoUpdate {
        symbol: String,
        algo_id: String,
        client_algo_id: String,
        status: OrderStatus,
    },
    PositionUpdate {
        symbol: String,
        side: PositionSide,
        position_amt: Decimal,
    },
    LeverageUpdate {
        symbol: String,
        leverage: Decimal,
    },
}
