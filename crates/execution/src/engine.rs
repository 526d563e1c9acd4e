use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::mpsc;

use common::config::MergedSymbolConfig;
use common::exchange::ExchangeAdapter;
use common::ids;
use common::rounding::current_time_ms;
use common::types::{
    ExecState, ExecutionMode, ExitSignal, OrderIntent, OrderSide, OrderStatus, OrderType, Position,
    PositionSide, SymbolRules,
};
use risk::RiskManager;

use crate::pricing::compute_maker_price;
use crate::sizing::compute_order_qty;
use crate::state::SideExecutionState;

const MAILBOX_CAPACITY: usize = 256;

enum ExecutionCommand {
    Signal {
        signal: ExitSignal,
        rules: SymbolRules,
        position: Position,
    },
    OrderUpdate {
        order_id: Option<String>,
        client_order_id: String,
        status: OrderStatus,
        filled_qty: Decimal,
    },
    CheckTtl,
}

/// A single cooperative task per (instrument, side) drives the Execution
/// Engine: `spawn` starts that task and hands back a mailbox handle. The
/// task owns its `SideExecutionState` exclusively — no lock is shared with
/// any other key, matching the teacher's one-task-per-pair shape
/// (`crates/engine/src/lifecycle.rs::Engine::run` spawning a `BinanceStream`
/// per pair, `crates/engine/src/executor.rs::OrderExecutor::run` for the
/// submit/react-to-result loop this task's body follows). A separate
/// cooperative task per instrument (owned by the caller, see `bin/agent`)
/// drives timeout checks by sending `CheckTtl` into this mailbox on an
/// interval — the owner task still performs the cancel itself, only the
/// trigger lives elsewhere.
#[derive(Clone)]
pub struct ExecutionHandle {
    tx: mpsc::Sender<ExecutionCommand>,
}

impl ExecutionHandle {
    pub fn spawn(
        symbol: impl Into<String>,
        side: PositionSide,
        exchange: Arc<dyn ExchangeAdapter>,
        risk: Arc<RiskManager>,
        client_order_id_prefix: impl Into<String>,
        cfg: MergedSymbolConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let actor = ExecutionActor {
            symbol: symbol.into(),
            side,
            exchange,
            risk,
            client_order_id_prefix: client_order_id_prefix.into(),
            cfg,
            state: SideExecutionState::new(),
            rx,
        };
        tokio::spawn(actor.run());
        ExecutionHandle { tx }
    }

    /// Enqueues a fresh exit signal for this (instrument, side) owner task.
    pub async fn signal(&self, signal: ExitSignal, rules: SymbolRules, position: Position) {
        let _ = self
            .tx
            .send(ExecutionCommand::Signal { signal, rules, position })
            .await;
    }

    /// Enqueues an order-status update for this (instrument, side) owner task.
    pub async fn order_update(
        &self,
        order_id: Option<String>,
        client_order_id: String,
        status: OrderStatus,
        filled_qty: Decimal,
    ) {
        let _ = self
            .tx
            .send(ExecutionCommand::OrderUpdate {
                order_id,
                client_order_id,
                status,
                filled_qty,
            })
            .await;
    }

    /// Triggers a TTL check on this (instrument, side) owner task. Called by
    /// the per-instrument timeout-check task on its own interval.
    pub async fn check_ttl(&self) {
        let _ = self.tx.send(ExecutionCommand::CheckTtl).await;
    }
}

struct ExecutionActor {
    symbol: String,
    side: PositionSide,
    exchange: Arc<dyn ExchangeAdapter>,
    risk: Arc<RiskManager>,
    client_order_id_prefix: String,
    cfg: MergedSymbolConfig,
    state: SideExecutionState,
    rx: mpsc::Receiver<ExecutionCommand>,
}

impl ExecutionActor {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                ExecutionCommand::Signal { signal, rules, position } => {
                    self.handle_signal(&signal, rules, &position).await;
                }
                ExecutionCommand::OrderUpdate { order_id, client_order_id, status, filled_qty } => {
                    self.on_order_update(order_id.as_deref(), &client_order_id, status, filled_qty);
                }
                ExecutionCommand::CheckTtl => {
                    self.check_ttl().await;
                }
            }
        }
    }

    /// Admits, sizes, prices, and submits an order for a fresh exit signal.
    /// No-ops if this key is already working an order or in cooldown.
    async fn handle_signal(&mut self, signal: &ExitSignal, rules: SymbolRules, position: &Position) {
        let now_ms = current_time_ms();

        if self.state.state == ExecState::Working {
            // A newer signal supersedes the resting order; cancel and let
            // the next cycle re-place once the cancel is acknowledged.
            if let Some(order_id) = self.state.working_order_id.clone() {
                if self.risk.admit_cancel(now_ms).await {
                    let _ = self.exchange.cancel_order(&self.symbol, &order_id).await;
                }
                self.state.enter(ExecState::Canceling, now_ms);
            }
            return;
        }

        if self.state.state != ExecState::Idle {
            return;
        }
        if self.state.is_in_cooldown(now_ms) {
            return;
        }
        let mode = self.state.mode;

        if self.risk.admit_order(&self.symbol, self.side, now_ms).await.is_err() {
            return;
        }

        let reference_price = match signal.side {
            PositionSide::Long => signal.best_bid,
            PositionSide::Short => signal.best_ask,
        };

        let qty = match compute_order_qty(
            &rules,
            self.cfg.base_lot_mult,
            signal.roi_mult,
            signal.accel_mult,
            self.cfg.max_mult,
            self.cfg.max_order_notional,
            position.position_amt.abs(),
            reference_price,
        ) {
            Some(q) => q,
            None => return,
        };

        let (order_type, price) = match mode {
            ExecutionMode::MakerOnly => {
                let price = match compute_maker_price(
                    signal.side,
                    self.cfg.maker_price_mode,
                    signal.best_bid,
                    signal.best_ask,
                    rules.tick_size,
                    self.cfg.maker_n_ticks,
                    self.cfg.maker_safety_ticks,
                ) {
                    Some(p) => p,
                    None => return, // would cross; re-plan next cycle
                };
                (OrderType::Limit, Some(price))
            }
            ExecutionMode::Aggressive => (OrderType::Market, None),
        };

        let order_side = if signal.side == PositionSide::Long {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };

        let client_order_id = ids::build_client_order_id(&self.client_order_id_prefix, &self.symbol, signal.side, now_ms);

        let intent = OrderIntent {
            symbol: self.symbol.clone(),
            side: order_side,
            position_side: signal.side,
            qty,
            order_type,
            price,
            stop_price: None,
            reduce_only: true,
            close_position: false,
            client_order_id: client_order_id.clone(),
            is_risk: false,
        };

        self.state.enter(ExecState::Placing, now_ms);
        let result = self.exchange.place_order(&intent).await;

        match result {
            Ok(r) if r.success => {
                self.state.working_client_order_id = Some(client_order_id);
                self.state.working_order_id = r.order_id;
                self.state.working_qty = qty;
                self.state.enter(ExecState::Working, now_ms);
            }
            Ok(r) => {
                tracing::warn!(symbol = %self.symbol, side = %self.side, error = ?r.error_message, "order rejected by venue");
                self.state.clear_working();
                self.state.enter(ExecState::Cooldown, now_ms);
                self.state.cooldown_until_ms = now_ms + self.cfg.repost_cooldown_ms;
            }
            Err(e) => {
                tracing::error!(symbol = %self.symbol, side = %self.side, error = %e, "order submission transport error");
                // Order state is now unknown; treated as a working order of
                // unknown identity until reconciliation resolves it via an
                // open-orders query.
                self.state.working_client_order_id = Some(client_order_id);
                self.state.enter(ExecState::Working, now_ms);
            }
        }
    }

    /// Cancels any order that has exceeded its TTL and records a timeout for
    /// mode escalation/de-escalation bookkeeping.
    async fn check_ttl(&mut self) {
        if self.state.state != ExecState::Working {
            return;
        }
        let now_ms = current_time_ms();

        let ttl = match self.state.mode {
            ExecutionMode::MakerOnly => self.cfg.maker_order_ttl_ms,
            ExecutionMode::Aggressive => self.cfg.aggressive_order_ttl_ms,
        };
        if now_ms - self.state.entered_state_ms < ttl {
            return;
        }

        let order_id = self.state.working_order_id.clone();
        self.state.enter(ExecState::Canceling, now_ms);

        if let Some(order_id) = order_id {
            if self.risk.admit_cancel(now_ms).await {
                let _ = self.exchange.cancel_order(&self.symbol, &order_id).await;
            }
        }

        match self.state.mode {
            ExecutionMode::MakerOnly => self.state.on_maker_timeout(self.cfg.maker_timeouts_to_escalate),
            ExecutionMode::Aggressive => self.state.on_aggressive_timeout(self.cfg.aggr_timeouts_to_deescalate),
        }
        self.state.clear_working();
        self.state.enter(ExecState::Cooldown, now_ms);
        self.state.cooldown_until_ms = now_ms + self.cfg.repost_cooldown_ms;
    }

    /// Applies a terminal (or non-terminal) order-status update, matching on
    /// `order_id` when known else the client-order-id ownership prefix.
    fn on_order_update(&mut self, order_id: Option<&str>, client_order_id: &str, status: OrderStatus, filled_qty: Decimal) {
        let now_ms = current_time_ms();

        let owns = order_id.is_some() && self.state.working_order_id.as_deref() == order_id
            || self.state.working_client_order_id.as_deref() == Some(client_order_id);
        if !owns {
            return;
        }

        if !status.is_terminal() {
            if status == OrderStatus::PartiallyFilled {
                self.state.working_qty -= filled_qty;
            }
            return;
        }

        let mode = self.state.mode;
        if status == OrderStatus::Filled && mode == ExecutionMode::Aggressive {
            self.state.on_aggressive_fill(self.cfg.aggr_fills_to_deescalate);
        }
        self.state.clear_working();
        self.state.enter(ExecState::Idle, now_ms);
    }
}
