use rust_decimal::Decimal;

use common::types::{ExecState, ExecutionMode};

/// Per-(instrument, side) bookkeeping the Execution Engine owns exclusively.
/// Invariant: at most one working order per key — `working_client_order_id`
/// is `Some` only while `state == Working` or `Canceling`.
#[derive(Debug, Clone)]
pub struct SideExecutionState {
    pub mode: ExecutionMode,
    pub state: ExecState,
    pub working_client_order_id: Option<String>,
    pub working_order_id: Option<String>,
    pub working_qty: Decimal,
    pub entered_state_ms: i64,
    pub cooldown_until_ms: i64,
    pub maker_timeout_streak: u32,
    pub aggr_fill_streak: u32,
    pub aggr_timeout_streak: u32,
}

impl Default for SideExecutionState {
    fn default() -> Self {
        SideExecutionState {
            mode: ExecutionMode::MakerOnly,
            state: ExecState::Idle,
            working_client_order_id: None,
            working_order_id: None,
            working_qty: Decimal::ZERO,
            entered_state_ms: 0,
            cooldown_until_ms: 0,
            maker_timeout_streak: 0,
            aggr_fill_streak: 0,
            aggr_timeout_streak: 0,
        }
    }
}

impl SideExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_cooldown(&self, now_ms: i64) -> bool {
        self.state == ExecState::Cooldown && now_ms < self.cooldown_until_ms
    }

    pub fn enter(&mut self, state: ExecState, now_ms: i64) {
        self.state = state;
        self.entered_state_ms = now_ms;
    }

    fn reset_streaks(&mut self) {
        self.maker_timeout_streak = 0;
        self.aggr_fill_streak = 0;
        self.aggr_timeout_streak = 0;
    }

    /// A maker order reached TTL without a fill. Escalates to `AGGRESSIVE`
    /// after `threshold` consecutive timeouts.
    pub fn on_maker_timeout(&mut self, threshold: u32) {
        self.maker_timeout_streak += 1;
        if self.mode == ExecutionMode::MakerOnly && self.maker_timeout_streak >= threshold {
            self.mode = ExecutionMode::Aggressive;
            self.reset_streaks();
        }
    }

    /// An aggressive order filled. De-escalates to `MAKER_ONLY` after
    /// `fills_threshold` consecutive fills.
    pub fn on_aggressive_fill(&mut self, fills_threshold: u32) {
        self.aggr_fill_streak += 1;
        self.aggr_timeout_streak = 0;
        if self.mode == ExecutionMode::Aggressive && self.aggr_fill_streak >= fills_threshold {
            self.mode = ExecutionMode::MakerOnly;
            self.reset_streaks();
        }
    }

    /// An aggressive order reached TTL without a fill. De-escalates after
    /// `timeouts_threshold` consecutive timeouts (aggressive orders that
    /// keep timing out are no better than resting maker orders).
    pub fn on_aggressive_timeout(&mut self, timeouts_threshold: u32) {
        self.aggr_timeout_streak += 1;
        self.aggr_fill_streak = 0;
        if self.mode == ExecutionMode::Aggressive && self.aggr_timeout_streak >= timeouts_threshold {
            self.mode = ExecutionMode::MakerOnly;
            self.reset_streaks();
        }
    }

    pub fn clear_working(&mut self) {
        self.working_client_order_id = None;
        self.working_order_id = None;
        self.working_qty = Decimal::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_after_consecutive_maker_timeouts() {
        let mut state = SideExecutionState::new();
        state.on_maker_timeout(2);
        assert_eq!(state.mode, ExecutionMode::MakerOnly);
        state.on_maker_timeout(2);
        assert_eq!(state.mode, ExecutionMode::Aggressive);
        assert_eq!(state.maker_timeout_streak, 0);
    }

    #[test]
    fn deescalates_after_aggressive_fill() {
        let mut state = SideExecutionState::new();
        state.mode = ExecutionMode::Aggressive;
        state.on_aggressive_fill(1);
        assert_eq!(state.mode, ExecutionMode::MakerOnly);
    }

    #[test]
    fn fill_and_timeout_streaks_reset_each_other() {
        let mut state = SideExecutionState::new();
        state.mode = ExecutionMode::Aggressive;
        state.on_aggressive_fill(3);
        state.on_aggressive_timeout(3);
        assert_eq!(state.aggr_fill_streak, 0);
        assert_eq!(state.aggr_timeout_streak, 1);
    }
}
