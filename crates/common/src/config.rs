use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Process-wide configuration loaded from environment variables. Missing
/// required variables cause an immediate panic with a clear message, the
/// same contract the original `.env`-based process used.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_secret: String,
    pub log_level: String,
    pub symbol_config_path: String,
    pub client_order_id_prefix: String,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Config {
            api_key: required_env("EXCHANGE_API_KEY"),
            api_secret: required_env("EXCHANGE_API_SECRET"),
            log_level: optional_env("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            symbol_config_path: optional_env("SYMBOL_CONFIG_PATH")
                .unwrap_or_else(|| "config/symbols.toml".to_string()),
            client_order_id_prefix: optional_env("CLIENT_ORDER_ID_PREFIX")
                .unwrap_or_else(|| "rxa-".to_string()),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("required environment variable '{key}' is not set; check your .env file")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MakerPriceMode {
    AtTouch,
    InsideSpread1Tick,
    CustomTicks,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AccelTier {
    pub threshold: Decimal,
    pub mult: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RoiTier {
    pub threshold: Decimal,
    pub mult: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: i64,
    pub max_delay_ms: i64,
    pub multiplier: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WSConfig {
    pub stale_data_ms: i64,
}

impl Default for WSConfig {
    fn default() -> Self {
        WSConfig { stale_data_ms: 1500 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub order_ttl_ms: i64,
    pub aggressive_order_ttl_ms: Option<i64>,
    pub repost_cooldown_ms: i64,
    pub base_lot_mult: u32,
    pub maker_price_mode: MakerPriceMode,
    pub maker_n_ticks: u32,
    pub maker_safety_ticks: u32,
    pub max_mult: u32,
    pub max_order_notional: Decimal,
    pub maker_timeouts_to_escalate: u32,
    pub aggr_fills_to_deescalate: u32,
    pub aggr_timeouts_to_deescalate: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            order_ttl_ms: 800,
            aggressive_order_ttl_ms: None,
            repost_cooldown_ms: 100,
            base_lot_mult: 1,
            maker_price_mode: MakerPriceMode::InsideSpread1Tick,
            maker_n_ticks: 1,
            maker_safety_ticks: 1,
            max_mult: 50,
            max_order_notional: dec!(200),
            maker_timeouts_to_escalate: 2,
            aggr_fills_to_deescalate: 1,
            aggr_timeouts_to_deescalate: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccelConfig {
    pub window_ms: i64,
    pub tiers: Vec<AccelTier>,
    pub mult_percent: u32,
}

impl Default for AccelConfig {
    fn default() -> Self {
        AccelConfig {
            window_ms: 2000,
            tiers: Vec::new(),
            mult_percent: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoiConfig {
    pub tiers: Vec<RoiTier>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub liq_distance_threshold: Decimal,
    pub protective_stop_enabled: bool,
    pub protective_stop_dist_to_liq: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            liq_distance_threshold: dec!(0.015),
            protective_stop_enabled: true,
            protective_stop_dist_to_liq: dec!(0.01),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_orders_per_sec: u32,
    pub max_cancels_per_sec: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_orders_per_sec: 5,
            max_cancels_per_sec: 8,
        }
    }
}

/// Process-wide defaults, overridden per-instrument by `SymbolConfig`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub min_signal_interval_ms: i64,
    pub ws: WSConfig,
    pub reconnect: ReconnectConfig,
    pub execution: ExecutionConfig,
    pub accel: AccelConfig,
    pub roi: RoiConfig,
    pub risk: RiskConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            min_signal_interval_ms: 200,
            ws: WSConfig::default(),
            reconnect: ReconnectConfig::default(),
            execution: ExecutionConfig::default(),
            accel: AccelConfig::default(),
            roi: RoiConfig::default(),
            risk: RiskConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Per-instrument override; any `None`/absent field inherits the matching
/// `GlobalConfig` field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    pub min_signal_interval_ms: Option<i64>,
    pub accel_window_ms: Option<i64>,
    pub accel_tiers: Option<Vec<AccelTier>>,
    pub accel_mult_percent: Option<u32>,
    pub roi_tiers: Option<Vec<RoiTier>>,
    pub order_ttl_ms: Option<i64>,
    pub aggressive_order_ttl_ms: Option<i64>,
    pub protective_stop_enabled: Option<bool>,
    pub protective_stop_dist_to_liq: Option<Decimal>,
}

/// Fully resolved view for one instrument: every field concrete, tiers
/// sorted ascending by threshold and accel tiers scaled by `mult_percent`.
#[derive(Debug, Clone)]
pub struct MergedSymbolConfig {
    pub symbol: String,
    pub stale_data_ms: i64,
    pub reconnect: ReconnectConfig,
    pub min_signal_interval_ms: i64,
    pub base_lot_mult: u32,
    pub maker_price_mode: MakerPriceMode,
    pub maker_n_ticks: u32,
    pub maker_safety_ticks: u32,
    pub max_mult: u32,
    pub max_order_notional: Decimal,
    pub maker_timeouts_to_escalate: u32,
    pub aggr_fills_to_deescalate: u32,
    pub aggr_timeouts_to_deescalate: u32,
    pub maker_order_ttl_ms: i64,
    pub aggressive_order_ttl_ms: i64,
    pub repost_cooldown_ms: i64,
    pub accel_window_ms: i64,
    pub accel_tiers: Vec<AccelTier>,
    pub roi_tiers: Vec<RoiTier>,
    pub liq_distance_threshold: Decimal,
    pub protective_stop_enabled: bool,
    pub protective_stop_dist_to_liq: Decimal,
    pub max_orders_per_sec: u32,
    pub max_cancels_per_sec: u32,
}

/// Scales a tier multiplier by `mult_percent`, rounded up with a floor of 1.
fn scale_mult(mult: u32, mult_percent: u32) -> u32 {
    let scaled = (mult as u64 * mult_percent as u64 + 99) / 100;
    scaled.max(1) as u32
}

impl GlobalConfig {
    pub fn merge(&self, overrides: Option<&SymbolConfig>) -> MergedSymbolConfig {
        let symbol = overrides.map(|o| o.symbol.clone()).unwrap_or_default();

        let mut accel_tiers: Vec<AccelTier> = overrides
            .and_then(|o| o.accel_tiers.clone())
            .unwrap_or_else(|| self.accel.tiers.clone());
        accel_tiers.sort_by(|a, b| a.threshold.cmp(&b.threshold));
        let mult_percent = overrides
            .and_then(|o| o.accel_mult_percent)
            .unwrap_or(self.accel.mult_percent);
        for tier in &mut accel_tiers {
            tier.mult = scale_mult(tier.mult, mult_percent);
        }

        let mut roi_tiers: Vec<RoiTier> = overrides
            .and_then(|o| o.roi_tiers.clone())
            .unwrap_or_else(|| self.roi.tiers.clone());
        roi_tiers.sort_by(|a, b| a.threshold.cmp(&b.threshold));

        let maker_order_ttl_ms = overrides
            .and_then(|o| o.order_ttl_ms)
            .unwrap_or(self.execution.order_ttl_ms);
        let aggressive_order_ttl_ms = overrides
            .and_then(|o| o.aggressive_order_ttl_ms)
            .or(self.execution.aggressive_order_ttl_ms)
            .unwrap_or(maker_order_ttl_ms);

        MergedSymbolConfig {
            symbol,
            stale_data_ms: self.ws.stale_data_ms,
            reconnect: self.reconnect,
            min_signal_interval_ms: overrides
                .and_then(|o| o.min_signal_interval_ms)
                .unwrap_or(self.min_signal_interval_ms),
            base_lot_mult: self.execution.base_lot_mult,
            maker_price_mode: self.execution.maker_price_mode,
            maker_n_ticks: self.execution.maker_n_ticks,
            maker_safety_ticks: self.execution.maker_safety_ticks,
            max_mult: self.execution.max_mult,
            max_order_notional: self.execution.max_order_notional,
            maker_timeouts_to_escalate: self.execution.maker_timeouts_to_escalate,
            aggr_fills_to_deescalate: self.execution.aggr_fills_to_deescalate,
            aggr_timeouts_to_deescalate: self.execution.aggr_timeouts_to_deescalate,
            maker_order_ttl_ms,
            aggressive_order_ttl_ms,
            repost_cooldown_ms: self.execution.repost_cooldown_ms,
            accel_window_ms: overrides
                .and_then(|o| o.accel_window_ms)
                .unwrap_or(self.accel.window_ms),
            accel_tiers,
            roi_tiers,
            liq_distance_threshold: self.risk.liq_distance_threshold,
            protective_stop_enabled: overrides
                .and_then(|o| o.protective_stop_enabled)
                .unwrap_or(self.risk.protective_stop_enabled),
            protective_stop_dist_to_liq: overrides
                .and_then(|o| o.protective_stop_dist_to_liq)
                .unwrap_or(self.risk.protective_stop_dist_to_liq),
            max_orders_per_sec: self.rate_limit.max_orders_per_sec,
            max_cancels_per_sec: self.rate_limit.max_cancels_per_sec,
        }
    }
}

/// The on-disk TOML file: global defaults plus a list of per-symbol
/// overrides, matching the original's merged-config-loader shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SymbolConfigFile {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default, rename = "symbol")]
    pub symbols: Vec<SymbolConfig>,
}

impl SymbolConfigFile {
    /// Load from a TOML file. Exits the process on error, matching the
    /// teacher's strategy-config loader.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("failed to read symbol config at '{path}': {e}"));
        toml::from_str(&content)
            .unwrap_or_else(|e| panic!("failed to parse symbol config at '{path}': {e}"))
    }

    pub fn merged(&self) -> HashMap<String, MergedSymbolConfig> {
        self.symbols
            .iter()
            .map(|s| (s.symbol.clone(), self.global.merge(Some(s))))
            .collect()
    }
}
