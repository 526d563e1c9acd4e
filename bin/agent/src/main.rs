use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::config::{Config, MergedSymbolConfig, SymbolConfigFile};
use common::exchange::ExchangeAdapter;
use common::rounding::current_time_ms;
use common::types::{MarketStreamEvent, Position, PositionSide, SymbolRules, UserDataStreamEvent};
use exchange_binance::{BinanceFuturesClient, MarketStream, UserDataStream};
use execution::ExecutionHandle;
use protective_stop::ProtectiveStopManager;
use risk::RiskManager;
use signal::SignalEngine;

type PositionKey = (String, PositionSide);
type PositionCache = Arc<Mutex<HashMap<PositionKey, Position>>>;
type ExecutionHandles = Arc<HashMap<PositionKey, ExecutionHandle>>;
type StopHints = Arc<Mutex<HashMap<PositionKey, bool>>>;

const POSITION_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const TTL_CHECK_INTERVAL: Duration = Duration::from_millis(200);
const PROTECTIVE_STOP_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cfg = Config::from_env();
    info!(prefix = %cfg.client_order_id_prefix, "agent starting");

    let symbol_file = SymbolConfigFile::load(&cfg.symbol_config_path);
    let merged = symbol_file.merged();
    let symbols: Vec<String> = merged.keys().cloned().collect();
    if symbols.is_empty() {
        panic!("symbol config at '{}' defines no symbols", cfg.symbol_config_path);
    }

    let exchange: Arc<dyn ExchangeAdapter> = Arc::new(BinanceFuturesClient::new(&cfg.api_key, &cfg.api_secret));

    let mut rules_by_symbol: HashMap<String, SymbolRules> = HashMap::new();
    for symbol in &symbols {
        match exchange.fetch_symbol_rules(symbol).await {
            Ok(rules) => {
                rules_by_symbol.insert(symbol.clone(), rules);
            }
            Err(e) => error!(symbol, error = %e, "failed to fetch symbol rules at startup"),
        }
    }

    let (risk_event_tx, mut risk_event_rx) = tokio::sync::mpsc::unbounded_channel();
    let default_cfg = merged.values().next().expect("checked non-empty above");
    let risk = Arc::new(RiskManager::new(
        default_cfg.max_orders_per_sec,
        default_cfg.max_cancels_per_sec,
        risk_event_tx,
    ));
    tokio::spawn(async move {
        while let Some(event) = risk_event_rx.recv().await {
            info!(?event, "risk event");
        }
    });

    let protective_stop = Arc::new(ProtectiveStopManager::new(
        exchange.clone(),
        format!("{}stop-", cfg.client_order_id_prefix),
    ));

    // One owner task per (instrument, side) drives the Execution Engine;
    // each handle is just a mailbox into that task, so a slow venue
    // round-trip for one key never stalls any other key.
    let order_id_prefix = format!("{}ord-", cfg.client_order_id_prefix);
    let mut execution_handles: HashMap<PositionKey, ExecutionHandle> = HashMap::new();
    for (symbol, symbol_cfg) in &merged {
        for side in [PositionSide::Long, PositionSide::Short] {
            let handle = ExecutionHandle::spawn(
                symbol.clone(),
                side,
                exchange.clone(),
                risk.clone(),
                order_id_prefix.clone(),
                symbol_cfg.clone(),
            );
            execution_handles.insert((symbol.clone(), side), handle);
        }
    }
    let execution_handles: ExecutionHandles = Arc::new(execution_handles);

    let signal_engine = Arc::new(Mutex::new(SignalEngine::new(default_cfg.min_signal_interval_ms)));
    for (symbol, cfg) in &merged {
        signal_engine.lock().await.configure_symbol(symbol, cfg.clone());
    }

    let positions: PositionCache = Arc::new(Mutex::new(HashMap::new()));
    refresh_positions(&exchange, &positions).await;
    let external_stop_hints: StopHints = Arc::new(Mutex::new(HashMap::new()));

    let (market_tx, _) = broadcast::channel::<MarketStreamEvent>(1024);
    let (user_tx, _) = broadcast::channel::<UserDataStreamEvent>(1024);

    tokio::spawn(MarketStream::new(symbols.clone(), market_tx.clone()).run());

    spawn_signal_pipeline(
        market_tx.subscribe(),
        signal_engine,
        execution_handles.clone(),
        rules_by_symbol.clone(),
        positions.clone(),
    );
    spawn_user_data_consumer(
        user_tx.subscribe(),
        execution_handles.clone(),
        protective_stop.clone(),
        positions.clone(),
        external_stop_hints.clone(),
    );
    spawn_position_refresh(exchange.clone(), positions.clone());

    // A separate cooperative task per instrument services timeout checks
    // and protective-stop reconciliation for both sides of that instrument.
    for symbol in &symbols {
        let Some(&rules) = rules_by_symbol.get(symbol) else { continue };
        let Some(symbol_cfg) = merged.get(symbol).cloned() else { continue };
        spawn_instrument_maintenance_loop(
            symbol.clone(),
            symbol_cfg,
            rules,
            execution_handles.clone(),
            protective_stop.clone(),
            positions.clone(),
            risk.clone(),
            external_stop_hints.clone(),
        );
    }

    info!("all subsystems started, waiting for shutdown signal");
    tokio::signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    info!("shutdown signal received, exiting");
}

async fn refresh_positions(exchange: &Arc<dyn ExchangeAdapter>, cache: &PositionCache) {
    match exchange.fetch_positions().await {
        Ok(fetched) => {
            let mut cache = cache.lock().await;
            for position in fetched {
                cache.insert((position.symbol.clone(), position.side), position);
            }
        }
        Err(e) => error!(error = %e, "failed to fetch positions"),
    }
}

fn spawn_position_refresh(exchange: Arc<dyn ExchangeAdapter>, cache: PositionCache) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(POSITION_REFRESH_INTERVAL);
        loop {
            ticker.tick().await;
            refresh_positions(&exchange, &cache).await;
        }
    });
}

/// Consumes the market stream and dispatches work; it never itself mutates
/// execution state — it only forwards signals into each key's own mailbox,
/// so the per-(instrument, side) owner task stays the sole mutator.
fn spawn_signal_pipeline(
    mut market_rx: broadcast::Receiver<MarketStreamEvent>,
    signal_engine: Arc<Mutex<SignalEngine>>,
    execution_handles: ExecutionHandles,
    rules_by_symbol: HashMap<String, SymbolRules>,
    positions: PositionCache,
) {
    tokio::spawn(async move {
        loop {
            let event = match market_rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let symbol = event.symbol().to_string();

            {
                let mut engine = signal_engine.lock().await;
                engine.update_market(&event);
            }

            let Some(rules) = rules_by_symbol.get(&symbol).copied() else { continue };

            let now_ms = current_time_ms();
            for side in [PositionSide::Long, PositionSide::Short] {
                let position = {
                    let cache = positions.lock().await;
                    cache.get(&(symbol.clone(), side)).cloned()
                };
                let Some(position) = position else { continue };
                if position.is_flat() {
                    continue;
                }

                let signal = {
                    let mut engine = signal_engine.lock().await;
                    engine.evaluate(&symbol, side, &position, now_ms)
                };
                if let Some(signal) = signal {
                    if let Some(handle) = execution_handles.get(&(symbol.clone(), side)) {
                        handle.signal(signal, rules, position).await;
                    }
                }
            }
        }
    });
}

fn spawn_user_data_consumer(
    mut user_rx: broadcast::Receiver<UserDataStreamEvent>,
    execution_handles: ExecutionHandles,
    protective_stop: Arc<ProtectiveStopManager>,
    positions: PositionCache,
    external_stop_hints: StopHints,
) {
    tokio::spawn(async move {
        loop {
            let event = match user_rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                UserDataStreamEvent::OrderUpdate {
                    symbol,
                    order_id,
                    client_order_id,
                    position_side,
                    is_close_position_stop,
                    status,
                    filled_qty,
                    ..
                } => {
                    // USDⓈ-M futures report regular and close-position stop
                    // orders on the same stream; both managers filter by
                    // their own client-order-id prefix, so it is safe to
                    // notify both unconditionally.
                    for side in [PositionSide::Long, PositionSide::Short] {
                        if let Some(handle) = execution_handles.get(&(symbol.clone(), side)) {
                            handle
                                .order_update(Some(order_id.clone()), client_order_id.clone(), status, filled_qty)
                                .await;
                        }
                    }
                    protective_stop.on_order_update(&symbol, &client_order_id, status).await;

                    if is_close_position_stop && !protective_stop.owns(&symbol, position_side, &client_order_id) {
                        external_stop_hints
                            .lock()
                            .await
                            .insert((symbol, position_side), true);
                    }
                }
                UserDataStreamEvent::AlgoUpdate { symbol, client_algo_id, status, .. } => {
                    protective_stop.on_algo_order_update(&symbol, &client_algo_id, status).await;
                }
                UserDataStreamEvent::PositionUpdate { symbol, side, position_amt } => {
                    let mut cache = positions.lock().await;
                    if let Some(position) = cache.get_mut(&(symbol, side)) {
                        position.position_amt = position_amt;
                    }
                }
                UserDataStreamEvent::LeverageUpdate { symbol, leverage } => {
                    let mut cache = positions.lock().await;
                    for side in [PositionSide::Long, PositionSide::Short] {
                        if let Some(position) = cache.get_mut(&(symbol.clone(), side)) {
                            position.leverage = leverage;
                        }
                    }
                }
            }
        }
    });
}

/// One task per instrument, owned by neither execution side: triggers TTL
/// checks on both sides' owner tasks and runs protective-stop reconciliation.
#[allow(clippy::too_many_arguments)]
fn spawn_instrument_maintenance_loop(
    symbol: String,
    cfg: MergedSymbolConfig,
    rules: SymbolRules,
    execution_handles: ExecutionHandles,
    protective_stop: Arc<ProtectiveStopManager>,
    positions: PositionCache,
    risk: Arc<RiskManager>,
    external_stop_hints: StopHints,
) {
    tokio::spawn(async move {
        let mut first_pass = true;
        let mut ttl_ticker = tokio::time::interval(TTL_CHECK_INTERVAL);
        let mut stop_ticker = tokio::time::interval(PROTECTIVE_STOP_INTERVAL);
        loop {
            tokio::select! {
                _ = ttl_ticker.tick() => {
                    for side in [PositionSide::Long, PositionSide::Short] {
                        if let Some(handle) = execution_handles.get(&(symbol.clone(), side)) {
                            handle.check_ttl().await;
                        }
                    }
                }
                _ = stop_ticker.tick() => {
                    let mut by_side = HashMap::new();
                    {
                        let cache = positions.lock().await;
                        for side in [PositionSide::Long, PositionSide::Short] {
                            if let Some(position) = cache.get(&(symbol.clone(), side)) {
                                by_side.insert(side, position.clone());
                            }
                        }
                    }

                    // Liquidation-distance breach is a separate alerting
                    // concern from the protective stop's configured offset —
                    // check it per side for `RiskEvent` emission only, it
                    // does not feed the stop price calculation.
                    for (side, position) in &by_side {
                        risk.check_liq_distance(&symbol, *side, position, cfg.liq_distance_threshold);
                    }

                    // External-stop activity observed since the last cycle
                    // hints that this cycle's REST snapshot may still be
                    // stale; consume the hint so next cycle starts clean.
                    let mut hints = HashMap::new();
                    {
                        let mut all_hints = external_stop_hints.lock().await;
                        for side in [PositionSide::Long, PositionSide::Short] {
                            if all_hints.remove(&(symbol.clone(), side)).is_some() {
                                hints.insert(side, true);
                            }
                        }
                    }

                    protective_stop
                        .sync_symbol(
                            &symbol,
                            rules,
                            &by_side,
                            cfg.protective_stop_enabled,
                            cfg.protective_stop_dist_to_liq,
                            &hints,
                            if first_pass { Some("startup") } else { None },
                        )
                        .await;
                    first_pass = false;
                }
            }
        }
    });
}
