//! Periodic and on-demand reconciliation of one symbol's ledger against the
//! exchange.
//!
//! A pass runs in two phases. The network phase collects open orders,
//! positions, the account and (for every local working order that is not in
//! the open list) the order itself. Only when every query succeeded does the
//! mutation phase touch the ledger, so a failed pass leaves no trace beyond
//! the log.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use grid_core::config::AccountConfig;
use grid_core::time_util::{Clock, system_clock};
use grid_core::{CanonicalOrder, GridError, SlotStatus};
use grid_td::ExchangeAdapter;

use crate::ledger::{ActiveOrder, ApplyOutcome, QTY_EPSILON, SlotLedger};
use crate::storage::{ReconciliationRecord, Storage};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("exchange query failed: {0}")]
    Exchange(#[from] GridError),
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub interval: Duration,
    /// Working orders younger than this are not reset when absent from the
    /// exchange; the venue may not list them yet.
    pub missing_grace: Duration,
    pub client_order_prefix: String,
}

impl ReconcileConfig {
    pub fn from_account(account: &AccountConfig) -> Self {
        Self {
            interval: account.reconcile_interval(),
            missing_grace: account.missing_order_grace(),
            client_order_prefix: account.client_order_prefix.clone(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            missing_grace: Duration::from_secs(10),
            client_order_prefix: "grid".into(),
        }
    }
}

/// Wakes a reconciliation loop outside its schedule. Fires coalesce.
#[derive(Clone, Default)]
pub struct ReconcileTrigger(Arc<Notify>);

impl ReconcileTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.0.notify_one();
    }

    pub async fn notified(&self) {
        self.0.notified().await;
    }
}

/// Result of the network phase.
struct ExchangeView {
    open_orders: Vec<CanonicalOrder>,
    resolved: Vec<CanonicalOrder>,
    missing: Vec<ActiveOrder>,
    exchange_position: f64,
    wallet_balance: f64,
}

pub struct ReconciliationEngine {
    adapter: Arc<dyn ExchangeAdapter>,
    ledger: Arc<SlotLedger>,
    storage: Arc<dyn Storage>,
    config: ReconcileConfig,
    trigger: ReconcileTrigger,
    passes: watch::Sender<u64>,
    baseline_wallet: Mutex<Option<f64>>,
    clock: Clock,
}

impl ReconciliationEngine {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        ledger: Arc<SlotLedger>,
        storage: Arc<dyn Storage>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            adapter,
            ledger,
            storage,
            config,
            trigger: ReconcileTrigger::new(),
            passes: watch::channel(0).0,
            baseline_wallet: Mutex::new(None),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn trigger(&self) -> ReconcileTrigger {
        self.trigger.clone()
    }

    /// Observes the count of successful passes.
    pub fn subscribe_passes(&self) -> watch::Receiver<u64> {
        self.passes.subscribe()
    }

    pub fn ledger(&self) -> &Arc<SlotLedger> {
        &self.ledger
    }

    fn is_ours(&self, order: &CanonicalOrder) -> bool {
        order
            .client_order_id
            .strip_prefix(self.config.client_order_prefix.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    // -----------------------------------------------------------------------
    // Single pass
    // -----------------------------------------------------------------------

    /// Run one pass. On error the ledger and its counters are untouched.
    pub async fn reconcile_once(&self) -> Result<ReconciliationRecord, ReconcileError> {
        let local_orders = self.ledger.active_orders();
        let view = self.query_exchange(&local_orders).await?;
        Ok(self.apply_view(view))
    }

    async fn query_exchange(&self, local_orders: &[ActiveOrder]) -> Result<ExchangeView, GridError> {
        let symbol = self.ledger.symbol();
        let open_orders = self.adapter.get_open_orders(symbol).await?;
        let positions = self.adapter.get_positions(Some(symbol)).await?;
        let account = self.adapter.get_account().await?;

        let open_ids: AHashSet<&str> = open_orders
            .iter()
            .flat_map(|o| [o.order_id.as_str(), o.client_order_id.as_str()])
            .filter(|id| !id.is_empty())
            .collect();

        let now = (self.clock)();
        let grace = self.config.missing_grace.as_millis() as u64;
        let mut resolved = Vec::new();
        let mut missing = Vec::new();
        for local in local_orders {
            // Placement still in flight; the executor owns this slot.
            if local.slot_status == SlotStatus::Pending {
                continue;
            }
            let listed = open_ids.contains(local.client_order_id.as_str())
                || local.order_id.as_deref().is_some_and(|id| open_ids.contains(id));
            if listed || now.saturating_sub(local.created_at) < grace {
                continue;
            }
            let Some(order_id) = local.order_id.as_deref() else {
                missing.push(local.clone());
                continue;
            };
            match self.adapter.get_order(symbol, order_id).await {
                Ok(order) => resolved.push(order),
                Err(e) if e.is_not_found() => missing.push(local.clone()),
                Err(e) => return Err(e),
            }
        }

        Ok(ExchangeView {
            open_orders,
            resolved,
            missing,
            exchange_position: positions.iter().filter(|p| p.symbol == symbol).map(|p| p.size).sum(),
            wallet_balance: account.total_wallet_balance,
        })
    }

    fn apply_view(&self, view: ExchangeView) -> ReconciliationRecord {
        let symbol = self.ledger.symbol();
        let mut repaired = 0;
        let mut adopted = 0;

        for order in &view.open_orders {
            match self.ledger.apply_order_update(order) {
                ApplyOutcome::Applied | ApplyOutcome::Stale => {}
                ApplyOutcome::Retired => {
                    debug!("[reconcile] {symbol}: {} already completed, open list is behind", order.order_id);
                }
                ApplyOutcome::Unmatched if self.is_ours(order) => {
                    match self.ledger.adopt_order(order) {
                        Ok(price) => {
                            adopted += 1;
                            info!(
                                "[reconcile] {symbol}: adopted {} ({}) at slot {price}",
                                order.order_id, order.client_order_id
                            );
                        }
                        Err(e) => warn!("[reconcile] {symbol}: cannot adopt {}: {e}", order.client_order_id),
                    }
                }
                ApplyOutcome::Unmatched => {
                    debug!("[reconcile] {symbol}: ignoring foreign order {}", order.order_id);
                }
            }
        }

        for order in &view.resolved {
            if self.ledger.apply_order_update(order) == ApplyOutcome::Applied {
                repaired += 1;
                info!("[reconcile] {symbol}: {} resolved as {:?}", order.order_id, order.status);
            }
        }

        for local in &view.missing {
            match self.ledger.reset_missing_order(local.price, &local.client_order_id) {
                Ok(true) => {
                    repaired += 1;
                    warn!(
                        "[reconcile] {symbol}: {} missing on exchange, slot {} reset",
                        local.client_order_id, local.price
                    );
                }
                Ok(false) => {}
                Err(e) => warn!("[reconcile] {symbol}: reset of slot {} skipped: {e}", local.price),
            }
        }

        self.ledger.set_exchange_position(view.exchange_position);
        let local_position = self.ledger.local_position();
        let position_diff = view.exchange_position - local_position;
        if position_diff.abs() > QTY_EPSILON {
            warn!(
                "[reconcile] {symbol}: position drift local={local_position} exchange={} diff={position_diff}",
                view.exchange_position
            );
        }

        let baseline = *self.baseline_wallet.lock().get_or_insert(view.wallet_balance);
        let now = (self.clock)();
        self.ledger.record_reconcile(now);

        let stats = self.ledger.order_stats();
        let record = ReconciliationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now,
            exchange: self.adapter.name().to_string(),
            symbol: symbol.to_string(),
            local_position,
            exchange_position: view.exchange_position,
            position_diff,
            active_buy_orders: stats.active_buys,
            active_sell_orders: stats.active_sells,
            pending_sell_qty: stats.pending_sell_qty,
            estimated_profit: self.ledger.get_total_sell_qty() * self.ledger.get_price_interval(),
            actual_profit: view.wallet_balance - baseline,
            repaired_orders: repaired,
            adopted_orders: adopted,
        };

        if let Err(e) = self.storage.save_reconciliation(&record) {
            warn!("[reconcile] {symbol}: failed to persist record: {e}");
        }
        let count = self.ledger.get_reconcile_count();
        info!(
            "[reconcile] {symbol}: pass #{count} buys={} sells={} repaired={repaired} adopted={adopted}",
            stats.active_buys, stats.active_sells
        );
        self.passes.send_replace(count);
        record
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    /// Reconcile on every interval tick and trigger until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let symbol = self.ledger.symbol().to_string();

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => debug!("[reconcile] {symbol}: triggered"),
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.reconcile_once().await {
                warn!("[reconcile] {symbol}: pass aborted, ledger unchanged: {e}");
            }
        }
        info!("[reconcile] {symbol}: loop stopped");
    }
}
