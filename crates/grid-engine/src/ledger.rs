//! Price-keyed slot ledger.
//!
//! One [`Slot`] per ladder price. The ladder is long-only: a slot opens its
//! position with a buy at the slot price and closes it with a reduce-only sell
//! one `price_interval` higher. A completed round trip resets the slot; slots
//! are never removed.
//!
//! # Slot lifecycle
//!
//! ```text
//!  FREE ──reserve──▶ PENDING ──mark_submitted / New──▶ LOCKED
//!   ▲                   │                               │
//!   └──release──────────┘        Filled / Canceled ─────┘
//! ```
//!
//! Order updates are applied last-write-wins on the exchange timestamp: a
//! snapshot strictly older than the slot's `order_updated_at` is stale and
//! ignored. Fill deltas (cumulative filled minus what the slot already saw)
//! move the position and the buy/sell totals, so replays are harmless.
//!
//! All state sits behind one `parking_lot::RwLock`; every public method takes
//! it once and releases it before returning.

use std::collections::VecDeque;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use grid_core::{CanonicalOrder, OrderStatus, PositionStatus, Side, SlotOrderStatus, SlotStatus};

/// Quantities below this are treated as zero.
pub const QTY_EPSILON: f64 = 1e-9;

/// Completed order ids remembered so late stream events are recognized.
const RETIRED_CAPACITY: usize = 4096;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("no slot at price {0}")]
    UnknownSlot(f64),

    #[error("slot {price} is busy ({status})")]
    SlotBusy { price: f64, status: SlotStatus },

    #[error("slot {price}: {reason}")]
    InvalidTransition { price: f64, reason: String },

    #[error("slot {price}: expected client order id '{expected}', got '{actual}'")]
    OrderMismatch { price: f64, expected: String, actual: String },

    #[error("invalid ladder: {0}")]
    InvalidLadder(String),
}

fn invalid(price: f64, reason: &str) -> LedgerError {
    LedgerError::InvalidTransition { price, reason: reason.to_string() }
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// One ladder level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot {
    pub price: f64,
    pub position_status: PositionStatus,
    pub position_qty: f64,
    pub order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub order_side: Option<Side>,
    pub order_status: SlotOrderStatus,
    pub order_price: f64,
    pub order_qty: f64,
    pub order_filled_qty: f64,
    /// Local reservation time (ms).
    pub order_created_at: u64,
    /// Exchange timestamp of the last applied snapshot (ms).
    pub order_updated_at: u64,
    pub slot_status: SlotStatus,
}

impl Slot {
    fn new(price: f64) -> Self {
        Self {
            price,
            position_status: PositionStatus::Empty,
            position_qty: 0.0,
            order_id: None,
            client_order_id: None,
            order_side: None,
            order_status: SlotOrderStatus::NotPlaced,
            order_price: 0.0,
            order_qty: 0.0,
            order_filled_qty: 0.0,
            order_created_at: 0,
            order_updated_at: 0,
            slot_status: SlotStatus::Free,
        }
    }

    /// Whether an order is live on (or in flight to) the exchange.
    pub fn has_active_order(&self) -> bool {
        self.order_status.is_active()
    }

    /// Quantity still working on the current order.
    pub fn order_remaining(&self) -> f64 {
        (self.order_qty - self.order_filled_qty).max(0.0)
    }

    fn clear_order(&mut self) {
        self.order_id = None;
        self.client_order_id = None;
        self.order_side = None;
        self.order_status = SlotOrderStatus::NotPlaced;
        self.order_price = 0.0;
        self.order_qty = 0.0;
        self.order_filled_qty = 0.0;
        self.order_created_at = 0;
        self.order_updated_at = 0;
        self.slot_status = SlotStatus::Free;
    }

    fn settle_position(&mut self) {
        if self.position_qty > QTY_EPSILON {
            self.position_status = PositionStatus::Filled;
        } else {
            self.position_qty = 0.0;
            self.position_status = PositionStatus::Empty;
        }
    }
}

/// Result of [`SlotLedger::apply_order_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The snapshot changed the slot.
    Applied,
    /// Older than what the slot already reflects.
    Stale,
    /// No slot tracks this order.
    Unmatched,
    /// The order already completed and its slot moved on.
    Retired,
}

/// Why an order id left its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retirement {
    /// The exchange reported a terminal status. Final.
    Completed,
    /// Dropped by reconciliation because the exchange could not find it.
    /// The order may still resurface and be adopted.
    Reset,
}

/// A live order as the reconciliation pass sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveOrder {
    pub price: f64,
    pub client_order_id: String,
    pub order_id: Option<String>,
    pub side: Side,
    pub created_at: u64,
    pub slot_status: SlotStatus,
}

/// Working-order counts across the ladder.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrderStats {
    pub active_buys: usize,
    pub active_sells: usize,
    pub pending_sell_qty: f64,
}

/// Point-in-time copy of the whole ledger.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub symbol: String,
    pub price_interval: f64,
    pub slots: Vec<Slot>,
    pub reconcile_count: u64,
    pub last_reconcile_time: u64,
    pub total_buy_qty: f64,
    pub total_sell_qty: f64,
    pub local_position: f64,
    pub exchange_position: Option<f64>,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    /// Ascending by price.
    slots: Vec<Slot>,
    by_price: AHashMap<i64, usize>,
    by_client_id: AHashMap<String, usize>,
    by_order_id: AHashMap<String, usize>,
    retired: AHashMap<String, Retirement>,
    retired_order: VecDeque<String>,
    reconcile_count: u64,
    last_reconcile_time: u64,
    total_buy_qty: f64,
    total_sell_qty: f64,
    exchange_position: Option<f64>,
}

impl Inner {
    fn find_order(&self, order: &CanonicalOrder) -> Option<usize> {
        if !order.client_order_id.is_empty() {
            if let Some(&idx) = self.by_client_id.get(&order.client_order_id) {
                return Some(idx);
            }
        }
        self.by_order_id.get(&order.order_id).copied()
    }

    fn retirement(&self, order: &CanonicalOrder) -> Option<Retirement> {
        let by_client_id = if order.client_order_id.is_empty() {
            None
        } else {
            self.retired.get(&order.client_order_id)
        };
        by_client_id.or_else(|| self.retired.get(&order.order_id)).copied()
    }

    fn remember_retired(&mut self, id: String, kind: Retirement) {
        if self.retired.insert(id.clone(), kind).is_none() {
            self.retired_order.push_back(id);
        }
        while self.retired_order.len() > RETIRED_CAPACITY {
            if let Some(old) = self.retired_order.pop_front() {
                self.retired.remove(&old);
            }
        }
    }

    /// Drop the slot's current order and remember its ids.
    fn retire_slot_order(&mut self, idx: usize, kind: Retirement) {
        let slot = &mut self.slots[idx];
        let client_order_id = slot.client_order_id.take();
        let order_id = slot.order_id.take();
        slot.clear_order();
        if let Some(cid) = client_order_id {
            self.by_client_id.remove(&cid);
            self.remember_retired(cid, kind);
        }
        if let Some(oid) = order_id {
            self.by_order_id.remove(&oid);
            self.remember_retired(oid, kind);
        }
    }

    fn reindex(&mut self, decimals: u32) {
        self.by_price.clear();
        self.by_client_id.clear();
        self.by_order_id.clear();
        for (idx, slot) in self.slots.iter().enumerate() {
            self.by_price.insert(price_key(slot.price, decimals), idx);
            if let Some(cid) = &slot.client_order_id {
                self.by_client_id.insert(cid.clone(), idx);
            }
            if let Some(oid) = &slot.order_id {
                self.by_order_id.insert(oid.clone(), idx);
            }
        }
    }

    /// Index of the slot at `key`, inserting an empty one in ladder order if needed.
    fn slot_or_insert(&mut self, key: i64, price: f64, decimals: u32) -> usize {
        if let Some(&idx) = self.by_price.get(&key) {
            return idx;
        }
        let pos = self.slots.partition_point(|s| price_key(s.price, decimals) < key);
        self.slots.insert(pos, Slot::new(price));
        self.reindex(decimals);
        pos
    }
}

/// Integer key of a price at `decimals` precision.
pub fn price_key(price: f64, decimals: u32) -> i64 {
    (price * 10f64.powi(decimals as i32)).round() as i64
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Slot ledger for one symbol.
pub struct SlotLedger {
    symbol: String,
    price_interval: f64,
    price_decimals: u32,
    inner: RwLock<Inner>,
}

impl SlotLedger {
    pub fn new(symbol: &str, price_interval: f64, price_decimals: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            price_interval,
            price_decimals,
            inner: RwLock::new(Inner::default()),
        }
    }

    fn key(&self, price: f64) -> i64 {
        price_key(price, self.price_decimals)
    }

    fn index(&self, inner: &Inner, price: f64) -> Result<usize, LedgerError> {
        inner.by_price.get(&self.key(price)).copied().ok_or(LedgerError::UnknownSlot(price))
    }

    // -----------------------------------------------------------------------
    // Ladder
    // -----------------------------------------------------------------------

    /// Create `2 * window_size + 1` slots centred on `anchor`. Levels at or
    /// below zero are skipped. A ladder is built once.
    pub fn build_ladder(&self, anchor: f64, window_size: u32) -> Result<usize, LedgerError> {
        if !(self.price_interval.is_finite() && self.price_interval > 0.0) {
            return Err(LedgerError::InvalidLadder(format!("price interval {}", self.price_interval)));
        }
        if !(anchor.is_finite() && anchor > 0.0) {
            return Err(LedgerError::InvalidLadder(format!("anchor {anchor}")));
        }
        let mut inner = self.inner.write();
        if !inner.slots.is_empty() {
            return Err(LedgerError::InvalidLadder(format!("{} ladder already built", self.symbol)));
        }
        let anchor = round_to(anchor, self.price_decimals);
        let window = i64::from(window_size);
        inner.slots = (-window..=window)
            .map(|step| round_to(anchor + step as f64 * self.price_interval, self.price_decimals))
            .filter(|price| *price > 0.0)
            .map(Slot::new)
            .collect();
        inner.reindex(self.price_decimals);
        debug!("[ledger] {} ladder built: {} slots around {anchor}", self.symbol, inner.slots.len());
        Ok(inner.slots.len())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn get_price_interval(&self) -> f64 {
        self.price_interval
    }

    pub fn price_decimals(&self) -> u32 {
        self.price_decimals
    }

    pub fn get_slot(&self, price: f64) -> Option<Slot> {
        let inner = self.inner.read();
        inner.by_price.get(&self.key(price)).map(|&idx| inner.slots[idx].clone())
    }

    /// All slots in ladder order.
    pub fn get_all_slots(&self) -> Vec<Slot> {
        self.inner.read().slots.clone()
    }

    pub fn get_slot_count(&self) -> usize {
        self.inner.read().slots.len()
    }

    pub fn get_reconcile_count(&self) -> u64 {
        self.inner.read().reconcile_count
    }

    pub fn get_last_reconcile_time(&self) -> u64 {
        self.inner.read().last_reconcile_time
    }

    pub fn get_total_buy_qty(&self) -> f64 {
        self.inner.read().total_buy_qty
    }

    pub fn get_total_sell_qty(&self) -> f64 {
        self.inner.read().total_sell_qty
    }

    /// Sum of slot positions.
    pub fn local_position(&self) -> f64 {
        self.inner.read().slots.iter().map(|s| s.position_qty).sum()
    }

    /// Last position size reported by the exchange, if any.
    pub fn exchange_position(&self) -> Option<f64> {
        self.inner.read().exchange_position
    }

    pub fn slot_for_client_order_id(&self, client_order_id: &str) -> Option<f64> {
        let inner = self.inner.read();
        inner.by_client_id.get(client_order_id).map(|&idx| inner.slots[idx].price)
    }

    pub fn slot_for_order_id(&self, order_id: &str) -> Option<f64> {
        let inner = self.inner.read();
        inner.by_order_id.get(order_id).map(|&idx| inner.slots[idx].price)
    }

    pub fn active_orders(&self) -> Vec<ActiveOrder> {
        self.inner
            .read()
            .slots
            .iter()
            .filter(|s| s.has_active_order())
            .filter_map(|s| {
                Some(ActiveOrder {
                    price: s.price,
                    client_order_id: s.client_order_id.clone()?,
                    order_id: s.order_id.clone(),
                    side: s.order_side?,
                    created_at: s.order_created_at,
                    slot_status: s.slot_status,
                })
            })
            .collect()
    }

    pub fn order_stats(&self) -> OrderStats {
        let inner = self.inner.read();
        let mut stats = OrderStats::default();
        for slot in inner.slots.iter().filter(|s| s.has_active_order()) {
            match slot.order_side {
                Some(Side::Buy) => stats.active_buys += 1,
                Some(Side::Sell) => {
                    stats.active_sells += 1;
                    stats.pending_sell_qty += slot.order_remaining();
                }
                None => {}
            }
        }
        stats
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let inner = self.inner.read();
        LedgerSnapshot {
            symbol: self.symbol.clone(),
            price_interval: self.price_interval,
            slots: inner.slots.clone(),
            reconcile_count: inner.reconcile_count,
            last_reconcile_time: inner.last_reconcile_time,
            total_buy_qty: inner.total_buy_qty,
            total_sell_qty: inner.total_sell_qty,
            local_position: inner.slots.iter().map(|s| s.position_qty).sum(),
            exchange_position: inner.exchange_position,
        }
    }

    // -----------------------------------------------------------------------
    // Direct writes
    // -----------------------------------------------------------------------

    /// Bind `order` to the slot at `price` (created if absent) with `status`.
    pub fn upsert_slot_order(
        &self,
        price: f64,
        order: &CanonicalOrder,
        status: SlotOrderStatus,
    ) -> Result<(), LedgerError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let idx = inner.slot_or_insert(self.key(price), round_to(price, self.price_decimals), self.price_decimals);

        let slot = &inner.slots[idx];
        if slot.has_active_order() && slot.client_order_id.as_deref() != Some(order.client_order_id.as_str()) {
            return Err(LedgerError::SlotBusy { price, status: slot.slot_status });
        }
        if let Some(old) = slot.client_order_id.clone() {
            inner.by_client_id.remove(&old);
        }
        if let Some(old) = slot.order_id.clone() {
            inner.by_order_id.remove(&old);
        }

        let slot = &mut inner.slots[idx];
        slot.order_id = Some(order.order_id.clone());
        slot.client_order_id = Some(order.client_order_id.clone());
        slot.order_side = Some(order.side);
        slot.order_status = status;
        slot.order_price = order.price;
        slot.order_qty = order.quantity;
        slot.order_filled_qty = order.filled_quantity;
        slot.order_updated_at = order.update_time;
        if slot.order_created_at == 0 {
            slot.order_created_at = order.update_time;
        }
        slot.slot_status = if status.is_active() { SlotStatus::Locked } else { SlotStatus::Free };

        if !order.client_order_id.is_empty() {
            inner.by_client_id.insert(order.client_order_id.clone(), idx);
        }
        inner.by_order_id.insert(order.order_id.clone(), idx);
        Ok(())
    }

    /// Set the position of the slot at `price` (created if absent).
    pub fn upsert_slot_position(&self, price: f64, status: PositionStatus, qty: f64) {
        let mut inner = self.inner.write();
        let idx = inner.slot_or_insert(self.key(price), round_to(price, self.price_decimals), self.price_decimals);
        let slot = &mut inner.slots[idx];
        slot.position_status = status;
        slot.position_qty = if status == PositionStatus::Filled { qty.max(0.0) } else { 0.0 };
    }

    /// Hold a free slot so nothing is placed on it.
    pub fn lock_slot(&self, price: f64) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        let idx = self.index(&inner, price)?;
        let slot = &mut inner.slots[idx];
        if slot.slot_status != SlotStatus::Free || slot.has_active_order() {
            return Err(LedgerError::SlotBusy { price, status: slot.slot_status });
        }
        slot.slot_status = SlotStatus::Locked;
        Ok(())
    }

    /// Release a lock taken with [`lock_slot`](Self::lock_slot). Slots with a
    /// working order stay locked until the order completes.
    pub fn unlock_slot(&self, price: f64) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        let idx = self.index(&inner, price)?;
        let slot = &mut inner.slots[idx];
        match slot.slot_status {
            SlotStatus::Free => Ok(()),
            SlotStatus::Pending => Err(invalid(price, "pending reservations are released, not unlocked")),
            SlotStatus::Locked if slot.has_active_order() => Err(invalid(price, "slot has a working order")),
            SlotStatus::Locked => {
                slot.slot_status = SlotStatus::Free;
                Ok(())
            }
        }
    }

    pub fn set_exchange_position(&self, size: f64) {
        self.inner.write().exchange_position = Some(size);
    }

    pub fn record_reconcile(&self, now: u64) {
        let mut inner = self.inner.write();
        inner.reconcile_count += 1;
        inner.last_reconcile_time = now;
    }

    // -----------------------------------------------------------------------
    // Placement write path
    // -----------------------------------------------------------------------

    /// Claim a free slot for a new order: FREE → PENDING, order → PLACED.
    ///
    /// A buy needs an empty position, a sell a filled one. A previous
    /// terminal order on the slot (the filled buy of a round trip) is retired.
    pub fn reserve_slot(
        &self,
        price: f64,
        side: Side,
        client_order_id: &str,
        quantity: f64,
        order_price: f64,
        now: u64,
    ) -> Result<(), LedgerError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let idx = self.index(inner, price)?;

        let slot = &inner.slots[idx];
        if slot.slot_status != SlotStatus::Free || slot.has_active_order() {
            return Err(LedgerError::SlotBusy { price, status: slot.slot_status });
        }
        match (side, slot.position_status) {
            (Side::Buy, PositionStatus::Filled) => return Err(invalid(price, "buy needs an empty position")),
            (Side::Sell, PositionStatus::Empty) => return Err(invalid(price, "sell needs a filled position")),
            _ => {}
        }
        if inner.by_client_id.contains_key(client_order_id) || inner.retired.contains_key(client_order_id) {
            return Err(invalid(price, "client order id already used"));
        }
        if slot.client_order_id.is_some() || slot.order_id.is_some() {
            inner.retire_slot_order(idx, Retirement::Completed);
        }

        let slot = &mut inner.slots[idx];
        slot.client_order_id = Some(client_order_id.to_string());
        slot.order_side = Some(side);
        slot.order_status = SlotOrderStatus::Placed;
        slot.order_price = order_price;
        slot.order_qty = quantity;
        slot.order_filled_qty = 0.0;
        slot.order_created_at = now;
        slot.order_updated_at = 0;
        slot.slot_status = SlotStatus::Pending;
        inner.by_client_id.insert(client_order_id.to_string(), idx);
        Ok(())
    }

    /// Record the exchange acknowledgement of a reserved order: PENDING → LOCKED.
    ///
    /// Idempotent when the stream already confirmed or even completed the order.
    pub fn mark_submitted(&self, price: f64, order: &CanonicalOrder) -> Result<(), LedgerError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let idx = self.index(inner, price)?;

        let slot = &mut inner.slots[idx];
        if slot.client_order_id.as_deref() != Some(order.client_order_id.as_str()) {
            if inner.retired.contains_key(&order.client_order_id) {
                return Ok(());
            }
            return Err(LedgerError::OrderMismatch {
                price,
                expected: slot.client_order_id.clone().unwrap_or_default(),
                actual: order.client_order_id.clone(),
            });
        }
        if slot.order_id.is_none() {
            slot.order_id = Some(order.order_id.clone());
            inner.by_order_id.insert(order.order_id.clone(), idx);
        }
        if slot.slot_status == SlotStatus::Pending {
            slot.slot_status = SlotStatus::Locked;
        }
        Ok(())
    }

    /// Undo a reservation whose placement failed: PENDING → FREE.
    ///
    /// The client id is not retired: if the request did reach the exchange,
    /// the order later surfaces as unmatched and reconciliation adopts it.
    pub fn release_reservation(&self, price: f64, client_order_id: &str) -> Result<(), LedgerError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let idx = self.index(inner, price)?;

        let slot = &mut inner.slots[idx];
        if slot.client_order_id.as_deref() != Some(client_order_id) {
            return Err(LedgerError::OrderMismatch {
                price,
                expected: slot.client_order_id.clone().unwrap_or_default(),
                actual: client_order_id.to_string(),
            });
        }
        if slot.slot_status != SlotStatus::Pending {
            return Err(invalid(price, "only pending reservations can be released"));
        }
        slot.clear_order();
        inner.by_client_id.remove(client_order_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Exchange-driven updates
    // -----------------------------------------------------------------------

    /// Apply an order snapshot from the stream or a REST query.
    pub fn apply_order_update(&self, order: &CanonicalOrder) -> ApplyOutcome {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(idx) = inner.find_order(order) else {
            return match inner.retirement(order) {
                Some(Retirement::Completed) => ApplyOutcome::Retired,
                Some(Retirement::Reset) | None => ApplyOutcome::Unmatched,
            };
        };

        let slot = &mut inner.slots[idx];
        if order.update_time < slot.order_updated_at {
            return ApplyOutcome::Stale;
        }
        let delta = order.filled_quantity - slot.order_filled_qty;
        if delta < -QTY_EPSILON {
            return ApplyOutcome::Stale;
        }
        let side = slot.order_side.unwrap_or(order.side);
        if side != order.side {
            warn!("[ledger] {} slot {}: side mismatch for {}", self.symbol, slot.price, order.order_id);
            return ApplyOutcome::Unmatched;
        }

        if delta > QTY_EPSILON {
            match side {
                Side::Buy => {
                    slot.position_qty += delta;
                    inner.total_buy_qty += delta;
                }
                Side::Sell => {
                    slot.position_qty = (slot.position_qty - delta).max(0.0);
                    inner.total_sell_qty += delta;
                }
            }
            slot.order_filled_qty = order.filled_quantity;
        }
        slot.order_updated_at = order.update_time;
        if slot.order_id.is_none() {
            slot.order_id = Some(order.order_id.clone());
            inner.by_order_id.insert(order.order_id.clone(), idx);
        }
        slot.settle_position();

        let retire = match order.status {
            OrderStatus::New => {
                slot.order_status = SlotOrderStatus::Confirmed;
                slot.slot_status = SlotStatus::Locked;
                false
            }
            OrderStatus::PartiallyFilled => {
                slot.order_status = SlotOrderStatus::PartiallyFilled;
                slot.slot_status = SlotStatus::Locked;
                false
            }
            OrderStatus::Filled if side == Side::Buy => {
                slot.order_status = SlotOrderStatus::Filled;
                slot.slot_status = SlotStatus::Free;
                false
            }
            // Sell filled closes the round trip; cancellations keep any partial position.
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired => true,
        };
        if retire {
            debug!("[ledger] {} slot {} reset after {:?} {}", self.symbol, slot.price, order.status, order.order_id);
            inner.retire_slot_order(idx, Retirement::Completed);
        }
        ApplyOutcome::Applied
    }

    /// Exchange-is-truth repair: the order behind `client_order_id` no longer
    /// exists, so the slot goes back to NOT_PLACED / FREE. Returns whether
    /// anything changed.
    pub fn reset_missing_order(&self, price: f64, client_order_id: &str) -> Result<bool, LedgerError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let idx = self.index(inner, price)?;

        let slot = &mut inner.slots[idx];
        match slot.client_order_id.as_deref() {
            None => return Ok(false),
            Some(cid) if cid != client_order_id => {
                return Err(LedgerError::OrderMismatch {
                    price,
                    expected: cid.to_string(),
                    actual: client_order_id.to_string(),
                });
            }
            Some(_) => {}
        }
        if !slot.has_active_order() {
            return Ok(false);
        }
        slot.settle_position();
        inner.retire_slot_order(idx, Retirement::Reset);
        Ok(true)
    }

    /// Bind an exchange order carrying our client id prefix (found after a
    /// restart) to its slot: a buy sits at its own price, a sell one interval
    /// above the slot it closes. Returns the slot price.
    ///
    /// Orders the ledger already saw complete are refused, whatever a lagging
    /// open-order list says about them.
    pub fn adopt_order(&self, order: &CanonicalOrder) -> Result<f64, LedgerError> {
        if self.inner.read().retirement(order) == Some(Retirement::Completed) {
            return Err(invalid(order.price, "order already completed"));
        }
        let status = match order.status {
            OrderStatus::New => SlotOrderStatus::Confirmed,
            OrderStatus::PartiallyFilled => SlotOrderStatus::PartiallyFilled,
            _ => return Err(invalid(order.price, "only working orders can be adopted")),
        };
        let slot_price = match order.side {
            Side::Buy => order.price,
            Side::Sell => order.price - self.price_interval,
        };
        let slot_price = round_to(slot_price, self.price_decimals);
        self.upsert_slot_order(slot_price, order, status)?;

        let position = match order.side {
            Side::Buy => order.filled_quantity,
            Side::Sell => order.remaining(),
        };
        let position_status = if position > QTY_EPSILON { PositionStatus::Filled } else { PositionStatus::Empty };
        self.upsert_slot_position(slot_price, position_status, position);
        Ok(slot_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYMBOL: &str = "BTCUSDT";

    fn ledger() -> SlotLedger {
        let ledger = SlotLedger::new(SYMBOL, 10.0, 2);
        ledger.build_ladder(100.0, 2).unwrap();
        ledger
    }

    fn order(cid: &str, side: Side, price: f64, filled: f64, status: OrderStatus, ts: u64) -> CanonicalOrder {
        CanonicalOrder {
            order_id: format!("ex-{cid}"),
            client_order_id: cid.to_string(),
            symbol: SYMBOL.into(),
            side,
            price,
            quantity: 1.0,
            filled_quantity: filled,
            status,
            reduce_only: side == Side::Sell,
            update_time: ts,
        }
    }

    fn place(ledger: &SlotLedger, price: f64, side: Side, cid: &str) -> CanonicalOrder {
        let order_price = if side == Side::Buy { price } else { price + 10.0 };
        ledger.reserve_slot(price, side, cid, 1.0, order_price, 1).unwrap();
        let ack = order(cid, side, order_price, 0.0, OrderStatus::New, 1);
        ledger.mark_submitted(price, &ack).unwrap();
        ack
    }

    #[test]
    fn ladder_is_symmetric_and_skips_non_positive_levels() {
        let ledger = ledger();
        let prices: Vec<f64> = ledger.get_all_slots().iter().map(|s| s.price).collect();
        assert_eq!(prices, vec![80.0, 90.0, 100.0, 110.0, 120.0]);

        let low = SlotLedger::new(SYMBOL, 10.0, 2);
        assert_eq!(low.build_ladder(15.0, 2).unwrap(), 4);
        assert!(matches!(low.build_ladder(15.0, 2), Err(LedgerError::InvalidLadder(_))));
        assert!(matches!(SlotLedger::new(SYMBOL, 10.0, 2).build_ladder(0.0, 2), Err(LedgerError::InvalidLadder(_))));
    }

    #[test]
    fn fractional_prices_resolve_to_the_same_slot() {
        let ledger = SlotLedger::new(SYMBOL, 0.1, 1);
        ledger.build_ladder(0.3, 1).unwrap();
        assert!(ledger.get_slot(0.1 + 0.2).is_some());
        assert!(ledger.get_slot(0.4).is_some());
    }

    #[test]
    fn full_round_trip_resets_the_slot() {
        let ledger = ledger();
        place(&ledger, 90.0, Side::Buy, "b1");
        assert_eq!(ledger.get_slot(90.0).unwrap().slot_status, SlotStatus::Locked);

        assert_eq!(
            ledger.apply_order_update(&order("b1", Side::Buy, 90.0, 1.0, OrderStatus::Filled, 5)),
            ApplyOutcome::Applied
        );
        let slot = ledger.get_slot(90.0).unwrap();
        assert_eq!(slot.position_status, PositionStatus::Filled);
        assert_eq!(slot.position_qty, 1.0);
        assert_eq!(slot.order_status, SlotOrderStatus::Filled);
        assert_eq!(slot.slot_status, SlotStatus::Free);
        assert_eq!(ledger.get_total_buy_qty(), 1.0);

        place(&ledger, 90.0, Side::Sell, "s1");
        assert_eq!(ledger.get_slot(90.0).unwrap().order_price, 100.0);
        ledger.apply_order_update(&order("s1", Side::Sell, 100.0, 1.0, OrderStatus::Filled, 9));

        let slot = ledger.get_slot(90.0).unwrap();
        assert_eq!(slot.position_status, PositionStatus::Empty);
        assert_eq!(slot.order_status, SlotOrderStatus::NotPlaced);
        assert_eq!(slot.slot_status, SlotStatus::Free);
        assert_eq!(ledger.get_total_sell_qty(), 1.0);
        assert_eq!(ledger.local_position(), 0.0);

        // Late duplicates of either leg are recognized.
        assert_eq!(
            ledger.apply_order_update(&order("b1", Side::Buy, 90.0, 1.0, OrderStatus::Filled, 5)),
            ApplyOutcome::Retired
        );
        assert_eq!(
            ledger.apply_order_update(&order("s1", Side::Sell, 100.0, 1.0, OrderStatus::Filled, 9)),
            ApplyOutcome::Retired
        );
    }

    #[test]
    fn reservation_rules() {
        let ledger = ledger();
        assert!(matches!(
            ledger.reserve_slot(90.0, Side::Sell, "s", 1.0, 100.0, 1),
            Err(LedgerError::InvalidTransition { .. })
        ));
        assert!(matches!(ledger.reserve_slot(95.0, Side::Buy, "x", 1.0, 95.0, 1), Err(LedgerError::UnknownSlot(_))));

        ledger.reserve_slot(90.0, Side::Buy, "b1", 1.0, 90.0, 1).unwrap();
        assert!(matches!(
            ledger.reserve_slot(90.0, Side::Buy, "b2", 1.0, 90.0, 1),
            Err(LedgerError::SlotBusy { status: SlotStatus::Pending, .. })
        ));
        assert!(matches!(
            ledger.reserve_slot(80.0, Side::Buy, "b1", 1.0, 80.0, 1),
            Err(LedgerError::InvalidTransition { .. })
        ));

        ledger.release_reservation(90.0, "b1").unwrap();
        let slot = ledger.get_slot(90.0).unwrap();
        assert_eq!(slot.slot_status, SlotStatus::Free);
        assert_eq!(slot.order_status, SlotOrderStatus::NotPlaced);
        assert!(ledger.slot_for_client_order_id("b1").is_none());
        assert!(matches!(ledger.release_reservation(90.0, "b1"), Err(LedgerError::OrderMismatch { .. })));
    }

    #[test]
    fn stream_may_confirm_before_rest_ack() {
        let ledger = ledger();
        ledger.reserve_slot(100.0, Side::Buy, "b1", 1.0, 100.0, 1).unwrap();
        let new = order("b1", Side::Buy, 100.0, 0.0, OrderStatus::New, 3);
        assert_eq!(ledger.apply_order_update(&new), ApplyOutcome::Applied);
        assert_eq!(ledger.get_slot(100.0).unwrap().slot_status, SlotStatus::Locked);

        ledger.mark_submitted(100.0, &new).unwrap();
        assert_eq!(ledger.slot_for_order_id("ex-b1"), Some(100.0));

        // Even a completed order acknowledges cleanly.
        ledger.apply_order_update(&order("b1", Side::Buy, 100.0, 0.0, OrderStatus::Canceled, 4));
        ledger.mark_submitted(100.0, &new).unwrap();
    }

    #[test]
    fn reverse_arrival_keeps_the_newest_state() {
        let ledger = ledger();
        place(&ledger, 100.0, Side::Buy, "b1");
        ledger.apply_order_update(&order("b1", Side::Buy, 100.0, 1.0, OrderStatus::Filled, 30));
        assert_eq!(
            ledger.apply_order_update(&order("b1", Side::Buy, 100.0, 0.5, OrderStatus::PartiallyFilled, 20)),
            ApplyOutcome::Stale
        );
        assert_eq!(
            ledger.apply_order_update(&order("b1", Side::Buy, 100.0, 0.0, OrderStatus::New, 10)),
            ApplyOutcome::Stale
        );

        let slot = ledger.get_slot(100.0).unwrap();
        assert_eq!(slot.order_status, SlotOrderStatus::Filled);
        assert_eq!(slot.position_qty, 1.0);
        assert_eq!(ledger.get_total_buy_qty(), 1.0);
    }

    #[test]
    fn partial_fill_then_cancel_keeps_the_position() {
        let ledger = ledger();
        place(&ledger, 100.0, Side::Buy, "b1");
        ledger.apply_order_update(&order("b1", Side::Buy, 100.0, 0.4, OrderStatus::PartiallyFilled, 5));
        assert_eq!(ledger.get_slot(100.0).unwrap().order_status, SlotOrderStatus::PartiallyFilled);

        ledger.apply_order_update(&order("b1", Side::Buy, 100.0, 0.4, OrderStatus::Canceled, 6));
        let slot = ledger.get_slot(100.0).unwrap();
        assert_eq!(slot.order_status, SlotOrderStatus::NotPlaced);
        assert_eq!(slot.slot_status, SlotStatus::Free);
        assert_eq!(slot.position_status, PositionStatus::Filled);
        assert!((slot.position_qty - 0.4).abs() < QTY_EPSILON);
    }

    #[test]
    fn unknown_orders_are_unmatched() {
        let ledger = ledger();
        assert_eq!(
            ledger.apply_order_update(&order("zz", Side::Buy, 100.0, 0.0, OrderStatus::New, 1)),
            ApplyOutcome::Unmatched
        );
    }

    #[test]
    fn missing_order_reset() {
        let ledger = ledger();
        place(&ledger, 80.0, Side::Buy, "b1");
        assert!(matches!(ledger.reset_missing_order(80.0, "other"), Err(LedgerError::OrderMismatch { .. })));
        assert!(ledger.reset_missing_order(80.0, "b1").unwrap());
        assert!(!ledger.reset_missing_order(80.0, "b1").unwrap());
        assert_eq!(ledger.get_slot(80.0).unwrap().order_status, SlotOrderStatus::NotPlaced);

        // A reset order that turns up again can still be adopted.
        let resurfaced = order("b1", Side::Buy, 80.0, 0.0, OrderStatus::New, 4);
        assert_eq!(ledger.apply_order_update(&resurfaced), ApplyOutcome::Unmatched);
        assert_eq!(ledger.adopt_order(&resurfaced).unwrap(), 80.0);
        assert_eq!(ledger.slot_for_client_order_id("b1"), Some(80.0));
    }

    #[test]
    fn completed_orders_are_never_adopted() {
        let ledger = ledger();
        place(&ledger, 90.0, Side::Buy, "b1");
        ledger.apply_order_update(&order("b1", Side::Buy, 90.0, 1.0, OrderStatus::Filled, 5));
        place(&ledger, 90.0, Side::Sell, "s1");
        ledger.apply_order_update(&order("s1", Side::Sell, 100.0, 1.0, OrderStatus::Filled, 9));
        let settled = ledger.get_slot(90.0).unwrap();

        // A lagging open-order list still shows the sell working.
        let lagging = order("s1", Side::Sell, 100.0, 0.0, OrderStatus::New, 5);
        assert_eq!(ledger.apply_order_update(&lagging), ApplyOutcome::Retired);
        assert!(matches!(ledger.adopt_order(&lagging), Err(LedgerError::InvalidTransition { .. })));
        assert_eq!(ledger.get_slot(90.0).unwrap(), settled);
        assert_eq!(ledger.get_total_sell_qty(), 1.0);
    }

    #[test]
    fn adopted_sell_binds_one_interval_below() {
        let ledger = ledger();
        let sell = CanonicalOrder {
            quantity: 2.0,
            filled_quantity: 0.5,
            ..order("s9", Side::Sell, 110.0, 0.5, OrderStatus::PartiallyFilled, 7)
        };
        assert_eq!(ledger.adopt_order(&sell).unwrap(), 100.0);

        let slot = ledger.get_slot(100.0).unwrap();
        assert_eq!(slot.slot_status, SlotStatus::Locked);
        assert_eq!(slot.order_status, SlotOrderStatus::PartiallyFilled);
        assert_eq!(slot.position_status, PositionStatus::Filled);
        assert_eq!(slot.position_qty, 1.5);
        assert_eq!(ledger.slot_for_client_order_id("s9"), Some(100.0));

        let stats = ledger.order_stats();
        assert_eq!(stats.active_sells, 1);
        assert_eq!(stats.pending_sell_qty, 1.5);

        let done = order("s8", Side::Buy, 90.0, 1.0, OrderStatus::Filled, 7);
        assert!(ledger.adopt_order(&done).is_err());
    }

    #[test]
    fn adoption_outside_the_ladder_adds_a_slot_in_order() {
        let ledger = ledger();
        ledger.adopt_order(&order("b7", Side::Buy, 70.0, 0.0, OrderStatus::New, 1)).unwrap();
        let prices: Vec<f64> = ledger.get_all_slots().iter().map(|s| s.price).collect();
        assert_eq!(prices.first(), Some(&70.0));
        assert_eq!(ledger.slot_for_client_order_id("b7"), Some(70.0));
        assert_eq!(ledger.get_slot_count(), 6);
    }

    #[test]
    fn lock_and_unlock() {
        let ledger = ledger();
        ledger.lock_slot(100.0).unwrap();
        assert!(matches!(ledger.lock_slot(100.0), Err(LedgerError::SlotBusy { .. })));
        let locked = ledger.get_slot(100.0).unwrap();
        assert!(ledger.reserve_slot(100.0, Side::Buy, "b1", 1.0, 100.0, 1).is_err());
        assert_eq!(ledger.get_slot(100.0).unwrap(), locked);
        assert!(ledger.slot_for_client_order_id("b1").is_none());
        ledger.unlock_slot(100.0).unwrap();
        ledger.unlock_slot(100.0).unwrap();

        place(&ledger, 100.0, Side::Buy, "b1");
        let working = ledger.get_slot(100.0).unwrap();
        assert!(matches!(ledger.unlock_slot(100.0), Err(LedgerError::InvalidTransition { .. })));
        assert!(matches!(
            ledger.reserve_slot(100.0, Side::Sell, "s1", 1.0, 110.0, 2),
            Err(LedgerError::SlotBusy { .. })
        ));
        assert_eq!(ledger.get_slot(100.0).unwrap(), working);
    }

    #[test]
    fn reconcile_counters_and_snapshot() {
        let ledger = ledger();
        ledger.record_reconcile(1_000);
        ledger.record_reconcile(2_000);
        ledger.set_exchange_position(0.5);
        let snap = ledger.snapshot();
        assert_eq!(snap.reconcile_count, 2);
        assert_eq!(snap.last_reconcile_time, 2_000);
        assert_eq!(snap.exchange_position, Some(0.5));
        assert_eq!(snap.slots.len(), 5);
    }
}
