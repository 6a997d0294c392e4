//! Order placement for ladder slots.
//!
//! Placement is reserve → REST place → mark submitted. The reservation makes
//! the slot PENDING before any I/O so concurrent passes cannot double-place;
//! the ledger lock is never held while the request is in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, info, warn};

use grid_core::time_util::{Clock, system_clock};
use grid_core::{CanonicalOrder, GridError, OrderRequest, PositionStatus, Side, SlotStatus};
use grid_td::ExchangeAdapter;

use crate::ledger::{LedgerError, SlotLedger, price_key};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Exchange(#[from] GridError),

    #[error("slot {0} has no working order")]
    NoOrder(f64),

    #[error("slot {0}: order quantity rounds to zero")]
    ZeroQuantity(f64),
}

/// Outcome of [`SlotExecutor::sync_ladder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub placed: usize,
    pub failed: usize,
}

pub struct SlotExecutor {
    adapter: Arc<dyn ExchangeAdapter>,
    ledger: Arc<SlotLedger>,
    prefix: String,
    session: String,
    seq: AtomicU64,
    order_quantity: f64,
    clock: Clock,
}

impl SlotExecutor {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, ledger: Arc<SlotLedger>, prefix: &str, order_quantity: f64) -> Self {
        let session: String = uuid::Uuid::new_v4().simple().to_string().chars().take(6).collect();
        Self {
            adapter,
            ledger,
            prefix: prefix.to_string(),
            session,
            seq: AtomicU64::new(0),
            order_quantity,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// `{prefix}-{session}-{b|s}-{price_key}-{seq}`.
    pub fn client_order_id(&self, side: Side, price: f64) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let side = match side {
            Side::Buy => 'b',
            Side::Sell => 's',
        };
        let key = price_key(price, self.ledger.price_decimals());
        format!("{}-{}-{side}-{key}-{seq}", self.prefix, self.session)
    }

    /// Place the next order for the slot at `price`: a buy at the slot price
    /// for `order_quantity`, or a reduce-only sell one interval higher for
    /// the slot's position.
    pub async fn place_slot_order(&self, price: f64, side: Side) -> Result<CanonicalOrder, ExecError> {
        let symbol = self.ledger.symbol();
        let slot = self.ledger.get_slot(price).ok_or(LedgerError::UnknownSlot(price))?;
        let meta = self.adapter.market(symbol);
        let (order_price, quantity) = match side {
            Side::Buy => (slot.price, self.order_quantity),
            Side::Sell => (slot.price + self.ledger.get_price_interval(), slot.position_qty),
        };
        let order_price = meta.round_price(order_price);
        let quantity = meta.round_quantity(quantity);
        if quantity <= 0.0 {
            return Err(ExecError::ZeroQuantity(price));
        }

        let client_order_id = self.client_order_id(side, slot.price);
        self.ledger.reserve_slot(slot.price, side, &client_order_id, quantity, order_price, (self.clock)())?;

        let request = OrderRequest {
            symbol: symbol.to_string(),
            side,
            price: order_price,
            quantity,
            client_order_id: client_order_id.clone(),
            reduce_only: side == Side::Sell,
        };
        match self.adapter.place_order(&request).await {
            Ok(mut order) => {
                if order.client_order_id.is_empty() {
                    order.client_order_id = client_order_id;
                }
                self.ledger.mark_submitted(slot.price, &order)?;
                info!("[exec] {symbol} {side} {quantity}@{order_price} slot={} id={}", slot.price, order.order_id);
                Ok(order)
            }
            Err(e) => {
                if let Err(release) = self.ledger.release_reservation(slot.price, &client_order_id) {
                    debug!("[exec] {symbol} slot {}: reservation already moved on: {release}", slot.price);
                }
                warn!("[exec] {symbol} {side} slot {} failed: {e}", slot.price);
                Err(ExecError::Exchange(e))
            }
        }
    }

    /// Request cancellation of the slot's working order. The ledger changes
    /// when the cancel is confirmed by the stream or by reconciliation.
    pub async fn cancel_slot_order(&self, price: f64) -> Result<(), ExecError> {
        let slot = self.ledger.get_slot(price).ok_or(LedgerError::UnknownSlot(price))?;
        let order_id = match (&slot.order_id, slot.has_active_order()) {
            (Some(id), true) => id.clone(),
            _ => return Err(ExecError::NoOrder(price)),
        };
        self.adapter.cancel_order(self.ledger.symbol(), &order_id).await?;
        info!("[exec] {} cancel requested slot={price} id={order_id}", self.ledger.symbol());
        Ok(())
    }

    /// Place up to `max_orders` orders, nearest to `mark_price` first: buys on
    /// empty slots below the mark, sells on filled slots. Stops early on a
    /// transport failure.
    pub async fn sync_ladder(&self, mark_price: f64, max_orders: usize) -> SyncReport {
        let mut candidates: Vec<(f64, Side)> = self
            .ledger
            .get_all_slots()
            .into_iter()
            .filter(|s| s.slot_status == SlotStatus::Free && !s.has_active_order())
            .filter_map(|s| match s.position_status {
                PositionStatus::Filled => Some((s.price, Side::Sell)),
                PositionStatus::Empty if s.price < mark_price => Some((s.price, Side::Buy)),
                PositionStatus::Empty => None,
            })
            .collect();
        candidates.sort_by(|a, b| (a.0 - mark_price).abs().total_cmp(&(b.0 - mark_price).abs()));

        let mut report = SyncReport::default();
        for (price, side) in candidates.into_iter().take(max_orders) {
            match self.place_slot_order(price, side).await {
                Ok(_) => report.placed += 1,
                Err(ExecError::Exchange(e)) if e.is_transport() => {
                    report.failed += 1;
                    break;
                }
                Err(_) => report.failed += 1,
            }
        }
        report
    }
}
