//! # grid-engine
//!
//! Slot-based grid state and the loops that keep it consistent with the
//! exchange.
//!
//! | Module        | Role                                                        |
//! |---------------|-------------------------------------------------------------|
//! | `ledger`      | [`SlotLedger`]: price-keyed slots, the single source of local truth |
//! | `dispatcher`  | [`EventDispatcher`]: stream events → ledger, inline          |
//! | `reconcile`   | [`ReconciliationEngine`]: periodic exchange-is-truth repair  |
//! | `executor`    | [`SlotExecutor`]: reserve → place → confirm write path        |
//! | `storage`     | [`Storage`] sinks for reconciliation records                 |
//! | `supervisor`  | [`TaskSupervisor`]: shutdown signal plus bounded join        |
//!
//! The ledger is the only shared mutable state. Every writer takes its lock
//! for a short critical section and never across network I/O.

pub mod dispatcher;
pub mod executor;
pub mod ledger;
pub mod reconcile;
pub mod storage;
pub mod supervisor;

pub use dispatcher::{DispatcherStats, EventDispatcher};
pub use executor::{ExecError, SlotExecutor, SyncReport};
pub use ledger::{ApplyOutcome, LedgerError, LedgerSnapshot, Slot, SlotLedger};
pub use reconcile::{ReconcileConfig, ReconcileError, ReconcileTrigger, ReconciliationEngine};
pub use storage::{JsonlStorage, MemoryStorage, ReconciliationRecord, Storage, StorageError};
pub use supervisor::TaskSupervisor;
