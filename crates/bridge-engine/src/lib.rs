//! Trading core controller and broker-event reconciler.
//!
//! The controller ingests validated signals and sequences the session
//! gate, ledger refresh, transition validation and order execution under
//! a per-symbol lock. The reconciler consumes the broker event channel
//! serially and keeps the tracker and ledger consistent with the broker.

pub mod controller;
pub mod reconcile;

pub use controller::{CoreStatus, TradingCore};
pub use reconcile::Reconciler;
