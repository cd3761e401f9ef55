//! Order execution and pending-order lifecycle.
//!
//! - [`OrderExecutor`]: turns a validated action plus a session decision
//!   into a broker order, registering limit orders for tracking.
//! - [`PendingOrderTracker`]: the outstanding limit-order set.
//! - [`ResubmitMonitor`]: timed cancel-and-replace sweep with a bounded
//!   resubmission count.
//! - [`SymbolLocks`]: keyed lock map serializing all per-symbol state
//!   changes.

pub mod executor;
pub mod locks;
pub mod pending;
pub mod sweep;

pub use executor::{buffered_limit, placement_error, trade_error_from_broker, OrderExecutor};
pub use locks::SymbolLocks;
pub use pending::{PendingOrder, PendingOrderTracker};
pub use sweep::{ResubmitMonitor, SweepConfig};
