//! Keyed per-symbol locks.
//!
//! All state-changing operations for a symbol (validate, execute, apply
//! fill, reconcile, resubmit) run under this lock, giving each symbol a
//! total order of operations while symbols proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use bridge_core::Symbol;

#[derive(Clone, Default)]
pub struct SymbolLocks {
    inner: Arc<DashMap<Symbol, Arc<Mutex<()>>>>,
}

impl SymbolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a symbol, creating it on first use.
    /// Locks are never evicted; the symbol set is small.
    pub async fn acquire(&self, symbol: &Symbol) -> OwnedMutexGuard<()> {
        let cell = {
            let entry = self.inner.entry(symbol.clone()).or_default();
            entry.value().clone()
        };
        cell.lock_owned().await
    }
}
