//! Consumer-side handle onto a duct.

use std::sync::Arc;

use serde::Serialize;

use super::duct::{Duct, DuctImpl, DuctKind};

/// Get-side counters of one [`Outlet`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutletStats {
    pub kind: DuctKind,
    pub duct: &'static str,
    /// Calls that returned a value.
    pub read_count: usize,
    /// Reads that observed a value not seen by the previous read.
    pub revision_count: usize,
    /// Values stepped past, in total.
    pub consumed_count: usize,
    /// `jump_get` calls that skipped more than one value.
    pub jump_count: usize,
}

/// Receiving end of a channel. One consumer per outlet.
pub struct Outlet<T> {
    duct: Arc<Duct<T>>,
    fresh: bool,
    read_count: usize,
    revision_count: usize,
    consumed_count: usize,
    jump_count: usize,
}

impl<T> Outlet<T> {
    pub fn new(duct: Arc<Duct<T>>) -> Self {
        Self {
            duct,
            fresh: false,
            read_count: 0,
            revision_count: 0,
            consumed_count: 0,
            jump_count: 0,
        }
    }

    /// Current value; does not advance.
    pub fn get(&mut self) -> T {
        self.read_count += 1;
        if std::mem::take(&mut self.fresh) {
            self.revision_count += 1;
        }
        self.duct.get()
    }

    /// Advance past up to `requested` values; returns how many.
    pub fn try_step(&mut self, requested: usize) -> usize {
        let consumed = self.duct.try_consume_gets(requested);
        if consumed > 0 {
            self.fresh = true;
            self.consumed_count += consumed;
        }
        consumed
    }

    /// Skip to the newest available value and read it. Never blocks; with
    /// nothing new this is the previous value.
    pub fn jump_get(&mut self) -> T {
        if self.try_step(usize::MAX) > 1 {
            self.jump_count += 1;
        }
        self.get()
    }

    /// Spin until one more value can be stepped, then read it.
    pub fn get_next(&mut self) -> T {
        while self.try_step(1) == 0 {
            std::hint::spin_loop();
        }
        self.get()
    }

    pub fn pending(&self) -> usize {
        self.duct.pending()
    }

    pub fn emplace_duct<D: DuctImpl<T> + 'static>(&self, imp: D) {
        self.duct.emplace(Box::new(imp));
    }

    pub fn emplace_duct_boxed(&self, imp: Box<dyn DuctImpl<T>>) {
        self.duct.emplace(imp);
    }

    pub fn split_duct<D: DuctImpl<T> + 'static>(&mut self, imp: D) {
        self.split_duct_boxed(Box::new(imp));
    }

    pub fn split_duct_boxed(&mut self, imp: Box<dyn DuctImpl<T>>) {
        self.duct = Arc::new(Duct::new(imp));
    }

    pub fn duct_uid(&self) -> usize {
        self.duct.uid()
    }

    pub fn duct_kind(&self) -> DuctKind {
        self.duct.kind()
    }

    pub fn duct_name(&self) -> &'static str {
        self.duct.name()
    }

    pub fn read_count(&self) -> usize {
        self.read_count
    }

    pub fn revision_count(&self) -> usize {
        self.revision_count
    }

    pub fn consumed_count(&self) -> usize {
        self.consumed_count
    }

    pub fn stats(&self) -> OutletStats {
        OutletStats {
            kind: self.duct_kind(),
            duct: self.duct_name(),
            read_count: self.read_count,
            revision_count: self.revision_count,
            consumed_count: self.consumed_count,
            jump_count: self.jump_count,
        }
    }
}

impl<T> std::fmt::Debug for Outlet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outlet")
            .field("duct", &self.duct)
            .field("read_count", &self.read_count)
            .field("consumed_count", &self.consumed_count)
            .finish()
    }
}
