//! Producer-side handle onto a duct.

use std::sync::Arc;

use serde::Serialize;

use super::duct::{Duct, DuctImpl, DuctKind};

/// Put-side counters of one [`Inlet`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InletStats {
    pub kind: DuctKind,
    pub duct: &'static str,
    pub successful_puts: usize,
    pub blocked_puts: usize,
    pub dropped_puts: usize,
}

impl InletStats {
    pub fn attempted_puts(&self) -> usize {
        self.successful_puts + self.dropped_puts
    }

    /// Fraction of `try_put` attempts that were dropped.
    pub fn drop_rate(&self) -> f64 {
        match self.attempted_puts() {
            0 => 0.0,
            n => self.dropped_puts as f64 / n as f64,
        }
    }
}

/// Sending end of a channel. One producer per inlet.
pub struct Inlet<T> {
    duct: Arc<Duct<T>>,
    successful_puts: usize,
    blocked_puts: usize,
    dropped_puts: usize,
}

impl<T> Inlet<T> {
    pub fn new(duct: Arc<Duct<T>>) -> Self {
        Self {
            duct,
            successful_puts: 0,
            blocked_puts: 0,
            dropped_puts: 0,
        }
    }

    /// Non-blocking put. Returns `false` and counts a drop if the duct is full.
    pub fn try_put(&mut self, val: T) -> bool {
        self.try_put_or_return(val).is_ok()
    }

    /// Like [`try_put`](Self::try_put) but hands a refused value back.
    pub fn try_put_or_return(&mut self, val: T) -> Result<(), T> {
        match self.duct.try_put(val) {
            Ok(()) => {
                self.successful_puts += 1;
                Ok(())
            }
            Err(val) => {
                self.dropped_puts += 1;
                log::trace!("{} dropped a put", self.duct.name());
                Err(val)
            }
        }
    }

    /// Spin until the duct accepts `val`.
    pub fn sure_put(&mut self, val: T) {
        crate::occupancy_audit!(self.duct.caps(), "SurePut", 1);
        let mut val = val;
        let mut blocked = false;
        loop {
            match self.duct.try_put(val) {
                Ok(()) => break,
                Err(back) => {
                    val = back;
                    if !blocked {
                        blocked = true;
                        self.blocked_puts += 1;
                    }
                    std::hint::spin_loop();
                }
            }
        }
        self.successful_puts += 1;
    }

    pub fn try_flush(&mut self) -> bool {
        self.duct.try_flush()
    }

    pub fn available_capacity(&self) -> usize {
        self.duct.available_capacity()
    }

    /// Replace the implementation shared with the paired outlet.
    pub fn emplace_duct<D: DuctImpl<T> + 'static>(&self, imp: D) {
        self.duct.emplace(Box::new(imp));
    }

    pub fn emplace_duct_boxed(&self, imp: Box<dyn DuctImpl<T>>) {
        self.duct.emplace(imp);
    }

    /// Point only this handle at a fresh duct built from `imp`.
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

    pub fn successful_puts(&self) -> usize {
        self.successful_puts
    }

    pub fn blocked_puts(&self) -> usize {
        self.blocked_puts
    }

    pub fn dropped_puts(&self) -> usize {
        self.dropped_puts
    }

    pub fn stats(&self) -> InletStats {
        InletStats {
            kind: self.duct_kind(),
            duct: self.duct_name(),
            successful_puts: self.successful_puts,
            blocked_puts: self.blocked_puts,
            dropped_puts: self.dropped_puts,
        }
    }
}

impl<T> std::fmt::Debug for Inlet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inlet")
            .field("duct", &self.duct)
            .field("successful_puts", &self.successful_puts)
            .field("dropped_puts", &self.dropped_puts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ducts::{IntraDuct, ThreadDuct};

    fn inlet(capacity: usize) -> Inlet<u32> {
        Inlet::new(Arc::new(Duct::from_impl(IntraDuct::new(capacity))))
    }

    #[test]
    fn try_put_counts_drops() {
        let mut inlet = inlet(2);
        assert!(inlet.try_put(1));
        assert!(inlet.try_put(2));
        assert!(!inlet.try_put(3));
        let stats = inlet.stats();
        assert_eq!(stats.successful_puts, 2);
        assert_eq!(stats.dropped_puts, 1);
        assert_eq!(stats.attempted_puts(), 3);
        assert!((stats.drop_rate() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn refused_value_is_handed_back() {
        let mut inlet = inlet(1);
        assert_eq!(inlet.try_put_or_return(5), Ok(()));
        assert_eq!(inlet.try_put_or_return(6), Err(6));
    }

    #[test]
    fn split_rebinds_only_this_handle() {
        let mut inlet = inlet(2);
        let before = inlet.duct_uid();
        inlet.split_duct(ThreadDuct::<u32>::new(2));
        assert_ne!(inlet.duct_uid(), before);
        assert_eq!(inlet.duct_kind(), DuctKind::Thread);
    }

    #[test]
    fn stats_serialize() {
        let inlet = inlet(1);
        let json = serde_json::to_value(inlet.stats()).unwrap();
        assert_eq!(json["duct"], "IntraDuct");
        assert_eq!(json["kind"], "Intra");
    }
}
