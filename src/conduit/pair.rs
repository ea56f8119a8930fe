//! Constructors bundling a fresh duct with its handles.

use std::sync::Arc;

use super::duct::{Duct, DuctImpl};
use super::inlet::Inlet;
use super::outlet::Outlet;
use crate::ducts::IntraDuct;

/// An inlet and an outlet sharing one duct.
#[derive(Debug)]
pub struct Conduit<T> {
    pub inlet: Inlet<T>,
    pub outlet: Outlet<T>,
}

impl<T: Clone + Default + Send + 'static> Conduit<T> {
    /// Intra-thread conduit holding up to `capacity` values.
    pub fn new(capacity: usize) -> Self {
        Self::with_impl(IntraDuct::new(capacity))
    }
}

impl<T> Conduit<T> {
    pub fn with_impl<D: DuctImpl<T> + 'static>(imp: D) -> Self {
        let duct = Arc::new(Duct::from_impl(imp));
        Self {
            inlet: Inlet::new(Arc::clone(&duct)),
            outlet: Outlet::new(duct),
        }
    }

    pub fn into_parts(self) -> (Inlet<T>, Outlet<T>) {
        (self.inlet, self.outlet)
    }
}

/// Inlet over a send-only transport.
#[derive(Debug)]
pub struct Sink<T>(Inlet<T>);

impl<T> Sink<T> {
    pub fn new<D: DuctImpl<T> + 'static>(imp: D) -> Self {
        Self(Inlet::new(Arc::new(Duct::from_impl(imp))))
    }

    pub fn into_inlet(self) -> Inlet<T> {
        self.0
    }
}

/// Outlet over a receive-only transport.
#[derive(Debug)]
pub struct Source<T>(Outlet<T>);

impl<T> Source<T> {
    pub fn new<D: DuctImpl<T> + 'static>(imp: D) -> Self {
        Self(Outlet::new(Arc::new(Duct::from_impl(imp))))
    }

    pub fn into_outlet(self) -> Outlet<T> {
        self.0
    }
}
