use std::ops::{Deref, DerefMut};

use crate::conduit::{Inlet, Outlet};
use crate::topology::EdgeId;

/// A node's read end of one incoming edge.
#[derive(Debug)]
pub struct MeshNodeInput<T> {
    edge: EdgeId,
    outlet: Outlet<T>,
}

impl<T> MeshNodeInput<T> {
    pub(crate) fn new(edge: EdgeId, outlet: Outlet<T>) -> Self {
        Self { edge, outlet }
    }

    pub fn edge(&self) -> EdgeId {
        self.edge
    }

    pub fn into_outlet(self) -> Outlet<T> {
        self.outlet
    }
}

impl<T> Deref for MeshNodeInput<T> {
    type Target = Outlet<T>;

    fn deref(&self) -> &Outlet<T> {
        &self.outlet
    }
}

impl<T> DerefMut for MeshNodeInput<T> {
    fn deref_mut(&mut self) -> &mut Outlet<T> {
        &mut self.outlet
    }
}

/// A node's write end of one outgoing edge.
#[derive(Debug)]
pub struct MeshNodeOutput<T> {
    edge: EdgeId,
    inlet: Inlet<T>,
}

impl<T> MeshNodeOutput<T> {
    pub(crate) fn new(edge: EdgeId, inlet: Inlet<T>) -> Self {
        Self { edge, inlet }
    }

    pub fn edge(&self) -> EdgeId {
        self.edge
    }

    pub fn into_inlet(self) -> Inlet<T> {
        self.inlet
    }
}

impl<T> Deref for MeshNodeOutput<T> {
    type Target = Inlet<T>;

    fn deref(&self) -> &Inlet<T> {
        &self.inlet
    }
}

impl<T> DerefMut for MeshNodeOutput<T> {
    fn deref_mut(&mut self) -> &mut Inlet<T> {
        &mut self.inlet
    }
}

/// Handles of one node, in the order its topology entry lists the edges.
#[derive(Debug)]
pub struct MeshNode<T> {
    inputs: Vec<MeshNodeInput<T>>,
    outputs: Vec<MeshNodeOutput<T>>,
}

impl<T> MeshNode<T> {
    pub(crate) fn new(inputs: Vec<MeshNodeInput<T>>, outputs: Vec<MeshNodeOutput<T>>) -> Self {
        Self { inputs, outputs }
    }

    pub fn inputs(&self) -> &[MeshNodeInput<T>] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[MeshNodeOutput<T>] {
        &self.outputs
    }

    pub fn inputs_mut(&mut self) -> &mut [MeshNodeInput<T>] {
        &mut self.inputs
    }

    pub fn outputs_mut(&mut self) -> &mut [MeshNodeOutput<T>] {
        &mut self.outputs
    }

    /// # Panics
    ///
    /// Panics if `i` is out of range.
    pub fn input(&mut self, i: usize) -> &mut Outlet<T> {
        &mut self.inputs[i]
    }

    /// # Panics
    ///
    /// Panics if `i` is out of range.
    pub fn output(&mut self, i: usize) -> &mut Inlet<T> {
        &mut self.outputs[i]
    }

    pub fn input_for(&mut self, edge: EdgeId) -> Option<&mut Outlet<T>> {
        self.inputs
            .iter_mut()
            .find(|input| input.edge == edge)
            .map(|input| &mut input.outlet)
    }

    pub fn output_for(&mut self, edge: EdgeId) -> Option<&mut Inlet<T>> {
        self.outputs
            .iter_mut()
            .find(|output| output.edge == edge)
            .map(|output| &mut output.inlet)
    }

    pub fn into_parts(self) -> (Vec<MeshNodeInput<T>>, Vec<MeshNodeOutput<T>>) {
        (self.inputs, self.outputs)
    }
}
