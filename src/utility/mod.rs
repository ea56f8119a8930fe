//! Small data-structure building blocks shared by the duct implementations.

pub mod circular_index;
pub mod ring_buffer;

pub use circular_index::CircularIndex;
pub use ring_buffer::RingBuffer;
