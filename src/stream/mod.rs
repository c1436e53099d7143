//! Inter-stage plumbing
//!
//! - RingBuffer: lock-free SPSC buffer between the source and transmit threads
//! - TransmitStats: counters both threads update without locking

pub mod ring_buffer;
pub mod stats;

pub use ring_buffer::RingBuffer;
pub use stats::{StatsReport, TransmitStats};
