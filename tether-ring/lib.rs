//! Byte transport between the controller and the embedded engine.
//!
//! The only memory literally shared with the engine's execution context is
//! [`RingBuffer`]: a fixed-capacity single-producer/single-consumer byte
//! ring driven by atomic cursors. Everything written by the controller is
//! pushed through an [`InputQueue`], which spills to a bounded backlog when
//! the ring is full and retries delivery as space frees up.

mod queue;
mod ring;

pub use queue::{
  InputQueue,
  QueueConfig,
  QueueStatus,
};
pub use ring::{
  ByteChannel,
  RingBuffer,
  RingConfig,
};
