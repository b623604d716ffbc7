use std::{
  collections::VecDeque,
  sync::Arc,
};

use tracing::warn;

use crate::ByteChannel;

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
  /// Hard ceiling on queued bytes. Exceeding it drops the whole backlog
  /// rather than growing unbounded.
  pub max_backlog_bytes: usize,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_backlog_bytes: 256 * 1024,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
  /// Every byte was admitted by the channel.
  Sent,
  /// Some bytes are waiting in the backlog for space to free up.
  Queued,
  /// The backlog exceeded its ceiling and was dropped entirely.
  Overflowed,
}

/// Bounded, ordered spill buffer in front of a [`ByteChannel`].
///
/// Bytes never bypass a non-empty backlog, so channel delivery preserves
/// submission order even across partial admissions.
pub struct InputQueue {
  channel:     Arc<dyn ByteChannel>,
  backlog:     VecDeque<u8>,
  max_backlog: usize,
}

impl InputQueue {
  pub fn new(channel: Arc<dyn ByteChannel>, config: QueueConfig) -> Self {
    Self {
      channel,
      backlog: VecDeque::new(),
      max_backlog: config.max_backlog_bytes,
    }
  }

  pub fn queued_bytes(&self) -> usize {
    self.backlog.len()
  }

  pub fn is_idle(&self) -> bool {
    self.backlog.is_empty()
  }

  /// Submits bytes for delivery, spilling whatever the channel does not
  /// admit right now.
  pub fn send(&mut self, bytes: &[u8]) -> QueueStatus {
    self.pump();

    if self.backlog.is_empty() {
      let admitted = self.channel.push(bytes);
      if admitted == bytes.len() {
        return QueueStatus::Sent;
      }
      self.backlog.extend(&bytes[admitted..]);
    } else {
      self.backlog.extend(bytes);
    }

    if self.backlog.len() > self.max_backlog {
      let dropped = self.backlog.len();
      self.backlog.clear();
      warn!(
        dropped_bytes = dropped,
        ceiling = self.max_backlog,
        "input backlog exceeded ceiling, dropping all queued bytes"
      );
      return QueueStatus::Overflowed;
    }

    QueueStatus::Queued
  }

  /// Retries delivery of the backlog; call whenever channel space may have
  /// freed up.
  pub fn pump(&mut self) {
    while !self.backlog.is_empty() {
      let (front, _) = self.backlog.as_slices();
      let front_len = front.len();
      let admitted = self.channel.push(front);
      self.backlog.drain(..admitted);
      if admitted < front_len {
        return;
      }
    }
  }

  pub fn clear(&mut self) {
    self.backlog.clear();
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::RingBuffer;

  fn drain(ring: &RingBuffer) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 64];
    loop {
      let n = ring.try_read(&mut buf);
      if n == 0 {
        return out;
      }
      out.extend_from_slice(&buf[..n]);
    }
  }

  #[test]
  fn oversized_payload_spills_and_drains_in_order() {
    // Capacity C, payload 2C: partial admission, remainder queued, and the
    // full payload comes out in order as space frees.
    let ring = RingBuffer::with_capacity(8);
    let mut queue = InputQueue::new(ring.clone(), QueueConfig::default());

    let payload: Vec<u8> = (0u8..16).collect();
    assert_eq!(queue.send(&payload), QueueStatus::Queued);
    assert_eq!(queue.queued_bytes(), 8);

    let mut received = drain(&ring);
    queue.pump();
    received.extend(drain(&ring));

    assert!(queue.is_idle());
    assert_eq!(received, payload);
  }

  #[test]
  fn later_sends_never_overtake_the_backlog() {
    let ring = RingBuffer::with_capacity(4);
    let mut queue = InputQueue::new(ring.clone(), QueueConfig::default());

    assert_eq!(queue.send(b"abcdef"), QueueStatus::Queued);
    assert_eq!(queue.send(b"gh"), QueueStatus::Queued);

    let mut received = Vec::new();
    while received.len() < 8 {
      received.extend(drain(&ring));
      queue.pump();
    }
    assert_eq!(received, b"abcdefgh");
  }

  #[test]
  fn pump_retries_in_channel_sized_chunks() {
    // A tiny ring forces pump through many partial admissions before the
    // backlog empties.
    let ring = RingBuffer::with_capacity(2);
    let mut queue = InputQueue::new(ring.clone(), QueueConfig::default());
    assert_eq!(queue.send(b"abcdef"), QueueStatus::Queued);

    let mut received = Vec::new();
    while received.len() < 6 {
      queue.pump();
      received.extend(drain(&ring));
    }
    assert_eq!(received, b"abcdef");
    assert!(queue.is_idle());
  }

  #[test]
  fn backlog_ceiling_drops_everything() {
    let ring = RingBuffer::with_capacity(2);
    let mut queue = InputQueue::new(
      ring.clone(),
      QueueConfig {
        max_backlog_bytes: 4,
      },
    );

    assert_eq!(queue.send(b"abcd"), QueueStatus::Queued);
    assert_eq!(queue.send(b"efgh"), QueueStatus::Overflowed);
    assert!(queue.is_idle());

    // The bytes already admitted by the ring are unaffected.
    assert_eq!(drain(&ring), b"ab");
  }
}
