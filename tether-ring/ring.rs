use std::{
  cell::UnsafeCell,
  sync::{
    Arc,
    atomic::{
      AtomicBool,
      AtomicUsize,
      Ordering,
    },
  },
  time::Duration,
};

use parking_lot::{
  Condvar,
  Mutex,
};

/// Minimal byte-channel surface, so the ring can be swapped for a
/// deterministic double in unit tests.
///
/// `push` admits as many bytes as currently fit and returns the admitted
/// count; full admission is `push(b) == b.len()`. `try_read` drains up to
/// `buf.len()` bytes and returns 0 when the channel would block.
pub trait ByteChannel: Send + Sync {
  fn push(&self, bytes: &[u8]) -> usize;
  fn try_read(&self, buf: &mut [u8]) -> usize;
}

#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
  pub capacity: usize,
}

impl Default for RingConfig {
  fn default() -> Self {
    Self { capacity: 8 * 1024 }
  }
}

/// Fixed-capacity SPSC byte ring.
///
/// `head` and `tail` are monotonically increasing counters; the actual
/// storage index is `counter % capacity`. The producer only advances `tail`
/// and only writes bytes in `[tail, tail + admitted)`; the consumer only
/// advances `head` and only reads `[head, head + drained)`. The two regions
/// are disjoint while `tail - head <= capacity`, which both sides preserve,
/// so the raw storage never sees a concurrent read/write of the same byte.
///
/// Each side is additionally serialized behind its own mutex so that an
/// accidental second producer (or consumer) degrades to blocking instead of
/// undefined behavior.
pub struct RingBuffer {
  storage:    UnsafeCell<Box<[u8]>>,
  capacity:   usize,
  /// Consumer cursor.
  head:       AtomicUsize,
  /// Producer cursor.
  tail:       AtomicUsize,
  closed:     AtomicBool,
  write_side: Mutex<()>,
  read_side:  Mutex<()>,
  sleep:      Mutex<()>,
  data_ready: Condvar,
}

unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
  pub fn new(config: RingConfig) -> Arc<Self> {
    assert!(config.capacity > 0, "ring capacity must be non-zero");
    Arc::new(Self {
      storage:    UnsafeCell::new(vec![0u8; config.capacity].into_boxed_slice()),
      capacity:   config.capacity,
      head:       AtomicUsize::new(0),
      tail:       AtomicUsize::new(0),
      closed:     AtomicBool::new(false),
      write_side: Mutex::new(()),
      read_side:  Mutex::new(()),
      sleep:      Mutex::new(()),
      data_ready: Condvar::new(),
    })
  }

  pub fn with_capacity(capacity: usize) -> Arc<Self> {
    Self::new(RingConfig { capacity })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes currently readable.
  pub fn len(&self) -> usize {
    let head = self.head.load(Ordering::Acquire);
    let tail = self.tail.load(Ordering::Acquire);
    tail.wrapping_sub(head)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Copies as many bytes as fit and returns the admitted count. A
  /// successful push wakes a consumer blocked in [`Self::read_blocking`].
  pub fn push(&self, bytes: &[u8]) -> usize {
    let _producer = self.write_side.lock();

    let head = self.head.load(Ordering::Acquire);
    let tail = self.tail.load(Ordering::Relaxed);
    let free = self.capacity - tail.wrapping_sub(head);
    let admitted = bytes.len().min(free);
    if admitted == 0 {
      return 0;
    }

    let start = tail % self.capacity;
    let first_run = admitted.min(self.capacity - start);
    // Safety: the producer owns [tail, tail + admitted), which the consumer
    // will not touch until tail is published below.
    unsafe {
      let storage = &mut *self.storage.get();
      storage[start..start + first_run].copy_from_slice(&bytes[..first_run]);
      if first_run < admitted {
        storage[..admitted - first_run].copy_from_slice(&bytes[first_run..admitted]);
      }
    }

    self.tail.store(tail.wrapping_add(admitted), Ordering::Release);

    let _guard = self.sleep.lock();
    self.data_ready.notify_one();

    admitted
  }

  /// Drains up to `buf.len()` bytes; 0 means the ring is currently empty.
  pub fn try_read(&self, buf: &mut [u8]) -> usize {
    let _consumer = self.read_side.lock();

    let tail = self.tail.load(Ordering::Acquire);
    let head = self.head.load(Ordering::Relaxed);
    let available = tail.wrapping_sub(head);
    let drained = buf.len().min(available);
    if drained == 0 {
      return 0;
    }

    let start = head % self.capacity;
    let first_run = drained.min(self.capacity - start);
    // Safety: the consumer owns [head, head + drained); the producer only
    // writes past tail.
    unsafe {
      let storage = &*self.storage.get();
      buf[..first_run].copy_from_slice(&storage[start..start + first_run]);
      if first_run < drained {
        buf[first_run..drained].copy_from_slice(&storage[..drained - first_run]);
      }
    }

    self.head.store(head.wrapping_add(drained), Ordering::Release);
    drained
  }

  /// Blocks the consumer until bytes are available or the ring is closed.
  /// Returns 0 only after close, once the ring has fully drained.
  pub fn read_blocking(&self, buf: &mut [u8]) -> usize {
    loop {
      let drained = self.try_read(buf);
      if drained > 0 {
        return drained;
      }
      if self.closed.load(Ordering::Acquire) {
        return 0;
      }

      let mut guard = self.sleep.lock();
      // Re-check under the lock so a push between try_read and lock is not
      // missed.
      if !self.is_empty() || self.closed.load(Ordering::Acquire) {
        continue;
      }
      self
        .data_ready
        .wait_for(&mut guard, Duration::from_millis(100));
    }
  }

  /// Marks the ring closed and wakes any blocked consumer. Already-buffered
  /// bytes remain readable.
  pub fn close(&self) {
    self.closed.store(true, Ordering::Release);
    let _guard = self.sleep.lock();
    self.data_ready.notify_all();
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }
}

impl ByteChannel for RingBuffer {
  fn push(&self, bytes: &[u8]) -> usize {
    RingBuffer::push(self, bytes)
  }

  fn try_read(&self, buf: &mut [u8]) -> usize {
    RingBuffer::try_read(self, buf)
  }
}
