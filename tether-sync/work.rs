//! Single-slot scheduled work.
//!
//! One slot per concern (flush, resync, visual refresh) instead of ambient
//! timers: arming an already-armed slot coalesces, and the owner drains due
//! work on its next poll tick.

#[derive(Debug, Default)]
pub struct WorkSlot {
  armed: bool,
  /// Bumped on every arm; lets in-flight results detect supersession.
  seq:   u64,
}

impl WorkSlot {
  pub fn arm(&mut self) -> u64 {
    self.armed = true;
    self.seq += 1;
    self.seq
  }

  pub fn cancel(&mut self) {
    self.armed = false;
    self.seq += 1;
  }

  /// Consumes the armed state; returns whether work was due.
  pub fn take(&mut self) -> bool {
    std::mem::take(&mut self.armed)
  }

  pub fn is_armed(&self) -> bool {
    self.armed
  }

  /// Current generation; results tagged with an older value are stale.
  pub fn seq(&self) -> u64 {
    self.seq
  }

  /// Whether a result tagged with `seq` is still current.
  pub fn is_current(&self, seq: u64) -> bool {
    self.seq == seq
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn arming_coalesces_and_take_consumes() {
    let mut slot = WorkSlot::default();
    assert!(!slot.take());

    slot.arm();
    slot.arm();
    assert!(slot.take());
    assert!(!slot.take());
  }

  #[test]
  fn rearming_invalidates_older_tokens() {
    let mut slot = WorkSlot::default();
    let first = slot.arm();
    assert!(slot.is_current(first));

    let second = slot.arm();
    assert!(!slot.is_current(first));
    assert!(slot.is_current(second));

    slot.cancel();
    assert!(!slot.is_current(second));
    assert!(!slot.take());
  }
}
