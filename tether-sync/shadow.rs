//! Delegation state: the shadow snapshot and pending engine edits.
//!
//! While the host editor is the temporary content authority, every host
//! edit is diffed against [`ShadowLines`], the content the engine's buffer
//! is expected to hold, translated to byte coordinates, and queued as a
//! [`PendingEdit`] until the next flush. The shadow is updated in place so
//! successive edits translate against the correct pre-change text.

use crate::{
  editor::HostChange,
  position::{
    Position,
    char_to_byte_col,
  },
};

/// One host-originated mutation not yet sent to the engine, in byte
/// coordinates against the shadow snapshot it was recorded on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
  pub start_row:  usize,
  pub start_byte: usize,
  pub end_row:    usize,
  pub end_byte:   usize,
  pub lines:      Vec<String>,
}

/// Mirror of the engine's expected buffer content during delegation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowLines {
  lines: Vec<String>,
}

impl ShadowLines {
  pub fn new(lines: Vec<String>) -> Self {
    let lines = if lines.is_empty() {
      vec![String::new()]
    } else {
      lines
    };
    Self { lines }
  }

  pub fn lines(&self) -> &[String] {
    &self.lines
  }

  pub fn line_count(&self) -> usize {
    self.lines.len()
  }

  /// Applies a byte-coordinate splice: rows `start_row..=end_row` are
  /// replaced by `lines`, with the first line joining the bytes before
  /// `start_byte` and the last joining the bytes after `end_byte`.
  pub fn splice(&mut self, edit: &PendingEdit) {
    let prefix = &self.lines[edit.start_row][..edit.start_byte];
    let suffix = &self.lines[edit.end_row][edit.end_byte..];

    let replacement: Vec<String> = match edit.lines.as_slice() {
      [] => vec![format!("{prefix}{suffix}")],
      [only] => vec![format!("{prefix}{only}{suffix}")],
      [first, middle @ .., last] => {
        let mut rows = Vec::with_capacity(edit.lines.len());
        rows.push(format!("{prefix}{first}"));
        rows.extend(middle.iter().cloned());
        rows.push(format!("{last}{suffix}"));
        rows
      },
    };

    self
      .lines
      .splice(edit.start_row..=edit.end_row, replacement)
      .for_each(drop);
  }
}

/// The delegation window's mutable state. Created when an insert-like mode
/// is entered, torn down when it ends.
#[derive(Debug)]
pub struct Delegation {
  shadow:         ShadowLines,
  pending:        Vec<PendingEdit>,
  pending_cursor: Option<Position>,
  /// Set when an edit could not be tracked incrementally; the next flush
  /// must replace the whole buffer.
  poisoned:       bool,
}

/// Edits and cursor to deliver to the engine in one batch.
#[derive(Debug, PartialEq, Eq)]
pub struct FlushBatch {
  pub edits:       Vec<PendingEdit>,
  /// Byte-coordinate cursor.
  pub cursor:      Option<Position>,
  pub full_resync: bool,
}

impl FlushBatch {
  pub fn is_empty(&self) -> bool {
    self.edits.is_empty() && self.cursor.is_none() && !self.full_resync
  }
}

impl Delegation {
  pub fn begin(snapshot: Vec<String>) -> Self {
    Self {
      shadow:         ShadowLines::new(snapshot),
      pending:        Vec::new(),
      pending_cursor: None,
      poisoned:       false,
    }
  }

  pub fn shadow(&self) -> &ShadowLines {
    &self.shadow
  }

  pub fn is_poisoned(&self) -> bool {
    self.poisoned
  }

  /// Marks the snapshot untrustworthy; the next flush replaces the whole
  /// buffer.
  pub fn invalidate(&mut self) {
    self.poisoned = true;
  }

  pub fn has_work(&self) -> bool {
    self.poisoned || !self.pending.is_empty() || self.pending_cursor.is_some()
  }

  /// Records one host edit. Char coordinates are translated to byte
  /// coordinates against the *pre-change* shadow content, then the shadow
  /// is updated in place. Untrackable changes poison the snapshot.
  pub fn record(&mut self, change: &HostChange) {
    if self.poisoned {
      return;
    }

    let HostChange::Replace { start, end, lines } = change else {
      self.poisoned = true;
      return;
    };

    let last_row = self.shadow.line_count() - 1;
    let inverted = start.row > end.row || (start.row == end.row && start.col > end.col);
    if inverted || end.row > last_row {
      self.poisoned = true;
      return;
    }

    let edit = PendingEdit {
      start_row:  start.row,
      start_byte: char_to_byte_col(&self.shadow.lines[start.row], start.col),
      end_row:    end.row,
      end_byte:   char_to_byte_col(&self.shadow.lines[end.row], end.col),
      lines:      lines.clone(),
    };

    self.shadow.splice(&edit);
    self.pending.push(edit);
  }

  /// Records the host cursor, translating its char column to bytes against
  /// the current shadow content.
  pub fn record_cursor(&mut self, pos: Position) {
    let row = pos.row.min(self.shadow.line_count() - 1);
    let byte = char_to_byte_col(&self.shadow.lines[row], pos.col);
    self.pending_cursor = Some(Position::new(row, byte));
  }

  /// Replaces the tracked state with a single line-span diff between the
  /// shadow and `current` (used after IME composition commits, where the
  /// intermediate edits were deliberately not tracked).
  pub fn rebase(&mut self, current: &[String]) {
    if self.poisoned {
      return;
    }
    let current: Vec<String> = if current.is_empty() {
      vec![String::new()]
    } else {
      current.to_vec()
    };

    if let Some(edit) = line_span_diff(&self.shadow.lines, &current) {
      self.shadow.splice(&edit);
      debug_assert_eq!(self.shadow.lines, current);
      self.pending.push(edit);
    }
  }

  /// Takes everything queued for delivery, leaving the delegation armed for
  /// further edits against the updated shadow.
  pub fn take_flush(&mut self) -> FlushBatch {
    FlushBatch {
      edits:       std::mem::take(&mut self.pending),
      cursor:      self.pending_cursor.take(),
      full_resync: std::mem::take(&mut self.poisoned),
    }
  }

  /// Re-seeds the shadow after a full resync delivered `lines` to the
  /// engine.
  pub fn reset(&mut self, lines: Vec<String>) {
    self.shadow = ShadowLines::new(lines);
    self.pending.clear();
    self.poisoned = false;
  }
}

/// Minimal line-span replacement turning `old` into `new`: common prefix
/// and suffix lines are retained, the span in between is replaced.
fn line_span_diff(old: &[String], new: &[String]) -> Option<PendingEdit> {
  if old == new {
    return None;
  }

  let mut prefix = 0;
  while prefix < old.len() && prefix < new.len() && old[prefix] == new[prefix] {
    prefix += 1;
  }

  let mut suffix = 0;
  while suffix < old.len() - prefix
    && suffix < new.len() - prefix
    && old[old.len() - 1 - suffix] == new[new.len() - 1 - suffix]
  {
    suffix += 1;
  }

  let old_span = &old[prefix..old.len() - suffix];
  let new_span = &new[prefix..new.len() - suffix];

  let edit = if old_span.is_empty() {
    // Pure line insertion before row `prefix` (or append at the end).
    if prefix == old.len() {
      let last = old.len() - 1;
      let mut lines = vec![String::new()];
      lines.extend(new_span.iter().cloned());
      PendingEdit {
        start_row:  last,
        start_byte: old[last].len(),
        end_row:    last,
        end_byte:   old[last].len(),
        lines,
      }
    } else {
      let mut lines: Vec<String> = new_span.to_vec();
      lines.push(String::new());
      PendingEdit {
        start_row: prefix,
        start_byte: 0,
        end_row: prefix,
        end_byte: 0,
        lines,
      }
    }
  } else if new_span.is_empty() {
    // Pure line deletion: the span must be joined into a neighboring row.
    if suffix > 0 {
      PendingEdit {
        start_row:  prefix,
        start_byte: 0,
        end_row:    prefix + old_span.len(),
        end_byte:   0,
        lines:      vec![String::new()],
      }
    } else if prefix > 0 {
      PendingEdit {
        start_row:  prefix - 1,
        start_byte: old[prefix - 1].len(),
        end_row:    old.len() - 1,
        end_byte:   old[old.len() - 1].len(),
        lines:      vec![String::new()],
      }
    } else {
      PendingEdit {
        start_row:  0,
        start_byte: 0,
        end_row:    old.len() - 1,
        end_byte:   old[old.len() - 1].len(),
        lines:      vec![String::new()],
      }
    }
  } else {
    let end_row = old.len() - suffix - 1;
    PendingEdit {
      start_row:  prefix,
      start_byte: 0,
      end_row,
      end_byte:   old[end_row].len(),
      lines:      new_span.to_vec(),
    }
  };

  Some(edit)
}
