//! The consumed host-editor boundary.
//!
//! The host editor keeps its native rendering, input-method handling, and
//! selection visuals; this trait is the narrow mutation/query surface the
//! synchronization engine needs. All columns on this boundary are
//! *character* columns (UTF-16 code units).

use crate::position::Position;

/// Half-open decoration span rendered with the host's selection style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecorationRange {
  pub start: Position,
  pub end:   Position,
}

/// One host-originated mutation, as reported by the editor's
/// content-changed listener.
#[derive(Debug, Clone, PartialEq)]
pub enum HostChange {
  /// A single contiguous range replacement, char coordinates against the
  /// pre-change content. `lines` follows splice semantics: the first line
  /// joins the text before `start`, the last joins the text after `end`.
  Replace {
    start: Position,
    end:   Position,
    lines: Vec<String>,
  },
  /// Anything that cannot be expressed as one range edit (multi-cursor
  /// edits, programmatic bulk replaces). Forces a full resync.
  Opaque,
}

/// Host editor events the synchronization engine consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
  ContentChanged(HostChange),
  CursorMoved(Position),
  /// A keystroke already rendered in the engine's key notation.
  Key(String),
  MouseClick(Position),
  CompositionStart,
  /// Composition ended; the committed text is already in the host model.
  CompositionEnd,
}

/// Text model and decoration surface of the host editor.
pub trait HostEditor {
  fn line_count(&self) -> usize;
  fn line(&self, row: usize) -> Option<&str>;
  fn lines(&self) -> Vec<String>;
  /// Replaces the whole content.
  fn set_lines(&mut self, lines: Vec<String>);
  /// Single-range replacement with splice semantics (see
  /// [`HostChange::Replace`]).
  fn replace_range(&mut self, start: Position, end: Position, lines: &[String]);
  fn cursor(&self) -> Position;
  fn set_cursor(&mut self, pos: Position);
  fn set_selection(&mut self, ranges: &[DecorationRange]);
  fn clear_selection(&mut self);
}
