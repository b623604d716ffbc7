//! In-memory doubles for the host editor and the byte transport.

use std::sync::{
  Arc,
  Mutex,
};

use tether_ring::ByteChannel;
use tether_wire::{
  Decoder,
  Message,
};

use crate::{
  editor::{
    DecorationRange,
    HostEditor,
  },
  position::{
    Position,
    char_to_byte_col,
  },
  shadow::{
    PendingEdit,
    ShadowLines,
  },
};

/// Host editor double backed by a plain line list. Records mutation counts
/// so tests can assert that no-op applies really are no-ops.
pub struct MemoryEditor {
  lines:              Vec<String>,
  cursor:             Position,
  pub selection:      Option<Vec<DecorationRange>>,
  pub mutations:      usize,
  pub cursor_sets:    usize,
  pub selection_sets: usize,
}

impl MemoryEditor {
  pub fn new(lines: &[&str]) -> Self {
    let lines = if lines.is_empty() {
      vec![String::new()]
    } else {
      lines.iter().map(|s| s.to_string()).collect()
    };
    Self {
      lines,
      cursor: Position::zero(),
      selection: None,
      mutations: 0,
      cursor_sets: 0,
      selection_sets: 0,
    }
  }

  /// Mutates content without going through the tracked surface, the way
  /// IME composition previews do.
  pub fn overwrite(&mut self, lines: &[&str]) {
    self.lines = lines.iter().map(|s| s.to_string()).collect();
  }
}

impl HostEditor for MemoryEditor {
  fn line_count(&self) -> usize {
    self.lines.len()
  }

  fn line(&self, row: usize) -> Option<&str> {
    self.lines.get(row).map(String::as_str)
  }

  fn lines(&self) -> Vec<String> {
    self.lines.clone()
  }

  fn set_lines(&mut self, lines: Vec<String>) {
    self.lines = if lines.is_empty() {
      vec![String::new()]
    } else {
      lines
    };
    self.mutations += 1;
  }

  fn replace_range(&mut self, start: Position, end: Position, lines: &[String]) {
    let edit = PendingEdit {
      start_row:  start.row,
      start_byte: char_to_byte_col(&self.lines[start.row], start.col),
      end_row:    end.row,
      end_byte:   char_to_byte_col(&self.lines[end.row], end.col),
      lines:      lines.to_vec(),
    };
    let mut shadow = ShadowLines::new(std::mem::take(&mut self.lines));
    shadow.splice(&edit);
    self.lines = shadow.lines().to_vec();
    self.mutations += 1;
  }

  fn cursor(&self) -> Position {
    self.cursor
  }

  fn set_cursor(&mut self, pos: Position) {
    self.cursor = pos;
    self.cursor_sets += 1;
  }

  fn set_selection(&mut self, ranges: &[DecorationRange]) {
    self.selection = Some(ranges.to_vec());
    self.selection_sets += 1;
  }

  fn clear_selection(&mut self) {
    self.selection = None;
  }
}

/// Byte channel that admits everything and records the bytes, so tests can
/// decode exactly which frames were transmitted.
#[derive(Default)]
pub struct CaptureChannel {
  bytes: Mutex<Vec<u8>>,
}

impl CaptureChannel {
  pub fn frames(&self) -> Vec<Message> {
    let mut decoder = Decoder::new();
    decoder.feed(&self.bytes.lock().unwrap());
    let mut frames = Vec::new();
    while let Some(frame) = decoder.try_next().expect("captured frames decode") {
      frames.push(frame);
    }
    frames
  }

  pub fn new_arc() -> Arc<Self> {
    Arc::new(Self::default())
  }
}

impl ByteChannel for CaptureChannel {
  fn push(&self, bytes: &[u8]) -> usize {
    self.bytes.lock().unwrap().extend_from_slice(bytes);
    bytes.len()
  }

  fn try_read(&self, _buf: &mut [u8]) -> usize {
    0
  }
}
