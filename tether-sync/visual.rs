//! Derives host decoration ranges from the engine's selection state.
//!
//! Endpoints arrive byte-addressed and may sit past the end of a line
//! (virtual columns used by blockwise selections); those map to one
//! position past the line's last character rather than erroring.

use tether_wire::Value;
use tracing::debug;

use crate::{
  editor::{
    DecorationRange,
    HostEditor,
  },
  mode::SelectionShape,
  position::{
    Position,
    byte_to_char_col,
    char_len_utf16,
  },
};

/// One selection range as reported by the engine: byte-addressed endpoints,
/// optionally inclusive of the end character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRange {
  pub start_row:  usize,
  pub start_byte: usize,
  pub end_row:    usize,
  pub end_byte:   usize,
  pub inclusive:  bool,
}

/// Parses a `selection_get` result: an array of
/// `[start_row, start_byte, end_row, end_byte, inclusive]` entries (one per
/// screen line for blockwise selections, a single entry otherwise).
pub fn parse_selection(result: &Value) -> Option<Vec<SelectionRange>> {
  let Value::Array(items) = result else {
    return None;
  };

  items
    .iter()
    .map(|item| {
      let Value::Array(fields) = item else {
        return None;
      };
      Some(SelectionRange {
        start_row:  fields.first()?.as_u64()? as usize,
        start_byte: fields.get(1)?.as_u64()? as usize,
        end_row:    fields.get(2)?.as_u64()? as usize,
        end_byte:   fields.get(3)?.as_u64()? as usize,
        inclusive:  fields.get(4)?.as_bool()?,
      })
    })
    .collect()
}

/// Converts engine ranges into host decoration spans for the given shape.
pub fn map_ranges(
  editor: &dyn HostEditor,
  shape: SelectionShape,
  ranges: &[SelectionRange],
) -> Vec<DecorationRange> {
  match shape {
    SelectionShape::Linewise => {
      let Some(first) = ranges.first() else {
        return Vec::new();
      };
      let mut min_row = first.start_row;
      let mut max_row = first.end_row;
      for range in ranges {
        min_row = min_row.min(range.start_row);
        max_row = max_row.max(range.end_row);
      }
      let max_row = max_row.min(editor.line_count().saturating_sub(1));
      let end_col = editor.line(max_row).map_or(0, char_len_utf16);
      vec![DecorationRange {
        start: Position::new(min_row, 0),
        end:   Position::new(max_row, end_col),
      }]
    },
    SelectionShape::Charwise | SelectionShape::Blockwise => ranges
      .iter()
      .filter_map(|range| map_range(editor, range))
      .collect(),
  }
}

fn map_range(editor: &dyn HostEditor, range: &SelectionRange) -> Option<DecorationRange> {
  let last_row = editor.line_count().checked_sub(1)?;
  if range.start_row > last_row {
    debug!(row = range.start_row, "dropping selection range past the buffer");
    return None;
  }
  let end_row = range.end_row.min(last_row);

  let start_line = editor.line(range.start_row)?;
  let end_line = editor.line(end_row)?;

  let start_col = byte_to_char_col(start_line, range.start_byte);
  let end_col = if range.inclusive {
    inclusive_end_col(end_line, range.end_byte)
  } else {
    byte_to_char_col(end_line, range.end_byte)
  };

  Some(DecorationRange {
    start: Position::new(range.start_row, start_col),
    end:   Position::new(end_row, end_col),
  })
}

/// An inclusive end consumes one extra codepoint so the last covered
/// character is inside the span. Past-end-of-line bytes (virtual columns)
/// already map to one past the last character and are not widened further.
fn inclusive_end_col(line: &str, end_byte: usize) -> usize {
  let col = byte_to_char_col(line, end_byte);
  match line
    .char_indices()
    .find(|(idx, _)| *idx >= end_byte)
    .map(|(_, ch)| ch)
  {
    Some(ch) => col + ch.len_utf16(),
    None => char_len_utf16(line),
  }
}
