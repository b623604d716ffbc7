//! Engine protocol vocabulary: method names, parameter builders, and
//! notification parsing.
//!
//! All line/column numbers on this boundary are 0-based; columns are UTF-8
//! byte offsets (the engine's authoritative unit). Buffer deltas address a
//! half-open line range `[first, last)`.

use tether_wire::Value;
use tracing::debug;

use crate::shadow::PendingEdit;

/// Outbound calls.
pub mod method {
  /// `buffer_attach(lines) -> [handle, [row, byte_col], mode_tag]`
  pub const BUFFER_ATTACH: &str = "buffer_attach";
  /// `buffer_replace(handle, start_row, start_byte, end_row, end_byte, lines)`
  pub const BUFFER_REPLACE: &str = "buffer_replace";
  /// `buffer_set_lines(handle, lines)`: replace-all resync.
  pub const BUFFER_SET_LINES: &str = "buffer_set_lines";
  /// `buffer_get_lines(handle) -> lines`
  pub const BUFFER_GET_LINES: &str = "buffer_get_lines";
  /// `selection_get(handle) -> [[start_row, start_byte, end_row, end_byte,
  /// inclusive], ...]`
  pub const SELECTION_GET: &str = "selection_get";
}

/// Outbound notifications.
pub mod notification {
  /// `input(keys)`: keystrokes in the engine's key notation.
  pub const INPUT: &str = "input";
  /// `cursor_set(row, byte_col)`
  pub const CURSOR_SET: &str = "cursor_set";
}

/// Notifications arriving from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotification {
  /// Half-open line-range delta. Kept as raw integers; validation against
  /// the current host model happens at apply time.
  BufLines {
    first: i64,
    last:  i64,
    lines: Vec<String>,
  },
  Cursor {
    row:      usize,
    byte_col: usize,
  },
  Mode {
    tag: String,
  },
  Unknown,
}

impl EngineNotification {
  pub fn parse(name: &str, params: &[Value]) -> Self {
    match name {
      "buf_lines" => {
        // params: [handle, first, last, lines]
        let parsed = (|| {
          let first = params.get(1)?.as_i64()?;
          let last = params.get(2)?.as_i64()?;
          let lines = string_list(params.get(3)?)?;
          Some(Self::BufLines { first, last, lines })
        })();
        parsed.unwrap_or_else(|| {
          debug!("malformed buf_lines notification");
          Self::Unknown
        })
      },
      "cursor" => {
        let parsed = (|| {
          let row = params.first()?.as_u64()? as usize;
          let byte_col = params.get(1)?.as_u64()? as usize;
          Some(Self::Cursor { row, byte_col })
        })();
        parsed.unwrap_or_else(|| {
          debug!("malformed cursor notification");
          Self::Unknown
        })
      },
      "mode_changed" => match params.first().and_then(Value::as_str) {
        Some(tag) => Self::Mode {
          tag: tag.to_string(),
        },
        None => {
          debug!("malformed mode_changed notification");
          Self::Unknown
        },
      },
      other => {
        debug!(method = other, "ignoring unknown engine notification");
        Self::Unknown
      },
    }
  }
}

pub fn lines_value(lines: &[String]) -> Value {
  Value::Array(lines.iter().map(|l| Value::from(l.as_str())).collect())
}

pub fn string_list(value: &Value) -> Option<Vec<String>> {
  let Value::Array(items) = value else {
    return None;
  };
  items
    .iter()
    .map(|item| item.as_str().map(str::to_string))
    .collect()
}

pub fn attach_params(lines: &[String]) -> Vec<Value> {
  vec![lines_value(lines)]
}

pub fn replace_params(handle: &Value, edit: &PendingEdit) -> Vec<Value> {
  vec![
    handle.clone(),
    Value::from(edit.start_row as u64),
    Value::from(edit.start_byte as u64),
    Value::from(edit.end_row as u64),
    Value::from(edit.end_byte as u64),
    lines_value(&edit.lines),
  ]
}

pub fn set_lines_params(handle: &Value, lines: &[String]) -> Vec<Value> {
  vec![handle.clone(), lines_value(lines)]
}
