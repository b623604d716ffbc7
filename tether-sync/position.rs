//! Position units and the byte/char index-space translation.
//!
//! The engine addresses columns as UTF-8 byte offsets within a line; the
//! host editor addresses them as UTF-16 code units (a surrogate-pair
//! codepoint is 2 character units but 4 bytes). Translation is keyed by the
//! current content of the line and always clamps past-end offsets instead
//! of erroring: during a race the host model may momentarily be shorter
//! than the engine's view.

/// A point in a buffer, 0-indexed. The unit of `col` depends on context:
/// byte column toward the engine, character column toward the host editor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
  pub row: usize,
  pub col: usize,
}

impl Position {
  pub fn new(row: usize, col: usize) -> Self {
    Self { row, col }
  }

  pub const fn zero() -> Self {
    Self { row: 0, col: 0 }
  }
}

impl From<(usize, usize)> for Position {
  fn from(value: (usize, usize)) -> Self {
    Position::new(value.0, value.1)
  }
}

/// Translates a byte column into a character column against `line`.
///
/// A byte offset inside a multi-byte codepoint counts the whole codepoint
/// as consumed; offsets past the end of the line clamp to one past the last
/// character.
pub fn byte_to_char_col(line: &str, byte_col: usize) -> usize {
  let mut bytes = 0;
  let mut col = 0;
  for ch in line.chars() {
    if bytes >= byte_col {
      break;
    }
    bytes += ch.len_utf8();
    col += ch.len_utf16();
  }
  col
}

/// Translates a character column into a byte column against `line`,
/// clamping past-end columns to the line's byte length.
pub fn char_to_byte_col(line: &str, char_col: usize) -> usize {
  let mut bytes = 0;
  let mut col = 0;
  for ch in line.chars() {
    if col >= char_col {
      break;
    }
    col += ch.len_utf16();
    bytes += ch.len_utf8();
  }
  bytes
}

/// Character-column length of a line (UTF-16 code units). This is also the
/// one-past-last-character position used for past-end-of-line clamping.
pub fn char_len_utf16(line: &str) -> usize {
  line.chars().map(char::len_utf16).sum()
}

#[cfg(test)]
mod test {
  use super::*;

  // ASCII, BMP multi-byte, and surrogate-pair content.
  const SAMPLES: &[&str] = &["", "foo", "aあb", "héllo", "a𐐀b", "あ𐐀え", "x🎉🎉y"];

  #[test]
  fn round_trips_on_every_valid_byte_offset() {
    for s in SAMPLES {
      for (byte_col, _) in s.char_indices() {
        let char_col = byte_to_char_col(s, byte_col);
        assert_eq!(
          char_to_byte_col(s, char_col),
          byte_col,
          "byte->char->byte failed for {s:?} at byte {byte_col}"
        );
      }
      // One past the end is valid in both units.
      assert_eq!(char_to_byte_col(s, byte_to_char_col(s, s.len())), s.len());
    }
  }

  #[test]
  fn round_trips_on_every_valid_char_col() {
    for s in SAMPLES {
      let mut char_col = 0;
      for ch in s.chars() {
        let byte_col = char_to_byte_col(s, char_col);
        assert_eq!(
          byte_to_char_col(s, byte_col),
          char_col,
          "char->byte->char failed for {s:?} at col {char_col}"
        );
        char_col += ch.len_utf16();
      }
      assert_eq!(byte_to_char_col(s, char_to_byte_col(s, char_col)), char_col);
    }
  }

  #[test]
  fn ascii_columns_translate_one_to_one() {
    assert_eq!(byte_to_char_col("foo", 3), 3);
    assert_eq!(char_to_byte_col("foo", 3), 3);
  }

  #[test]
  fn multibyte_codepoint_consumes_one_char_unit() {
    // 'あ' is 3 bytes but a single UTF-16 unit.
    assert_eq!(byte_to_char_col("aあb", 3), 2);
    assert_eq!(byte_to_char_col("aあb", 4), 2);
    assert_eq!(byte_to_char_col("aあb", 1), 1);
  }

  #[test]
  fn surrogate_pairs_count_two_char_units() {
    // '𐐀' is 4 bytes and 2 UTF-16 units.
    assert_eq!(byte_to_char_col("a𐐀b", 5), 3);
    assert_eq!(char_to_byte_col("a𐐀b", 3), 5);
    assert_eq!(char_len_utf16("a𐐀b"), 4);
  }

  #[test]
  fn past_end_offsets_clamp() {
    assert_eq!(byte_to_char_col("ab", 100), 2);
    assert_eq!(char_to_byte_col("ab", 100), 2);
    assert_eq!(byte_to_char_col("", 5), 0);
  }
}
