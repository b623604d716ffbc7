use rmpv::Value;

/// Integer view of an opaque engine handle.
///
/// Handles arrive as ext values whose payload is a big-endian integer of
/// whatever width the engine chose for the magnitude; the byte width is not
/// fixed and must not be assumed. Returns the ext tag and the decoded
/// integer, or `None` for non-handle values or payloads wider than 8 bytes.
pub fn handle_int(value: &Value) -> Option<(i8, u64)> {
  let Value::Ext(tag, payload) = value else {
    return None;
  };
  if payload.is_empty() || payload.len() > 8 {
    return None;
  }

  let mut n = 0u64;
  for byte in payload {
    n = (n << 8) | u64::from(*byte);
  }
  Some((*tag, n))
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn decodes_variable_width_payloads() {
    assert_eq!(handle_int(&Value::Ext(0, vec![5])), Some((0, 5)));
    assert_eq!(handle_int(&Value::Ext(0, vec![1, 0])), Some((0, 256)));
    assert_eq!(
      handle_int(&Value::Ext(2, vec![0, 0, 4, 210])),
      Some((2, 1234))
    );
  }

  #[test]
  fn rejects_non_handles() {
    assert_eq!(handle_int(&Value::from(5)), None);
    assert_eq!(handle_int(&Value::Ext(0, vec![])), None);
    assert_eq!(handle_int(&Value::Ext(0, vec![0; 9])), None);
  }
}
