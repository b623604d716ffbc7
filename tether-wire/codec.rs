use std::io::{
  self,
  Cursor,
};

use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Error)]
pub enum DecodeError {
  #[error("malformed msgpack value: {0}")]
  Value(#[from] rmpv::decode::Error),
  #[error("malformed protocol envelope: {0}")]
  Envelope(&'static str),
}

/// Streaming frame decoder.
///
/// Bytes arrive with no message alignment (ring reads, pipe reads), so the
/// decoder accumulates input and yields a frame only once a complete
/// msgpack value is buffered. An incomplete value is never an error.
#[derive(Default)]
pub struct Decoder {
  buf:      Vec<u8>,
  consumed: usize,
}

impl Decoder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn feed(&mut self, bytes: &[u8]) {
    self.buf.extend_from_slice(bytes);
  }

  /// Yields the next complete frame, or `None` when more bytes are needed.
  pub fn try_next(&mut self) -> Result<Option<Message>, DecodeError> {
    if self.consumed == self.buf.len() {
      self.buf.clear();
      self.consumed = 0;
      return Ok(None);
    }

    let mut cursor = Cursor::new(&self.buf[self.consumed..]);
    match rmpv::decode::read_value(&mut cursor) {
      Ok(value) => {
        self.consumed += cursor.position() as usize;
        if self.consumed == self.buf.len() {
          self.buf.clear();
          self.consumed = 0;
        }
        Message::from_value(value).map(Some)
      },
      Err(err) if is_incomplete(&err) => Ok(None),
      Err(err) => Err(DecodeError::Value(err)),
    }
  }

  /// Bytes buffered but not yet consumed by a complete frame.
  pub fn pending_bytes(&self) -> usize {
    self.buf.len() - self.consumed
  }
}

fn is_incomplete(err: &rmpv::decode::Error) -> bool {
  use rmpv::decode::Error;
  match err {
    Error::InvalidMarkerRead(io) | Error::InvalidDataRead(io) => {
      io.kind() == io::ErrorKind::UnexpectedEof
    },
    _ => false,
  }
}

#[cfg(test)]
mod test {
  use rmpv::Value;

  use super::*;

  #[test]
  fn partial_frames_are_buffered_not_errored() {
    let bytes = Message::request(1, "cursor_set", vec![Value::from(3), Value::from(0)]).encode();

    let mut decoder = Decoder::new();
    for byte in &bytes[..bytes.len() - 1] {
      decoder.feed(std::slice::from_ref(byte));
      assert!(decoder.try_next().expect("no error on partial input").is_none());
    }

    decoder.feed(&bytes[bytes.len() - 1..]);
    let frame = decoder.try_next().unwrap().expect("complete frame");
    assert_eq!(
      frame,
      Message::request(1, "cursor_set", vec![Value::from(3), Value::from(0)])
    );
    assert_eq!(decoder.pending_bytes(), 0);
  }

  #[test]
  fn multiple_frames_in_one_read() {
    let mut bytes = Message::notification("input", vec![Value::from("j")]).encode();
    bytes.extend(Message::notification("input", vec![Value::from("k")]).encode());

    let mut decoder = Decoder::new();
    decoder.feed(&bytes);

    let first = decoder.try_next().unwrap().unwrap();
    let second = decoder.try_next().unwrap().unwrap();
    assert_eq!(
      first,
      Message::notification("input", vec![Value::from("j")])
    );
    assert_eq!(
      second,
      Message::notification("input", vec![Value::from("k")])
    );
    assert!(decoder.try_next().unwrap().is_none());
  }

  #[test]
  fn garbage_is_a_decode_error() {
    // 0xc1 is the one marker msgpack never uses.
    let mut decoder = Decoder::new();
    decoder.feed(&[0xc1]);
    assert!(decoder.try_next().is_err());
  }
}
