use rmpv::Value;

use crate::codec::DecodeError;

const KIND_REQUEST: u64 = 0;
const KIND_RESPONSE: u64 = 1;
const KIND_NOTIFICATION: u64 = 2;

/// One protocol frame. Requests and responses correlate by `id`;
/// notifications are fire-and-forget in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
  Request {
    id:     u64,
    method: String,
    params: Vec<Value>,
  },
  Response {
    id:     u64,
    /// `Value::Nil` on success.
    error:  Value,
    /// `Value::Nil` on failure.
    result: Value,
  },
  Notification {
    method: String,
    params: Vec<Value>,
  },
}

impl Message {
  pub fn request(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
    Self::Request {
      id,
      method: method.into(),
      params,
    }
  }

  pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
    Self::Notification {
      method: method.into(),
      params,
    }
  }

  pub fn response_ok(id: u64, result: Value) -> Self {
    Self::Response {
      id,
      error: Value::Nil,
      result,
    }
  }

  pub fn response_err(id: u64, error: Value) -> Self {
    Self::Response {
      id,
      error,
      result: Value::Nil,
    }
  }

  pub fn into_value(self) -> Value {
    match self {
      Self::Request { id, method, params } => Value::Array(vec![
        Value::from(KIND_REQUEST),
        Value::from(id),
        Value::from(method),
        Value::Array(params),
      ]),
      Self::Response { id, error, result } => Value::Array(vec![
        Value::from(KIND_RESPONSE),
        Value::from(id),
        error,
        result,
      ]),
      Self::Notification { method, params } => Value::Array(vec![
        Value::from(KIND_NOTIFICATION),
        Value::from(method),
        Value::Array(params),
      ]),
    }
  }

  pub fn from_value(value: Value) -> Result<Self, DecodeError> {
    let Value::Array(fields) = value else {
      return Err(DecodeError::Envelope("frame is not an array"));
    };

    let kind = fields
      .first()
      .and_then(Value::as_u64)
      .ok_or(DecodeError::Envelope("missing message kind tag"))?;

    match kind {
      KIND_REQUEST => {
        let [_, id, method, params] = take_fields::<4>(fields)?;
        Ok(Self::Request {
          id:     id
            .as_u64()
            .ok_or(DecodeError::Envelope("request id is not an integer"))?,
          method: into_method(method)?,
          params: into_params(params)?,
        })
      },
      KIND_RESPONSE => {
        let [_, id, error, result] = take_fields::<4>(fields)?;
        Ok(Self::Response {
          id: id
            .as_u64()
            .ok_or(DecodeError::Envelope("response id is not an integer"))?,
          error,
          result,
        })
      },
      KIND_NOTIFICATION => {
        let [_, method, params] = take_fields::<3>(fields)?;
        Ok(Self::Notification {
          method: into_method(method)?,
          params: into_params(params)?,
        })
      },
      _ => Err(DecodeError::Envelope("unknown message kind tag")),
    }
  }

  pub fn encode(self) -> Vec<u8> {
    let mut bytes = Vec::new();
    // Writing msgpack into a Vec cannot fail.
    rmpv::encode::write_value(&mut bytes, &self.into_value())
      .expect("msgpack encode into Vec cannot fail");
    bytes
  }
}

fn take_fields<const N: usize>(fields: Vec<Value>) -> Result<[Value; N], DecodeError> {
  <[Value; N]>::try_from(fields).map_err(|_| DecodeError::Envelope("wrong envelope arity"))
}

fn into_method(value: Value) -> Result<String, DecodeError> {
  match value {
    Value::String(s) => s
      .into_str()
      .ok_or(DecodeError::Envelope("method name is not utf-8")),
    _ => Err(DecodeError::Envelope("method name is not a string")),
  }
}

fn into_params(value: Value) -> Result<Vec<Value>, DecodeError> {
  match value {
    Value::Array(params) => Ok(params),
    _ => Err(DecodeError::Envelope("params are not an array")),
  }
}
