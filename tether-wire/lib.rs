//! Wire codec for the engine protocol: a MessagePack-RPC style envelope
//! with three message kinds, encoded as compact msgpack arrays.
//!
//! Framing is the codec's job. Lower layers (the transport ring, the engine
//! process pipes) carry raw bytes with no alignment guarantees, so the
//! [`Decoder`] buffers partial input and only yields complete frames.

mod codec;
mod handle;
mod message;

pub use codec::{
  DecodeError,
  Decoder,
};
pub use handle::handle_int;
pub use message::Message;
pub use rmpv::Value;
