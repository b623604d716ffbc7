//! The protocol session with the embedded engine.
//!
//! Outbound frames are encoded and pushed through the input queue toward
//! the transport ring; inbound frames (already decoded by the process-host
//! side) are routed here. Responses resolve pending calls by correlation
//! id, notifications and engine-originated requests are surfaced to the
//! synchronization layer.

mod session;

pub use session::{
  CallError,
  Inbound,
  Reply,
  ReplyToken,
  Session,
  SessionConfig,
  SessionError,
};
