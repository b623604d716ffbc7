//! Process side of an engine session.
//!
//! [`StdioProcessHost`] runs the embedded engine as a child process: the
//! transport ring feeds its standard input byte-for-byte, its standard
//! output is decoded into one [`HostEvent::Message`] per protocol frame,
//! and standard error is forwarded verbatim as diagnostic text. Process
//! termination surfaces as exactly one [`HostEvent::Exited`].

mod process;

pub use process::{
  HostError,
  HostEvent,
  StartOptions,
  StdioProcessHost,
};
