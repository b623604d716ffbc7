//! State reconciliation between a host editor and the embedded engine.
//!
//! The engine's buffer is the authoritative truth for content, except
//! during *delegation*: a window (insert-like modes) where the host editor
//! is trusted as the live authority so native typing and IME composition
//! stay glitch-free, reconciled back to the engine on exit.
//!
//! [`SyncEngine`] is the driver. It consumes host editor events and decoded
//! engine frames (see `tether-host` for the process side), owns the
//! delegation state machine and the index-space translation between the
//! engine's byte columns and the host's character columns, and renders the
//! engine's visual selections as host decorations.

mod editor;
mod engine;
mod mode;
mod position;
mod proto;
mod shadow;
mod visual;
mod work;

#[cfg(test)]
pub(crate) mod test_support;

pub use editor::{
  DecorationRange,
  EditorEvent,
  HostChange,
  HostEditor,
};
pub use engine::{
  EngineRequest,
  Status,
  SyncConfig,
  SyncEngine,
};
pub use mode::{
  ModeKind,
  SelectionShape,
  classify_mode,
};
pub use position::{
  Position,
  byte_to_char_col,
  char_len_utf16,
  char_to_byte_col,
};
pub use shadow::{
  Delegation,
  PendingEdit,
  ShadowLines,
};
