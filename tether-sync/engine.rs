//! The synchronization driver.
//!
//! Translates host editor events into engine calls and engine notifications
//! into host mutations, owning the delegation state machine. The embedding
//! pumps it from a single-threaded event loop: editor listeners feed
//! [`SyncEngine::on_editor_event`], decoded engine frames feed
//! [`SyncEngine::on_engine_message`], and [`SyncEngine::poll`] drains
//! scheduled work and settles in-flight replies.

use std::time::Instant;

use tether_rpc::{
  Inbound,
  Reply,
  ReplyToken,
  Session,
  SessionError,
};
use tether_wire::{
  Message,
  Value,
};
use tracing::{
  debug,
  error,
  warn,
};

use crate::{
  editor::{
    EditorEvent,
    HostChange,
    HostEditor,
  },
  mode::{
    ModeKind,
    SelectionShape,
    classify_mode,
  },
  position::{
    Position,
    byte_to_char_col,
    char_len_utf16,
    char_to_byte_col,
  },
  proto::{
    self,
    EngineNotification,
    method,
    notification,
  },
  shadow::Delegation,
  visual,
  work::WorkSlot,
};

#[derive(Debug, Clone)]
pub struct SyncConfig {
  /// Keys that confirm or cancel an insert-like mode. Pending delegated
  /// work is flushed synchronously before one of these is forwarded, so
  /// the engine never regains authority over a stale buffer.
  pub mode_exit_keys: Vec<String>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      mode_exit_keys: vec!["<Esc>".into(), "<C-c>".into()],
    }
  }
}

/// Observer surface for a status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
  pub mode:         String,
  pub delegating:   bool,
  pub engine_alive: bool,
  pub ready:        bool,
}

/// Session-wide reconciliation state, mutated only by engine notifications
/// and delegation transitions.
struct SessionState {
  mode:             String,
  kind:             ModeKind,
  /// Opaque engine buffer handle; `Nil` until attach completes.
  buffer:           Value,
  /// Char coordinates.
  cursor:           Position,
  last_good_cursor: Position,
}

impl SessionState {
  fn new() -> Self {
    Self {
      mode:             "n".to_string(),
      kind:             ModeKind::Normal,
      buffer:           Value::Nil,
      cursor:           Position::zero(),
      last_good_cursor: Position::zero(),
    }
  }
}

/// An engine-originated request the embedding must answer exactly once via
/// [`SyncEngine::respond`].
#[derive(Debug)]
pub struct EngineRequest {
  pub method: String,
  pub params: Vec<Value>,
  pub token:  ReplyToken,
}

pub struct SyncEngine {
  session: Session,
  config:  SyncConfig,
  state:   SessionState,

  /// `Some` exactly while the host editor is the content authority.
  delegation: Option<Delegation>,
  /// Untracked host edit while the engine is authority; the next flush
  /// replaces the whole engine buffer.
  host_dirty: bool,

  /// Reentrancy guard: our own editor mutations must not be re-interpreted
  /// as new host edits.
  applying:       bool,
  composing:      bool,
  /// An engine delta arrived mid-composition and was deferred.
  deferred_delta: bool,

  ready: bool,
  alive: bool,

  flush_slot:  WorkSlot,
  resync_slot: WorkSlot,
  visual_slot: WorkSlot,

  attach_reply:  Option<Reply>,
  resync_reply:  Option<(u64, Reply)>,
  visual_reply:  Option<(u64, SelectionShape, Reply)>,
  flush_replies: Vec<(String, Reply)>,
}

impl SyncEngine {
  pub fn new(session: Session, config: SyncConfig) -> Self {
    Self {
      session,
      config,
      state: SessionState::new(),
      delegation: None,
      host_dirty: false,
      applying: false,
      composing: false,
      deferred_delta: false,
      ready: false,
      alive: true,
      flush_slot: WorkSlot::default(),
      resync_slot: WorkSlot::default(),
      visual_slot: WorkSlot::default(),
      attach_reply: None,
      resync_reply: None,
      visual_reply: None,
      flush_replies: Vec::new(),
    }
  }

  pub fn status(&self) -> Status {
    Status {
      mode:         self.state.mode.clone(),
      delegating:   self.delegation.is_some(),
      engine_alive: self.alive,
      ready:        self.ready,
    }
  }

  /// Begins the session: ships the host content to the engine and waits
  /// (poll-side) for the attach response carrying the buffer handle.
  pub fn start(
    &mut self,
    editor: &dyn HostEditor,
    now: Instant,
  ) -> Result<(), SessionError> {
    let reply = self
      .session
      .call(method::BUFFER_ATTACH, proto::attach_params(&editor.lines()), now)?;
    self.attach_reply = Some(reply);
    Ok(())
  }

  /// Tears the session down; pending calls are rejected and no further
  /// traffic is accepted.
  pub fn stop(&mut self) {
    self.session.stop();
    self.delegation = None;
    self.host_dirty = false;
    self.composing = false;
    self.deferred_delta = false;
    self.ready = false;
    self.alive = false;
    self.flush_slot.cancel();
    self.resync_slot.cancel();
    self.visual_slot.cancel();
    self.attach_reply = None;
    self.resync_reply = None;
    self.visual_reply = None;
    self.flush_replies.clear();
  }

  /// The engine process terminated.
  pub fn on_engine_exit(&mut self, code: Option<i32>, diagnostic: &str) {
    warn!(?code, diagnostic, "engine process exited");
    self.session.handle_exit(code);
    self.alive = false;
    self.ready = false;
    self.delegation = None;
  }

  /// One decoded frame from the engine's output stream. Returns a request
  /// the embedding must answer, if the frame was one.
  pub fn on_engine_message(
    &mut self,
    editor: &mut dyn HostEditor,
    message: Message,
    now: Instant,
  ) -> Option<EngineRequest> {
    match self.session.handle_message(message)? {
      Inbound::Notification { method, params } => {
        let parsed = EngineNotification::parse(&method, &params);
        self.handle_notification(editor, parsed, now);
        None
      },
      Inbound::Request {
        method,
        params,
        token,
      } => Some(EngineRequest {
        method,
        params,
        token,
      }),
    }
  }

  /// Answers an engine-originated request.
  pub fn respond(&mut self, token: ReplyToken, result: Result<Value, Value>) {
    if let Err(err) = self.session.respond(token, result) {
      debug!(%err, "dropping response to engine request");
    }
  }

  /// One event from the host editor's listeners.
  pub fn on_editor_event(
    &mut self,
    editor: &mut dyn HostEditor,
    event: EditorEvent,
    now: Instant,
  ) {
    if self.applying {
      return;
    }

    match event {
      EditorEvent::ContentChanged(change) => self.on_host_change(change),
      EditorEvent::CursorMoved(pos) | EditorEvent::MouseClick(pos) => {
        self.on_host_cursor(editor, pos);
      },
      EditorEvent::Key(keys) => self.on_host_key(editor, &keys, now),
      EditorEvent::CompositionStart => self.composing = true,
      EditorEvent::CompositionEnd => self.on_composition_end(editor),
    }
  }

  /// Drains due scheduled work and settles in-flight replies. Call once
  /// per event-loop tick.
  pub fn poll(&mut self, editor: &mut dyn HostEditor, now: Instant) {
    self.session.tick(now);

    self.poll_attach(editor, now);
    self.poll_flush_replies();
    self.poll_visual_reply(editor);
    self.poll_resync_reply(editor);

    if self.flush_slot.take() {
      self.flush_now(editor, now);
    }
    if self.resync_slot.take() {
      self.request_full_fetch(now);
    }
  }

  // --- host -> engine ---

  fn on_host_change(&mut self, change: HostChange) {
    if self.composing {
      // Only the final committed text is ever synchronized.
      return;
    }
    match self.delegation.as_mut() {
      Some(delegation) => {
        delegation.record(&change);
        if delegation.is_poisoned() {
          debug!("untrackable host edit, full resync scheduled");
        }
      },
      None => {
        debug!("host edit outside delegation, full resync scheduled");
        self.host_dirty = true;
      },
    }
    self.flush_slot.arm();
  }

  fn on_host_cursor(&mut self, editor: &dyn HostEditor, pos: Position) {
    if self.composing {
      return;
    }
    self.state.cursor = pos;
    match self.delegation.as_mut() {
      Some(delegation) => {
        delegation.record_cursor(pos);
        self.flush_slot.arm();
      },
      None => {
        let line = editor.line(pos.row).unwrap_or_default();
        let byte_col = char_to_byte_col(line, pos.col);
        self.send_notify(notification::CURSOR_SET, vec![
          Value::from(pos.row as u64),
          Value::from(byte_col as u64),
        ]);
      },
    }
  }

  fn on_host_key(&mut self, editor: &mut dyn HostEditor, keys: &str, now: Instant) {
    if self.composing {
      debug!(keys, "suppressing keystroke during composition");
      return;
    }
    // The engine must never regain authority over a stale buffer: leaving
    // an insert-like mode flushes synchronously before the key goes out.
    if self.delegation.is_some() && self.config.mode_exit_keys.iter().any(|k| k == keys) {
      self.flush_now(editor, now);
    }
    self.send_notify(notification::INPUT, vec![Value::from(keys)]);
  }

  fn on_composition_end(&mut self, editor: &dyn HostEditor) {
    self.composing = false;
    if let Some(delegation) = self.delegation.as_mut() {
      delegation.rebase(&editor.lines());
      if delegation.has_work() {
        self.flush_slot.arm();
      }
    }
    if self.deferred_delta {
      self.deferred_delta = false;
      if self.delegation.is_none() {
        self.resync_slot.arm();
      }
    }
  }

  /// Sends everything pending to the engine in one batch.
  fn flush_now(&mut self, editor: &mut dyn HostEditor, now: Instant) {
    self.flush_slot.cancel();
    if !self.ready {
      return;
    }

    if let Some(batch) = self.delegation.as_mut().map(Delegation::take_flush) {
      if batch.full_resync {
        let lines = editor.lines();
        if let Some(delegation) = self.delegation.as_mut() {
          delegation.reset(lines.clone());
        }
        let params = proto::set_lines_params(&self.state.buffer, &lines);
        self.send_call(method::BUFFER_SET_LINES, params, now);
        let cursor = editor.cursor();
        let line = editor.line(cursor.row).unwrap_or_default();
        let byte_col = char_to_byte_col(line, cursor.col);
        self.send_notify(notification::CURSOR_SET, vec![
          Value::from(cursor.row as u64),
          Value::from(byte_col as u64),
        ]);
        return;
      }

      for edit in &batch.edits {
        let params = proto::replace_params(&self.state.buffer, edit);
        self.send_call(method::BUFFER_REPLACE, params, now);
      }
      if let Some(cursor) = batch.cursor {
        self.send_notify(notification::CURSOR_SET, vec![
          Value::from(cursor.row as u64),
          Value::from(cursor.col as u64),
        ]);
      }
      return;
    }

    if self.host_dirty {
      self.host_dirty = false;
      let params = proto::set_lines_params(&self.state.buffer, &editor.lines());
      self.send_call(method::BUFFER_SET_LINES, params, now);
    }
  }

  // --- engine -> host ---

  fn handle_notification(
    &mut self,
    editor: &mut dyn HostEditor,
    parsed: EngineNotification,
    now: Instant,
  ) {
    match parsed {
      EngineNotification::Mode { tag } => self.on_mode_changed(editor, &tag, now),
      EngineNotification::Cursor { row, byte_col } => {
        self.apply_engine_cursor(editor, row, byte_col);
      },
      EngineNotification::BufLines { first, last, lines } => {
        self.apply_buf_lines(editor, first, last, lines);
      },
      EngineNotification::Unknown => {},
    }
  }

  fn on_mode_changed(&mut self, editor: &mut dyn HostEditor, tag: &str, now: Instant) {
    let kind = classify_mode(tag);
    let was_visual = self.state.kind.visual_shape().is_some();
    let was_delegating = self.delegation.is_some();

    self.state.mode = tag.to_string();
    self.state.kind = kind;

    if kind.is_insert_like() {
      if !was_delegating {
        // The host editor becomes the temporary content authority.
        self.delegation = Some(Delegation::begin(editor.lines()));
        self.host_dirty = false;
        self.flush_slot.cancel();
      }
    } else if was_delegating {
      self.flush_now(editor, now);
      self.delegation = None;
    }

    match kind.visual_shape() {
      Some(shape) => self.request_selection(shape, now),
      None => {
        if was_visual {
          // Invalidate any in-flight selection fetch before clearing.
          self.visual_slot.cancel();
          self.visual_reply = None;
          editor.clear_selection();
        }
      },
    }
  }

  fn apply_engine_cursor(&mut self, editor: &mut dyn HostEditor, row: usize, byte_col: usize) {
    if self.composing || self.delegation.is_some() {
      // The host owns the caret right now; fighting it causes flicker.
      debug!(row, byte_col, "suspending engine cursor reconciliation");
      return;
    }
    if editor.line_count() == 0 {
      return;
    }

    // The model may be momentarily shorter than the engine's view during a
    // race; clamp rather than error.
    let row = row.min(editor.line_count() - 1);
    let line = editor.line(row).unwrap_or_default();
    let col = byte_to_char_col(line, byte_col);

    self.applying = true;
    editor.set_cursor(Position::new(row, col));
    self.applying = false;

    self.state.cursor = Position::new(row, col);
    self.state.last_good_cursor = self.state.cursor;
  }

  fn apply_buf_lines(
    &mut self,
    editor: &mut dyn HostEditor,
    first: i64,
    last: i64,
    new_lines: Vec<String>,
  ) {
    if self.delegation.is_some() {
      // Echo of our own flushed edits; the host is authority right now.
      debug!(first, last, "dropping engine delta during delegation");
      return;
    }
    if self.composing {
      self.deferred_delta = true;
      return;
    }

    let count = editor.line_count() as i64;
    if first < 0 || last < first || last > count {
      warn!(first, last, count, "inconsistent engine delta, resyncing");
      self.resync_slot.arm();
      return;
    }
    let (first, last) = (first as usize, last as usize);

    // Idempotence: a delta whose content already matches is a no-op.
    if last - first == new_lines.len() {
      let matches = (first..last).all(|row| editor.line(row) == new_lines.get(row - first).map(String::as_str));
      if matches {
        return;
      }
    }

    let saved = editor.cursor();
    self.applying = true;
    self.apply_delta(editor, first, last, &new_lines);

    // Restore the caller's cursor when the edit did not touch its lines.
    let line_count = editor.line_count();
    if saved.row < first {
      editor.set_cursor(saved);
      self.state.cursor = saved;
    } else if saved.row >= last {
      // saved.row >= last >= last - first, so this cannot underflow.
      let shifted = saved.row + new_lines.len() - (last - first);
      let row = shifted.min(line_count.saturating_sub(1));
      let pos = Position::new(row, saved.col);
      editor.set_cursor(pos);
      self.state.cursor = pos;
    } else {
      self.state.cursor = editor.cursor();
    }
    self.applying = false;
    self.state.last_good_cursor = self.state.cursor;
  }

  fn apply_delta(
    &mut self,
    editor: &mut dyn HostEditor,
    first: usize,
    last: usize,
    new_lines: &[String],
  ) {
    let count = editor.line_count();

    // Whole-buffer delta is equivalent to a full replace.
    if first == 0 && last == count {
      editor.set_lines(new_lines.to_vec());
      return;
    }

    if new_lines.is_empty() {
      // Deletion of [first, last).
      if last < count {
        editor.replace_range(
          Position::new(first, 0),
          Position::new(last, 0),
          &[String::new()],
        );
      } else if first > 0 {
        let prev_end = editor.line(first - 1).map_or(0, char_len_utf16);
        let tail_end = editor.line(count - 1).map_or(0, char_len_utf16);
        editor.replace_range(
          Position::new(first - 1, prev_end),
          Position::new(count - 1, tail_end),
          &[String::new()],
        );
      } else {
        editor.set_lines(vec![String::new()]);
      }
      return;
    }

    if first == last {
      if first == count {
        // Pure append: join after the last line, no extra blank line.
        let end = editor.line(count - 1).map_or(0, char_len_utf16);
        let mut lines = vec![String::new()];
        lines.extend(new_lines.iter().cloned());
        editor.replace_range(
          Position::new(count - 1, end),
          Position::new(count - 1, end),
          &lines,
        );
      } else {
        // Insertion before `first`.
        let mut lines: Vec<String> = new_lines.to_vec();
        lines.push(String::new());
        editor.replace_range(Position::new(first, 0), Position::new(first, 0), &lines);
      }
      return;
    }

    // Replacement of [first, last).
    let end_row = last - 1;
    let end_col = editor.line(end_row).map_or(0, char_len_utf16);
    editor.replace_range(
      Position::new(first, 0),
      Position::new(end_row, end_col),
      new_lines,
    );
  }

  // --- visual selection ---

  fn request_selection(&mut self, shape: SelectionShape, now: Instant) {
    let seq = self.visual_slot.arm();
    self.visual_slot.take();
    match self
      .session
      .call(method::SELECTION_GET, vec![self.state.buffer.clone()], now)
    {
      Ok(reply) => self.visual_reply = Some((seq, shape, reply)),
      Err(err) => debug!(%err, "selection fetch not issued"),
    }
  }

  fn poll_visual_reply(&mut self, editor: &mut dyn HostEditor) {
    let Some((seq, shape, mut reply)) = self.visual_reply.take() else {
      return;
    };
    match reply.try_result() {
      None => self.visual_reply = Some((seq, shape, reply)),
      Some(Ok(result)) => {
        if !self.visual_slot.is_current(seq) {
          debug!("dropping stale selection fetch result");
          return;
        }
        match visual::parse_selection(&result) {
          Some(ranges) => {
            let spans = visual::map_ranges(editor, shape, &ranges);
            editor.set_selection(&spans);
          },
          None => warn!("malformed selection_get result"),
        }
      },
      Some(Err(err)) => debug!(%err, "selection fetch failed"),
    }
  }

  // --- resync (engine -> host) ---

  fn request_full_fetch(&mut self, now: Instant) {
    if !self.ready || self.delegation.is_some() {
      return;
    }
    let seq = self.resync_slot.seq();
    match self
      .session
      .call(method::BUFFER_GET_LINES, vec![self.state.buffer.clone()], now)
    {
      Ok(reply) => self.resync_reply = Some((seq, reply)),
      Err(err) => debug!(%err, "resync fetch not issued"),
    }
  }

  fn poll_resync_reply(&mut self, editor: &mut dyn HostEditor) {
    let Some((seq, mut reply)) = self.resync_reply.take() else {
      return;
    };
    match reply.try_result() {
      None => self.resync_reply = Some((seq, reply)),
      Some(Ok(result)) => {
        if !self.resync_slot.is_current(seq) {
          debug!("dropping superseded resync fetch result");
          return;
        }
        let Some(lines) = proto::string_list(&result) else {
          warn!("malformed buffer_get_lines result");
          return;
        };
        let saved = self.state.last_good_cursor;
        self.applying = true;
        editor.set_lines(lines);
        let row = saved.row.min(editor.line_count().saturating_sub(1));
        let col = saved
          .col
          .min(editor.line(row).map_or(0, char_len_utf16));
        editor.set_cursor(Position::new(row, col));
        self.applying = false;
        self.state.cursor = Position::new(row, col);
      },
      Some(Err(err)) => warn!(%err, "resync fetch failed"),
    }
  }

  // --- session plumbing ---

  fn poll_attach(&mut self, editor: &mut dyn HostEditor, now: Instant) {
    let Some(mut reply) = self.attach_reply.take() else {
      return;
    };
    match reply.try_result() {
      None => self.attach_reply = Some(reply),
      Some(Ok(result)) => self.finish_attach(editor, result, now),
      Some(Err(err)) => {
        // Fatal start failure: the session never reaches ready.
        error!(%err, "engine attach failed");
        self.ready = false;
        self.alive = false;
      },
    }
  }

  fn finish_attach(&mut self, editor: &mut dyn HostEditor, result: Value, now: Instant) {
    let Value::Array(fields) = result else {
      error!("malformed buffer_attach result");
      self.alive = false;
      return;
    };

    self.state.buffer = fields.first().cloned().unwrap_or(Value::Nil);
    self.ready = true;

    if let Some(Value::Array(cursor)) = fields.get(1) {
      let row = cursor.first().and_then(Value::as_u64).unwrap_or(0) as usize;
      let byte_col = cursor.get(1).and_then(Value::as_u64).unwrap_or(0) as usize;
      self.apply_engine_cursor(editor, row, byte_col);
    }
    if let Some(tag) = fields.get(2).and_then(Value::as_str) {
      let tag = tag.to_string();
      self.on_mode_changed(editor, &tag, now);
    }
  }

  fn poll_flush_replies(&mut self) {
    let mut failed = false;
    self.flush_replies.retain_mut(|(method, reply)| match reply.try_result() {
      None => true,
      Some(Ok(_)) => false,
      Some(Err(err)) => {
        warn!(%method, %err, "engine rejected a flushed edit");
        failed = true;
        false
      },
    });

    if failed {
      // Heal by resending the whole buffer from whichever side holds
      // authority.
      match self.delegation.as_mut() {
        Some(delegation) => delegation.invalidate(),
        None => self.host_dirty = true,
      }
      self.flush_slot.arm();
    }
  }

  fn send_call(&mut self, method: &str, params: Vec<Value>, now: Instant) {
    match self.session.call(method, params, now) {
      Ok(reply) => self.flush_replies.push((method.to_string(), reply)),
      Err(err) => debug!(method, %err, "call not issued"),
    }
  }

  fn send_notify(&mut self, method: &str, params: Vec<Value>) {
    if let Err(err) = self.session.notify(method, params) {
      debug!(method, %err, "notification not issued");
    }
  }
}
