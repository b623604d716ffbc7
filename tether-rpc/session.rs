use std::{
  collections::HashMap,
  sync::mpsc::{
    Receiver,
    Sender,
    TryRecvError,
    channel,
  },
  time::{
    Duration,
    Instant,
  },
};

use tether_ring::{
  InputQueue,
  QueueStatus,
};
use tether_wire::{
  Message,
  Value,
};
use thiserror::Error;
use tracing::{
  debug,
  warn,
};

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
  pub call_timeout: Duration,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      call_timeout: Duration::from_secs(8),
    }
  }
}

/// Why a pending call failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallError {
  #[error("engine returned an error for `{method}`: {error}")]
  Engine { method: String, error: Value },
  #[error("no response to `{method}` within {waited:?}")]
  NoResponse { method: String, waited: Duration },
  #[error("engine process exited with code {code:?}")]
  EngineExited { code: Option<i32> },
  #[error("session stopped")]
  Stopped,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
  #[error("session is stopped")]
  Stopped,
  #[error("engine process exited with code {code:?}")]
  Exited { code: Option<i32> },
}

/// Poll-side of a suspended call. The session resolves it when a matching
/// response arrives, the deadline passes, the engine exits, or the session
/// stops.
pub struct Reply {
  rx: Receiver<Result<Value, CallError>>,
}

impl Reply {
  pub fn try_result(&mut self) -> Option<Result<Value, CallError>> {
    match self.rx.try_recv() {
      Ok(result) => Some(result),
      Err(TryRecvError::Empty) => None,
      Err(TryRecvError::Disconnected) => Some(Err(CallError::Stopped)),
    }
  }
}

/// Obligation to answer an engine-originated request exactly once.
///
/// Consumed by [`Session::respond`]. Dropping it unanswered is a protocol
/// bug on our side and is logged.
#[derive(Debug)]
pub struct ReplyToken {
  id:        u64,
  responded: bool,
}

impl Drop for ReplyToken {
  fn drop(&mut self) {
    if !self.responded {
      warn!(id = self.id, "engine request dropped without a response");
    }
  }
}

/// Inbound traffic that is not a response to one of our calls.
#[derive(Debug)]
pub enum Inbound {
  Notification {
    method: String,
    params: Vec<Value>,
  },
  Request {
    method: String,
    params: Vec<Value>,
    token:  ReplyToken,
  },
}

struct PendingCall {
  method:   String,
  sent_at:  Instant,
  deadline: Instant,
  tx:       Sender<Result<Value, CallError>>,
}

enum SessionState {
  Running,
  Exited { code: Option<i32> },
  Stopped,
}

/// Encodes outbound requests/notifications, tracks in-flight calls by
/// correlation id, and dispatches inbound frames.
///
/// Ids are unique and strictly increasing for the lifetime of one session.
pub struct Session {
  config:  SessionConfig,
  queue:   InputQueue,
  pending: HashMap<u64, PendingCall>,
  next_id: u64,
  state:   SessionState,
}

impl Session {
  pub fn new(queue: InputQueue, config: SessionConfig) -> Self {
    Self {
      config,
      queue,
      pending: HashMap::new(),
      next_id: 0,
      state: SessionState::Running,
    }
  }

  fn ensure_running(&self) -> Result<(), SessionError> {
    match self.state {
      SessionState::Running => Ok(()),
      SessionState::Exited { code } => Err(SessionError::Exited { code }),
      SessionState::Stopped => Err(SessionError::Stopped),
    }
  }

  /// Issues a request and registers a pending entry resolved via the
  /// returned [`Reply`].
  pub fn call(
    &mut self,
    method: &str,
    params: Vec<Value>,
    now: Instant,
  ) -> Result<Reply, SessionError> {
    self.ensure_running()?;

    let id = self.next_id;
    self.next_id += 1;

    let (tx, rx) = channel();
    self.pending.insert(id, PendingCall {
      method: method.to_string(),
      sent_at: now,
      deadline: now + self.config.call_timeout,
      tx,
    });

    self.transmit(Message::request(id, method, params));
    Ok(Reply { rx })
  }

  /// Fire-and-forget notification; no pending entry.
  pub fn notify(&mut self, method: &str, params: Vec<Value>) -> Result<(), SessionError> {
    self.ensure_running()?;
    self.transmit(Message::notification(method, params));
    Ok(())
  }

  /// Answers an engine-originated request.
  pub fn respond(
    &mut self,
    mut token: ReplyToken,
    result: Result<Value, Value>,
  ) -> Result<(), SessionError> {
    self.ensure_running()?;
    token.responded = true;
    let message = match result {
      Ok(value) => Message::response_ok(token.id, value),
      Err(error) => Message::response_err(token.id, error),
    };
    self.transmit(message);
    Ok(())
  }

  /// Routes one inbound frame. Responses resolve their pending call (a late
  /// response for an already-rejected id is dropped silently); everything
  /// else is handed back to the caller.
  pub fn handle_message(&mut self, message: Message) -> Option<Inbound> {
    match message {
      Message::Response { id, error, result } => {
        let Some(call) = self.pending.remove(&id) else {
          debug!(id, "dropping response for unknown or timed-out call");
          return None;
        };
        let outcome = if error == Value::Nil {
          Ok(result)
        } else {
          Err(CallError::Engine {
            method: call.method,
            error,
          })
        };
        let _ = call.tx.send(outcome);
        None
      },
      Message::Notification { method, params } => Some(Inbound::Notification { method, params }),
      Message::Request { id, method, params } => Some(Inbound::Request {
        method,
        params,
        token: ReplyToken {
          id,
          responded: false,
        },
      }),
    }
  }

  /// Pumps the outbound queue and rejects calls whose deadline has passed.
  /// A timed-out call may still be in flight on the wire; its eventual
  /// response is dropped by [`Self::handle_message`].
  pub fn tick(&mut self, now: Instant) {
    self.queue.pump();

    let expired: Vec<u64> = self
      .pending
      .iter()
      .filter(|(_, call)| now >= call.deadline)
      .map(|(id, _)| *id)
      .collect();

    for id in expired {
      if let Some(call) = self.pending.remove(&id) {
        warn!(id, method = %call.method, "call timed out");
        let _ = call.tx.send(Err(CallError::NoResponse {
          method: call.method,
          waited: now - call.sent_at,
        }));
      }
    }
  }

  /// The engine process terminated: every pending call is rejected with the
  /// exit code and the session is unusable until a new one is started.
  pub fn handle_exit(&mut self, code: Option<i32>) {
    for (_, call) in self.pending.drain() {
      let _ = call.tx.send(Err(CallError::EngineExited { code }));
    }
    self.queue.clear();
    self.state = SessionState::Exited { code };
  }

  /// Discards all session state; pending calls are rejected with a
  /// "session stopped" error and no new calls may be issued.
  pub fn stop(&mut self) {
    for (_, call) in self.pending.drain() {
      let _ = call.tx.send(Err(CallError::Stopped));
    }
    self.queue.clear();
    self.next_id = 0;
    self.state = SessionState::Stopped;
  }

  pub fn pending_calls(&self) -> usize {
    self.pending.len()
  }

  fn transmit(&mut self, message: Message) {
    // Overflow already warned in the queue; affected calls surface as
    // timeouts rather than hard errors here.
    let _: QueueStatus = self.queue.send(&message.encode());
  }
}

#[cfg(test)]
mod test {
  use std::sync::{
    Arc,
    Mutex,
  };

  use tether_ring::{
    ByteChannel,
    QueueConfig,
  };
  use tether_wire::Decoder;

  use super::*;

  /// Unbounded capture channel: admits everything, records the bytes.
  #[derive(Default)]
  struct Capture {
    bytes: Mutex<Vec<u8>>,
  }

  impl ByteChannel for Capture {
    fn push(&self, bytes: &[u8]) -> usize {
      self.bytes.lock().unwrap().extend_from_slice(bytes);
      bytes.len()
    }

    fn try_read(&self, _buf: &mut [u8]) -> usize {
      0
    }
  }

  fn new_session() -> (Session, Arc<Capture>) {
    let capture = Arc::new(Capture::default());
    let queue = InputQueue::new(capture.clone(), QueueConfig::default());
    (Session::new(queue, SessionConfig::default()), capture)
  }

  fn sent_frames(capture: &Capture) -> Vec<Message> {
    let mut decoder = Decoder::new();
    decoder.feed(&capture.bytes.lock().unwrap());
    let mut frames = Vec::new();
    while let Some(frame) = decoder.try_next().expect("valid frames") {
      frames.push(frame);
    }
    frames
  }

  #[test]
  fn call_resolves_on_matching_response() {
    let (mut session, capture) = new_session();
    let now = Instant::now();

    let mut reply = session.call("buffer_get_lines", vec![Value::Nil], now).unwrap();
    assert!(reply.try_result().is_none());

    let frames = sent_frames(&capture);
    assert_eq!(frames.len(), 1);
    let Message::Request { id, ref method, .. } = frames[0] else {
      panic!("expected request frame");
    };
    assert_eq!(method, "buffer_get_lines");

    session.handle_message(Message::response_ok(id, Value::from("ok")));
    assert_eq!(reply.try_result(), Some(Ok(Value::from("ok"))));
  }

  #[test]
  fn ids_are_strictly_increasing() {
    let (mut session, capture) = new_session();
    let now = Instant::now();
    for _ in 0..3 {
      session.call("m", vec![], now).unwrap();
    }

    let ids: Vec<u64> = sent_frames(&capture)
      .into_iter()
      .map(|frame| match frame {
        Message::Request { id, .. } => id,
        _ => panic!("expected request"),
      })
      .collect();
    assert_eq!(ids, vec![0, 1, 2]);
  }

  #[test]
  fn timeout_rejects_then_late_response_is_dropped() {
    let (mut session, _capture) = new_session();
    let now = Instant::now();

    let mut reply = session.call("slow", vec![], now).unwrap();
    session.tick(now + Duration::from_secs(9));

    match reply.try_result() {
      Some(Err(CallError::NoResponse { method, waited })) => {
        assert_eq!(method, "slow");
        assert!(waited >= Duration::from_secs(8));
      },
      other => panic!("expected NoResponse, got {other:?}"),
    }

    // The response arrives after the entry was removed: silently ignored.
    assert!(session.handle_message(Message::response_ok(0, Value::Nil)).is_none());
    assert_eq!(session.pending_calls(), 0);
  }

  #[test]
  fn engine_exit_rejects_all_pending_and_blocks_new_calls() {
    let (mut session, _capture) = new_session();
    let now = Instant::now();

    let mut a = session.call("a", vec![], now).unwrap();
    let mut b = session.call("b", vec![], now).unwrap();
    session.handle_exit(Some(134));

    for reply in [&mut a, &mut b] {
      assert_eq!(
        reply.try_result(),
        Some(Err(CallError::EngineExited { code: Some(134) }))
      );
    }
    assert!(matches!(
      session.call("c", vec![], now),
      Err(SessionError::Exited { code: Some(134) })
    ));
  }

  #[test]
  fn stop_rejects_pending_and_refuses_new_traffic() {
    let (mut session, _capture) = new_session();
    let mut reply = session.call("a", vec![], Instant::now()).unwrap();

    session.stop();
    assert_eq!(reply.try_result(), Some(Err(CallError::Stopped)));
    assert_eq!(session.notify("input", vec![]), Err(SessionError::Stopped));
  }

  #[test]
  fn engine_request_is_answered_via_token() {
    let (mut session, capture) = new_session();

    let inbound = session
      .handle_message(Message::Request {
        id:     41,
        method: "clipboard_get".into(),
        params: vec![],
      })
      .expect("request surfaced");

    let Inbound::Request { method, token, .. } = inbound else {
      panic!("expected request");
    };
    assert_eq!(method, "clipboard_get");

    session
      .respond(token, Ok(Value::Array(vec![Value::from("copied")])))
      .unwrap();

    let frames = sent_frames(&capture);
    assert_eq!(frames.len(), 1);
    assert_eq!(
      frames[0],
      Message::response_ok(41, Value::Array(vec![Value::from("copied")]))
    );
  }

  #[test]
  fn engine_error_response_rejects_with_engine_error() {
    let (mut session, _capture) = new_session();
    let mut reply = session.call("bad", vec![], Instant::now()).unwrap();

    session.handle_message(Message::response_err(0, Value::from("no such method")));
    assert_eq!(
      reply.try_result(),
      Some(Err(CallError::Engine {
        method: "bad".into(),
        error:  Value::from("no such method"),
      }))
    );
  }
}
