use std::{
  collections::VecDeque,
  io::{
    BufRead,
    BufReader,
    BufWriter,
    Read,
    Write,
  },
  path::PathBuf,
  process::{
    Child,
    ChildStderr,
    ChildStdin,
    ChildStdout,
    Command,
    Stdio,
  },
  sync::{
    Arc,
    Mutex,
    mpsc::{
      Receiver,
      Sender,
      TryRecvError,
      channel,
    },
  },
  thread::{
    self,
    JoinHandle,
  },
  time::{
    Duration,
    Instant,
  },
};

use tether_ring::RingBuffer;
use tether_wire::{
  Decoder,
  Message,
};
use thiserror::Error;
use tracing::debug;

/// Lines of standard error retained for the exit diagnostic.
const DIAGNOSTIC_TAIL_LINES: usize = 32;

/// How the engine process is launched. Geometry and the runtime data path
/// are advertised through the `TETHER_COLS` / `TETHER_ROWS` /
/// `TETHER_RUNTIME` environment variables; `args` is passed through
/// verbatim.
#[derive(Debug, Clone)]
pub struct StartOptions {
  pub executable:   PathBuf,
  pub args:         Vec<String>,
  pub cols:         u16,
  pub rows:         u16,
  pub runtime_data: Option<PathBuf>,
}

impl StartOptions {
  pub fn new(executable: impl Into<PathBuf>) -> Self {
    Self {
      executable:   executable.into(),
      args:         Vec::new(),
      cols:         80,
      rows:         24,
      runtime_data: None,
    }
  }
}

/// What the engine process produced, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
  /// One decoded protocol frame from standard output.
  Message(Message),
  /// One verbatim line of standard error.
  Stderr(String),
  /// Standard output carried bytes that do not decode; the stream is
  /// unusable from here on.
  ReadError(String),
  /// The process terminated. Emitted exactly once, after every pending
  /// frame and stderr line has been delivered.
  Exited {
    code:       Option<i32>,
    diagnostic: String,
  },
}

enum PipeEvent {
  Message(Message),
  Stderr(String),
  ReadError(String),
  StdoutClosed,
}

/// The engine child process with its three pipe pumps.
///
/// The feeder thread blocks on the transport ring and copies its bytes to
/// the child's standard input; closing the ring is the EOF signal. The
/// stdout and stderr threads push [`PipeEvent`]s over an mpsc channel that
/// the controller drains with [`Self::try_recv_event`].
pub struct StdioProcessHost {
  child:         Child,
  ring:          Arc<RingBuffer>,
  event_rx:      Receiver<PipeEvent>,
  diagnostic:    Arc<Mutex<VecDeque<String>>>,
  stdout_closed: bool,
  exit_emitted:  bool,
  feeder_thread: Option<JoinHandle<()>>,
  stdout_thread: Option<JoinHandle<()>>,
  stderr_thread: Option<JoinHandle<()>>,
}

impl StdioProcessHost {
  pub fn start(options: StartOptions, ring: Arc<RingBuffer>) -> Result<Self, HostError> {
    let mut process = Command::new(&options.executable);
    process
      .args(&options.args)
      .env("TETHER_COLS", options.cols.to_string())
      .env("TETHER_ROWS", options.rows.to_string())
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    if let Some(runtime_data) = &options.runtime_data {
      process.env("TETHER_RUNTIME", runtime_data);
    }

    let mut child = process.spawn().map_err(HostError::Spawn)?;
    let stdin = child.stdin.take().ok_or(HostError::MissingPipe("stdin"))?;
    let stdout = child
      .stdout
      .take()
      .ok_or(HostError::MissingPipe("stdout"))?;
    let stderr = child
      .stderr
      .take()
      .ok_or(HostError::MissingPipe("stderr"))?;

    let (event_tx, event_rx) = channel();
    let diagnostic = Arc::new(Mutex::new(VecDeque::new()));

    let feeder_thread = Some(spawn_feeder_thread(stdin, ring.clone()));
    let stdout_thread = Some(spawn_stdout_thread(stdout, event_tx.clone()));
    let stderr_thread = Some(spawn_stderr_thread(stderr, event_tx, diagnostic.clone()));

    Ok(Self {
      child,
      ring,
      event_rx,
      diagnostic,
      stdout_closed: false,
      exit_emitted: false,
      feeder_thread,
      stdout_thread,
      stderr_thread,
    })
  }

  /// Non-blocking event poll. Returns `None` when nothing is pending.
  pub fn try_recv_event(&mut self) -> Option<HostEvent> {
    loop {
      // Checked before the recv so that "pumps finished, channel empty"
      // really means drained.
      let drained = self.stdout_closed && self.pipes_finished();
      match self.event_rx.try_recv() {
        Ok(PipeEvent::Message(message)) => return Some(HostEvent::Message(message)),
        Ok(PipeEvent::Stderr(line)) => return Some(HostEvent::Stderr(line)),
        Ok(PipeEvent::ReadError(err)) => return Some(HostEvent::ReadError(err)),
        Ok(PipeEvent::StdoutClosed) => self.stdout_closed = true,
        Err(TryRecvError::Disconnected) => return self.emit_exit(),
        Err(TryRecvError::Empty) if drained => return self.emit_exit(),
        Err(TryRecvError::Empty) => return None,
      }
    }
  }

  /// Blocking variant of [`Self::try_recv_event`] with a deadline.
  pub fn recv_event_timeout(&mut self, timeout: Duration) -> Option<HostEvent> {
    let deadline = Instant::now() + timeout;
    loop {
      if let Some(event) = self.try_recv_event() {
        return Some(event);
      }
      if Instant::now() >= deadline {
        return None;
      }
      thread::sleep(Duration::from_millis(1));
    }
  }

  /// Closes the ring, terminates the child if still running, and joins the
  /// pipe threads. Returns the exit code.
  pub fn shutdown(&mut self) -> Result<Option<i32>, HostError> {
    self.ring.close();

    let exit_code = match self.child.try_wait().map_err(HostError::Wait)? {
      Some(status) => status.code(),
      None => {
        if let Err(err) = self.child.kill()
          && err.kind() != std::io::ErrorKind::InvalidInput
        {
          return Err(HostError::Kill(err));
        }
        self.child.wait().map_err(HostError::Wait)?.code()
      },
    };

    join_thread(&mut self.feeder_thread)?;
    join_thread(&mut self.stdout_thread)?;
    join_thread(&mut self.stderr_thread)?;

    self.exit_emitted = true;
    Ok(exit_code)
  }

  fn pipes_finished(&self) -> bool {
    let finished =
      |handle: &Option<JoinHandle<()>>| handle.as_ref().is_none_or(JoinHandle::is_finished);
    finished(&self.stdout_thread) && finished(&self.stderr_thread)
  }

  fn emit_exit(&mut self) -> Option<HostEvent> {
    if self.exit_emitted {
      return None;
    }
    self.exit_emitted = true;

    // Release the feeder if it is still parked on an open ring.
    self.ring.close();
    let code = match self.child.wait() {
      Ok(status) => status.code(),
      Err(err) => {
        debug!(error = %err, "failed to collect engine exit status");
        None
      },
    };

    let diagnostic = self
      .diagnostic
      .lock()
      .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
      .unwrap_or_default();

    Some(HostEvent::Exited { code, diagnostic })
  }
}

fn spawn_feeder_thread(stdin: ChildStdin, ring: Arc<RingBuffer>) -> JoinHandle<()> {
  thread::Builder::new()
    .name("tether-engine-stdin".into())
    .spawn(move || {
      let mut writer = BufWriter::new(stdin);
      let mut buf = [0u8; 4096];
      loop {
        let read = ring.read_blocking(&mut buf);
        if read == 0 {
          // Ring closed and drained: dropping the writer is the engine's
          // EOF.
          break;
        }
        if let Err(err) = writer.write_all(&buf[..read]).and_then(|()| writer.flush()) {
          debug!(error = %err, "engine stdin pipe closed");
          break;
        }
      }
    })
    .expect("failed to spawn engine stdin thread")
}

fn spawn_stdout_thread(mut stdout: ChildStdout, event_tx: Sender<PipeEvent>) -> JoinHandle<()> {
  thread::Builder::new()
    .name("tether-engine-stdout".into())
    .spawn(move || {
      let mut decoder = Decoder::new();
      let mut buf = [0u8; 4096];
      loop {
        match stdout.read(&mut buf) {
          Ok(0) => {
            let _ = event_tx.send(PipeEvent::StdoutClosed);
            break;
          },
          Ok(read) => {
            decoder.feed(&buf[..read]);
            loop {
              match decoder.try_next() {
                Ok(Some(message)) => {
                  let _ = event_tx.send(PipeEvent::Message(message));
                },
                Ok(None) => break,
                Err(err) => {
                  let _ = event_tx.send(PipeEvent::ReadError(err.to_string()));
                  return;
                },
              }
            }
          },
          Err(err) => {
            let _ = event_tx.send(PipeEvent::ReadError(err.to_string()));
            return;
          },
        }
      }
    })
    .expect("failed to spawn engine stdout thread")
}

fn spawn_stderr_thread(
  stderr: ChildStderr,
  event_tx: Sender<PipeEvent>,
  diagnostic: Arc<Mutex<VecDeque<String>>>,
) -> JoinHandle<()> {
  thread::Builder::new()
    .name("tether-engine-stderr".into())
    .spawn(move || {
      let mut reader = BufReader::new(stderr);
      let mut line = String::new();
      loop {
        line.clear();
        match reader.read_line(&mut line) {
          Ok(0) => break,
          Ok(_) => {
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            if line.is_empty() {
              continue;
            }
            if let Ok(mut tail) = diagnostic.lock() {
              if tail.len() == DIAGNOSTIC_TAIL_LINES {
                tail.pop_front();
              }
              tail.push_back(line.clone());
            }
            let _ = event_tx.send(PipeEvent::Stderr(line));
          },
          Err(err) => {
            debug!(error = %err, "engine stderr stream closed with error");
            break;
          },
        }
      }
    })
    .expect("failed to spawn engine stderr thread")
}

fn join_thread(handle: &mut Option<JoinHandle<()>>) -> Result<(), HostError> {
  if let Some(handle) = handle.take() {
    handle.join().map_err(|_| HostError::ThreadPanicked)?;
  }
  Ok(())
}

#[derive(Debug, Error)]
pub enum HostError {
  #[error("failed to spawn engine process: {0}")]
  Spawn(std::io::Error),
  #[error("missing engine {0} pipe")]
  MissingPipe(&'static str),
  #[error("failed to wait for engine process: {0}")]
  Wait(std::io::Error),
  #[error("failed to kill engine process: {0}")]
  Kill(std::io::Error),
  #[error("engine pipe thread panicked")]
  ThreadPanicked,
}

#[cfg(test)]
mod test {
  use tether_wire::Value;

  use super::*;

  const WAIT: Duration = Duration::from_secs(5);

  /// `cat` is a perfectly obedient engine: it echoes every frame.
  fn cat_host() -> (StdioProcessHost, Arc<RingBuffer>) {
    let ring = RingBuffer::with_capacity(1024);
    let host =
      StdioProcessHost::start(StartOptions::new("cat"), ring.clone()).expect("spawn cat");
    (host, ring)
  }

  #[test]
  fn frames_round_trip_through_the_child() {
    let (mut host, ring) = cat_host();
    let frame = Message::notification("input", vec![Value::from("<Esc>")]);
    ring.push(&frame.clone().encode());

    assert_eq!(
      host.recv_event_timeout(WAIT),
      Some(HostEvent::Message(frame))
    );
    host.shutdown().expect("shutdown");
  }

  #[test]
  fn ring_close_drives_exactly_one_exit_event() {
    let (mut host, ring) = cat_host();
    ring.close();

    match host.recv_event_timeout(WAIT) {
      Some(HostEvent::Exited { code, .. }) => assert_eq!(code, Some(0)),
      other => panic!("expected exit event, got {other:?}"),
    }
    assert_eq!(host.try_recv_event(), None);
    host.shutdown().expect("shutdown");
  }

  #[test]
  fn stderr_lines_are_forwarded_and_retained_for_the_diagnostic() {
    let ring = RingBuffer::with_capacity(1024);
    let mut options = StartOptions::new("sh");
    options.args = vec!["-c".into(), "echo oops 1>&2; cat".into()];
    let mut host = StdioProcessHost::start(options, ring.clone()).expect("spawn sh");

    assert_eq!(
      host.recv_event_timeout(WAIT),
      Some(HostEvent::Stderr("oops".into()))
    );

    ring.close();
    match host.recv_event_timeout(WAIT) {
      Some(HostEvent::Exited { diagnostic, .. }) => assert_eq!(diagnostic, "oops"),
      other => panic!("expected exit event, got {other:?}"),
    }
    host.shutdown().expect("shutdown");
  }

  #[test]
  fn partial_frames_are_buffered_across_pipe_reads() {
    let (mut host, ring) = cat_host();
    let frame = Message::request(7, "buffer_get_lines", vec![Value::Ext(0, vec![1])]);
    let bytes = frame.clone().encode();

    // Two pushes with a pause: the child sees (and echoes) a split frame.
    let split = bytes.len() / 2;
    ring.push(&bytes[..split]);
    thread::sleep(Duration::from_millis(50));
    ring.push(&bytes[split..]);

    assert_eq!(
      host.recv_event_timeout(WAIT),
      Some(HostEvent::Message(frame))
    );
    host.shutdown().expect("shutdown");
  }
}
