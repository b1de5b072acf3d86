use crate::device::{MockDevice, RegisterFile};
use crate::error::{DeviceError, Result};
use crate::server::socket::transport::Transport;
use log::{debug, error, info};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Reference polling period of the device server loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Commands accepted by the polling worker. Everything crosses the thread
/// boundary by value.
#[derive(Debug)]
pub enum WorkerCommand {
  StartListening,
  SetReadLoop(bool),
  SetReplyLatency(Duration),
  CloseConnection,
  /// Reply with a copy of the register file.
  Snapshot(Sender<RegisterFile>),
  Quit,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Stopped = 0,
  Listening = 1,
  Draining = 2,
}

impl WorkerState {
  fn from_u8(value: u8) -> Self {
    match value {
      1 => WorkerState::Listening,
      2 => WorkerState::Draining,
      _ => WorkerState::Stopped,
    }
  }
}

/// Things the worker reports back to the controlling context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
  Listening,
  Connected,
  /// The peer hung up.
  Disconnected,
  /// The connection was closed on command.
  ConnectionClosed,
  ReplySent(usize),
  Error(String),
  Stopped,
}

struct PollingWorker<T: Transport> {
  device: MockDevice,
  transport: T,
  commands: Receiver<WorkerCommand>,
  events: Sender<WorkerEvent>,
  state: Arc<AtomicU8>,
  read_enable: bool,
  poll_interval: Duration,
}

impl<T: Transport> PollingWorker<T> {
  fn state(&self) -> WorkerState {
    WorkerState::from_u8(self.state.load(Ordering::Acquire))
  }

  fn set_state(&self, state: WorkerState) {
    if self.state() != state {
      debug!("worker state {:?} -> {:?}", self.state(), state);
    }
    self.state.store(state as u8, Ordering::Release);
  }

  fn emit(&self, event: WorkerEvent) {
    // controller may have stopped listening for events
    let _ = self.events.send(event);
  }

  fn run(mut self) -> MockDevice {
    info!("polling worker started, interval {:?}", self.poll_interval);
    'outer: loop {
      match self.commands.recv_timeout(self.poll_interval) {
        Ok(cmd) => {
          if !self.apply(cmd) {
            break;
          }
          while let Ok(cmd) = self.commands.try_recv() {
            if !self.apply(cmd) {
              break 'outer;
            }
          }
        },
        Err(RecvTimeoutError::Timeout) => {},
        Err(RecvTimeoutError::Disconnected) => {
          info!("controller gone, stopping worker");
          break;
        },
      }

      if self.state() == WorkerState::Draining && !self.poll() {
        break;
      }
    }

    self.transport.shutdown();
    self.set_state(WorkerState::Stopped);
    self.emit(WorkerEvent::Stopped);
    info!("polling worker stopped");
    self.device
  }

  /// Returns false on Quit.
  fn apply(&mut self, cmd: WorkerCommand) -> bool {
    debug!("command: {:?}", cmd);
    match cmd {
      WorkerCommand::StartListening => match self.transport.listen() {
        Ok(()) => {
          self.set_state(if self.read_enable {
            WorkerState::Draining
          } else {
            WorkerState::Listening
          });
          self.emit(WorkerEvent::Listening);
        },
        Err(e) => {
          error!("listen failed: {}", e);
          self.emit(WorkerEvent::Error(e.to_string()));
        },
      },
      WorkerCommand::SetReadLoop(enable) => {
        self.read_enable = enable;
        if self.state() != WorkerState::Stopped {
          self.set_state(if enable {
            WorkerState::Draining
          } else {
            WorkerState::Listening
          });
        }
      },
      WorkerCommand::SetReplyLatency(latency) => self.device.set_reply_latency(latency),
      WorkerCommand::CloseConnection => {
        let was_connected = self.transport.is_connected();
        self.transport.close();
        self.device.reset_stream();
        if was_connected {
          self.emit(WorkerEvent::ConnectionClosed);
        }
      },
      WorkerCommand::Snapshot(reply) => {
        let _ = reply.send(self.device.registers().clone());
      },
      WorkerCommand::Quit => return false,
    }
    true
  }

  /// One service round. Returns false if `Quit` arrived while a reply was
  /// being held back.
  fn poll(&mut self) -> bool {
    let was_connected = self.transport.is_connected();
    match self.transport.accept() {
      Ok(true) => {
        if !was_connected {
          self.emit(WorkerEvent::Connected);
        }
      },
      Ok(false) => return true,
      Err(e) => {
        error!("accept failed: {}", e);
        self.emit(WorkerEvent::Error(e.to_string()));
        return true;
      },
    }

    let reply = match self.device.receive_once(&mut self.transport) {
      Ok(Some(reply)) => reply,
      Ok(None) => return true,
      Err(e) => {
        self.report(e);
        return true;
      },
    };

    if !self.hold_reply() {
      return false;
    }
    if !self.transport.is_connected() {
      debug!("connection closed during reply latency, dropping {} bytes", reply.len());
      return true;
    }
    match self.transport.send(&reply) {
      Ok(()) => self.emit(WorkerEvent::ReplySent(reply.len())),
      Err(e) => self.report(e),
    }
    true
  }

  /// Wait out the reply latency while still serving commands, so `Quit`
  /// and `CloseConnection` are not stuck behind a long delay.
  fn hold_reply(&mut self) -> bool {
    let deadline = Instant::now() + self.device.reply_latency();
    loop {
      let remaining = deadline.saturating_duration_since(Instant::now());
      if remaining.is_zero() {
        return true;
      }
      match self.commands.recv_timeout(remaining) {
        Ok(cmd) => {
          if !self.apply(cmd) {
            return false;
          }
        },
        Err(RecvTimeoutError::Timeout) => return true,
        Err(RecvTimeoutError::Disconnected) => return false,
      }
    }
  }

  fn report(&mut self, err: DeviceError) {
    match err {
      DeviceError::Disconnected => {
        info!("Client disconnected");
        self.device.reset_stream();
        self.emit(WorkerEvent::Disconnected);
      },
      e => {
        error!("serve error: {}", e);
        self.emit(WorkerEvent::Error(e.to_string()));
      },
    }
  }
}

/// Controller side of a running polling worker.
pub struct WorkerHandle {
  commands: Sender<WorkerCommand>,
  events: Receiver<WorkerEvent>,
  state: Arc<AtomicU8>,
  join: Option<JoinHandle<MockDevice>>,
}

/// Move `device` and `transport` onto a new worker thread. The worker
/// starts in `Stopped` with reading disabled.
pub fn spawn<T>(device: MockDevice, transport: T, poll_interval: Duration) -> Result<WorkerHandle>
where
  T: Transport + 'static,
{
  let (cmd_tx, cmd_rx) = mpsc::channel();
  let (event_tx, event_rx) = mpsc::channel();
  let state = Arc::new(AtomicU8::new(WorkerState::Stopped as u8));

  let worker = PollingWorker {
    device,
    transport,
    commands: cmd_rx,
    events: event_tx,
    state: Arc::clone(&state),
    read_enable: false,
    poll_interval,
  };

  let join = thread::Builder::new()
    .name("monitor-mock-worker".to_string())
    .spawn(move || worker.run())?;

  Ok(WorkerHandle {
    commands: cmd_tx,
    events: event_rx,
    state,
    join: Some(join),
  })
}

impl WorkerHandle {
  pub fn send(&self, cmd: WorkerCommand) -> Result<()> {
    self.commands.send(cmd).map_err(|_| DeviceError::WorkerStopped)
  }

  pub fn start_listening(&self) -> Result<()> {
    self.send(WorkerCommand::StartListening)
  }

  pub fn set_read_loop(&self, enable: bool) -> Result<()> {
    self.send(WorkerCommand::SetReadLoop(enable))
  }

  pub fn set_reply_latency(&self, latency: Duration) -> Result<()> {
    self.send(WorkerCommand::SetReplyLatency(latency))
  }

  pub fn close_connection(&self) -> Result<()> {
    self.send(WorkerCommand::CloseConnection)
  }

  /// Copy of the device registers as seen by the worker.
  pub fn snapshot(&self, timeout: Duration) -> Result<RegisterFile> {
    let (tx, rx) = mpsc::channel();
    self.send(WorkerCommand::Snapshot(tx))?;
    rx.recv_timeout(timeout).map_err(|_| DeviceError::WorkerStopped)
  }

  pub fn state(&self) -> WorkerState {
    WorkerState::from_u8(self.state.load(Ordering::Acquire))
  }

  /// Block for the next event. None once the worker is gone.
  pub fn recv_event(&self) -> Option<WorkerEvent> {
    self.events.recv().ok()
  }

  /// Next event if one is already queued.
  pub fn try_event(&self) -> Option<WorkerEvent> {
    self.events.try_recv().ok()
  }

  /// Next event, or None if nothing happened within `timeout`.
  pub fn next_event(&self, timeout: Duration) -> Option<WorkerEvent> {
    self.events.recv_timeout(timeout).ok()
  }

  /// Wait for a specific event, skipping others.
  pub fn wait_for(&self, event: &WorkerEvent, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
      let remaining = deadline.saturating_duration_since(Instant::now());
      match self.events.recv_timeout(remaining) {
        Ok(ref e) if e == event => return true,
        Ok(_) => continue,
        Err(_) => return false,
      }
    }
  }

  /// Stop the worker and get the device back.
  pub fn quit(mut self) -> Result<MockDevice> {
    let _ = self.commands.send(WorkerCommand::Quit);
    let join = self.join.take().ok_or(DeviceError::WorkerStopped)?;
    join.join().map_err(|_| DeviceError::WorkerStopped)
  }
}

impl Drop for WorkerHandle {
  fn drop(&mut self) {
    if let Some(join) = self.join.take() {
      let _ = self.commands.send(WorkerCommand::Quit);
      let _ = join.join();
    }
  }
}
