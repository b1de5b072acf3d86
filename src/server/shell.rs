use super::worker::{WorkerEvent, WorkerHandle, WorkerState};
use crate::error::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io;
use std::time::Duration;

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(2);

const HELP: &str = "Commands: listen, enable, disable, latency <secs>, close, regs, state, help, q";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
  Listen,
  Enable,
  Disable,
  Latency(Duration),
  Close,
  Regs,
  State,
  Help,
  Quit,
}

/// Parse one shell line. Empty lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> std::result::Result<Option<Command>, String> {
  let trimmed = line.trim();
  if trimmed.is_empty() {
    return Ok(None);
  }

  let mut parts = trimmed.split_whitespace();
  let word = parts.next().unwrap_or_default();
  let arg = parts.next();

  let cmd = match word {
    "listen" => Command::Listen,
    "enable" => Command::Enable,
    "disable" => Command::Disable,
    "close" => Command::Close,
    "regs" => Command::Regs,
    "state" => Command::State,
    "help" | "?" => Command::Help,
    "q" | "quit" => Command::Quit,
    "latency" => {
      let num_str = arg.ok_or_else(|| "'latency' requires a number of seconds, e.g., 'latency 1.0'".to_string())?;
      let secs: f64 = num_str
        .parse()
        .map_err(|e| format!("invalid number '{}': {}", num_str, e))?;
      let latency =
        Duration::try_from_secs_f64(secs).map_err(|_| format!("latency must be non-negative, got {}", secs))?;
      Command::Latency(latency)
    },
    other => return Err(format!("Unknown command: '{}'. {}", other, HELP)),
  };
  Ok(Some(cmd))
}

/// Interactive control prompt for a running worker.
pub struct Shell {
  editor: DefaultEditor,
}

impl Shell {
  pub fn new() -> io::Result<Self> {
    let editor = DefaultEditor::new().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(Self { editor })
  }

  /// Read and run commands until `q`, Ctrl-C or Ctrl-D.
  pub fn run(&mut self, worker: &WorkerHandle) -> Result<()> {
    println!("{}", HELP);
    loop {
      for notice in drain_events(worker) {
        println!("{}", notice);
      }
      let line = match self.editor.readline("(monitor-mock) ") {
        Ok(line) => line,
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(()),
        Err(err) => return Err(io::Error::new(io::ErrorKind::Other, err).into()),
      };

      let trimmed = line.trim();
      if !trimmed.is_empty() {
        let _ = self.editor.add_history_entry(trimmed);
      }

      match parse_command(trimmed) {
        Ok(Some(Command::Quit)) => return Ok(()),
        Ok(Some(cmd)) => execute(worker, cmd)?,
        Ok(None) => {},
        Err(msg) => eprintln!("Error: {}", msg),
      }
    }
  }
}

/// Empty the worker's event queue. Returns a line for each event worth
/// showing at the prompt; per-reply events are dropped.
pub fn drain_events(worker: &WorkerHandle) -> Vec<String> {
  let mut notices = Vec::new();
  while let Some(event) = worker.try_event() {
    let notice = match event {
      WorkerEvent::Listening => "[worker] listening".to_string(),
      WorkerEvent::Connected => "[worker] client connected".to_string(),
      WorkerEvent::Disconnected => "[worker] client disconnected".to_string(),
      WorkerEvent::ConnectionClosed => "[worker] connection closed".to_string(),
      WorkerEvent::Error(msg) => format!("[worker] error: {}", msg),
      WorkerEvent::Stopped => "[worker] stopped".to_string(),
      WorkerEvent::ReplySent(_) => continue,
    };
    notices.push(notice);
  }
  notices
}

pub fn execute(worker: &WorkerHandle, cmd: Command) -> Result<()> {
  match cmd {
    Command::Listen => worker.start_listening(),
    Command::Enable => worker.set_read_loop(true),
    Command::Disable => worker.set_read_loop(false),
    Command::Latency(latency) => worker.set_reply_latency(latency),
    Command::Close => worker.close_connection(),
    Command::Regs => {
      let regs = worker.snapshot(SNAPSHOT_TIMEOUT)?;
      match serde_json::to_string_pretty(&regs) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: {}", e),
      }
      Ok(())
    },
    Command::State => {
      let state = match worker.state() {
        WorkerState::Stopped => "stopped",
        WorkerState::Listening => "listening",
        WorkerState::Draining => "draining",
      };
      println!("{}", state);
      Ok(())
    },
    Command::Help => {
      println!("{}", HELP);
      Ok(())
    },
    Command::Quit => Ok(()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_commands() {
    assert_eq!(parse_command("  "), Ok(None));
    assert_eq!(parse_command("listen"), Ok(Some(Command::Listen)));
    assert_eq!(parse_command("q"), Ok(Some(Command::Quit)));
    assert_eq!(
      parse_command("latency 1.5"),
      Ok(Some(Command::Latency(Duration::from_millis(1500))))
    );
  }

  #[test]
  fn rejects_bad_latency() {
    assert!(parse_command("latency").is_err());
    assert!(parse_command("latency abc").is_err());
    assert!(parse_command("latency -1").is_err());
    assert!(parse_command("frobnicate").is_err());
  }

  #[test]
  fn drain_events_reports_hangup_and_empties_queue() {
    use crate::device::MockDevice;
    use crate::server::socket::protocol::Request;
    use crate::server::socket::transport;
    use crate::server::worker::spawn;
    use std::thread;
    use std::time::Instant;

    let (transport, mut peer) = transport::pair();
    let worker = spawn(MockDevice::default(), transport, Duration::from_millis(20)).unwrap();
    worker.start_listening().unwrap();
    worker.set_read_loop(true).unwrap();
    peer.send(&Request::ReadReg { addr: 0, reserved: 0 }.to_bytes()).unwrap();
    peer.recv_exact(4).unwrap();
    drop(peer);

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut notices = Vec::new();
    while !notices.iter().any(|n: &String| n.contains("disconnected")) && Instant::now() < deadline {
      notices.extend(drain_events(&worker));
      thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(
      notices,
      vec![
        "[worker] listening".to_string(),
        "[worker] client connected".to_string(),
        "[worker] client disconnected".to_string(),
      ]
    );
    assert!(drain_events(&worker).is_empty());
    worker.quit().unwrap();
  }
}
