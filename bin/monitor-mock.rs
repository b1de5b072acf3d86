use clap::Parser;
use log::info;
use monitor_mock::config::config::{load_and_merge_configs, CliOverrides};
use monitor_mock::server::shell::Shell;
use monitor_mock::server::{spawn, WorkerEvent};
use monitor_mock::utils::log::{init_log, init_quiet_log};
use monitor_mock::utils::trace::TraceWriter;
use monitor_mock::{MockDevice, TcpTransport};
use std::path::PathBuf;

/// monitor-mock - a stand-in for the monitor-tcp register server
#[derive(Parser, Debug)]
#[command(name = "monitor-mock")]
#[command(version = "0.1.0")]
#[command(about = "Mock monitor-tcp device for testing register clients", long_about = None)]
struct Args {
  /// Configuration file (TOML), merged over the built-in defaults
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Address to listen on
  #[arg(long)]
  host: Option<String>,

  /// Port to listen on
  #[arg(short, long)]
  port: Option<u16>,

  /// Reply latency in seconds
  #[arg(short, long, value_name = "SECS")]
  latency: Option<f64>,

  /// READ_BUFFER reply length in bytes
  #[arg(long, value_name = "BYTES")]
  max_samples: Option<usize>,

  /// Polling period of the server loop
  #[arg(long, value_name = "MS")]
  poll_interval_ms: Option<u64>,

  /// Quiet mode (only warnings and errors)
  #[arg(short, long)]
  quiet: bool,

  /// Write a JSON line per handled frame to this file
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Start listening and serving immediately, no interactive shell
  #[arg(long)]
  headless: bool,
}

fn main() -> std::io::Result<()> {
  let args = Args::parse();

  let cli = CliOverrides {
    host: args.host,
    port: args.port,
    poll_interval_ms: args.poll_interval_ms,
    reply_latency: args.latency,
    max_samples: args.max_samples,
    quiet: args.quiet,
    trace_file: args.trace_file,
  };
  let config = load_and_merge_configs(args.config.as_deref(), &cli)?;

  if config.logging.quiet {
    init_quiet_log();
  } else {
    init_log();
  }
  info!("config: {:?}", config);

  let mut device = MockDevice::new(config.device_config());
  if let Some(path) = config.trace_path() {
    device = device.with_trace(TraceWriter::create(&path)?);
    info!("tracing frames to {}", path.display());
  }

  let transport = TcpTransport::new(config.bind_addr());
  let worker = spawn(device, transport, config.poll_interval()).map_err(to_io)?;

  if args.headless {
    worker.start_listening().map_err(to_io)?;
    match worker.recv_event() {
      Some(WorkerEvent::Listening) => {},
      Some(WorkerEvent::Error(msg)) => return Err(std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, msg)),
      other => info!("{:?}", other),
    }
    worker.set_read_loop(true).map_err(to_io)?;
    while let Some(event) = worker.recv_event() {
      info!("{:?}", event);
    }
    return Ok(());
  }

  let mut shell = Shell::new()?;
  shell.run(&worker).map_err(to_io)?;
  worker.quit().map_err(to_io)?;
  Ok(())
}

fn to_io(e: monitor_mock::DeviceError) -> std::io::Error {
  match e {
    monitor_mock::DeviceError::Io(err) => err,
    other => std::io::Error::new(std::io::ErrorKind::Other, other),
  }
}
