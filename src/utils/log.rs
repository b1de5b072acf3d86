/// Global logging configuration
use log::LevelFilter;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialise env_logger once. `RUST_LOG` overrides the default `info` level.
pub fn init_log() {
  init_log_with_level(LevelFilter::Info);
}

/// Quiet mode: only warnings and errors unless `RUST_LOG` says otherwise.
pub fn init_quiet_log() {
  init_log_with_level(LevelFilter::Warn);
}

fn init_log_with_level(level: LevelFilter) {
  INIT.call_once(|| {
    let _ = env_logger::Builder::new()
      .filter_level(level)
      .parse_default_env()
      .format_timestamp_millis()
      .try_init();
  });
}
