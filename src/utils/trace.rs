/// JSON-lines trace of every dispatched frame
use crate::server::socket::protocol::{Reply, Request};
use log::warn;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

pub struct TraceWriter {
  writer: BufWriter<Box<dyn Write + Send>>,
  start: Instant,
}

impl TraceWriter {
  pub fn create(path: &Path) -> io::Result<Self> {
    let file = File::create(path)?;
    Ok(Self::from_writer(file))
  }

  pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
    Self {
      writer: BufWriter::new(Box::new(writer)),
      start: Instant::now(),
    }
  }

  pub fn record(&mut self, request: &Request, reply: Option<&Reply>) {
    let field = match *request {
      Request::WriteReg { data, .. } => data,
      Request::ReadReg { reserved, .. } => reserved,
      Request::ReadBuffer { number_of_points, .. } => number_of_points,
    };
    let entry = serde_json::json!({
      "time": self.start.elapsed().as_secs_f64(),
      "opcode": request.opcode().name(),
      "addr": request.addr(),
      "field": field,
      "reply_len": reply.map_or(0, |r| r.len()),
    });
    // a broken trace file must not take the device down
    if let Err(e) = writeln!(self.writer, "{}", entry).and_then(|_| self.writer.flush()) {
      warn!("trace write failed: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{Arc, Mutex};

  #[derive(Clone, Default)]
  struct Shared(Arc<Mutex<Vec<u8>>>);

  impl Write for Shared {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn one_json_line_per_frame() {
    let sink = Shared::default();
    let mut trace = TraceWriter::from_writer(sink.clone());
    trace.record(&Request::WriteReg { addr: 400, data: 10 }, None);
    trace.record(&Request::ReadReg { addr: 400, reserved: 0 }, Some(&Reply::Register(10)));

    let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["opcode"], "WRITE_REG");
    assert_eq!(lines[0]["field"], 10);
    assert_eq!(lines[1]["addr"], 400);
    assert_eq!(lines[1]["reply_len"], 4);
  }
}
