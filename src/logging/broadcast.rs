use crate::logging::state::LOG_BROADCAST_TX;
use std::io::{self, Write};
use tokio::sync::broadcast;
use tracing_subscriber::fmt::writer::MakeWriter;

/// Capacity of the in-process log line channel
pub const LOG_CHANNEL_CAPACITY: usize = 1024;

/// `MakeWriter` that publishes each formatted event as one line
#[derive(Clone)]
pub struct BroadcastMakeWriter {
    pub(crate) tx: broadcast::Sender<String>,
}

impl BroadcastMakeWriter {
    pub fn new() -> Self {
        Self {
            tx: get_or_init_log_tx(),
        }
    }
}

impl Default for BroadcastMakeWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BroadcastWriter {
    tx: broadcast::Sender<String>,
    buffer: Vec<u8>,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;
    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            tx: self.tx.clone(),
            buffer: Vec::with_capacity(256),
        }
    }
}

impl Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for BroadcastWriter {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut line = String::from_utf8_lossy(&self.buffer).to_string();
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        // No subscribers is fine
        let _ = self.tx.send(line);
    }
}

pub fn get_or_init_log_tx() -> broadcast::Sender<String> {
    LOG_BROADCAST_TX
        .get_or_init(|| {
            let (tx, _rx) = broadcast::channel::<String>(LOG_CHANNEL_CAPACITY);
            tx
        })
        .clone()
}

/// Subscribe to a stream of formatted log lines
pub fn subscribe_log_lines() -> broadcast::Receiver<String> {
    get_or_init_log_tx().subscribe()
}
