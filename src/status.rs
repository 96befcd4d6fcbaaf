use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StatusLevel::Info => "INFO",
            StatusLevel::Warning => "WARN",
            StatusLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// Receiver of human-readable progress owned by the surrounding application.
///
/// Implementations must not block: the core posts from inside worker-pool
/// tasks and the waiter loop.
pub trait StatusSink: Send + Sync {
    fn post(&self, message: &str, level: StatusLevel);

    fn info(&self, message: &str) {
        self.post(message, StatusLevel::Info);
    }

    fn warning(&self, message: &str) {
        self.post(message, StatusLevel::Warning);
    }

    fn error(&self, message: &str) {
        self.post(message, StatusLevel::Error);
    }
}

pub type SharedSink = Arc<dyn StatusSink>;

fn mirror(message: &str, level: StatusLevel) {
    match level {
        StatusLevel::Info => info!("{}", message),
        StatusLevel::Warning => warn!("{}", message),
        StatusLevel::Error => error!("{}", message),
    }
}

/// Forwards status straight into `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn post(&self, message: &str, level: StatusLevel) {
        mirror(message, level);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub message: String,
}

/// Queues status for a consumer task over an unbounded channel.
/// Presentation is left entirely to the consumer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StatusMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelSink {
    fn post(&self, message: &str, level: StatusLevel) {
        // A closed receiver means the consumer is gone; status is best-effort.
        let _ = self.tx.send(StatusMessage {
            level,
            message: message.to_string(),
        });
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<StatusMessage>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<StatusMessage> {
        self.messages
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.message.contains(needle))
    }

    pub fn count_at(&self, level: StatusLevel) -> usize {
        self.messages().iter().filter(|m| m.level == level).count()
    }
}

impl StatusSink for MemorySink {
    fn post(&self, message: &str, level: StatusLevel) {
        mirror(message, level);
        if let Ok(mut guard) = self.messages.lock() {
            guard.push(StatusMessage {
                level,
                message: message.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.info("first");
        sink.error("second");

        let first = rx.recv().await.expect("first message");
        let second = rx.recv().await.expect("second message");
        assert_eq!(first.message, "first");
        assert_eq!(first.level, StatusLevel::Info);
        assert_eq!(second.level, StatusLevel::Error);
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.warning("nobody listening");
    }

    #[test]
    fn memory_sink_counts_levels() {
        let sink = MemorySink::new();
        sink.info("a");
        sink.warning("b");
        sink.warning("c");
        assert_eq!(sink.count_at(StatusLevel::Warning), 2);
        assert!(sink.contains("c"));
    }
}
