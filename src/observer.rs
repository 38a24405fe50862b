//! Callback surface exposed to whatever front end drives transfers

use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

/// Which way the bytes move, from the client's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    fn noun(self) -> &'static str {
        match self {
            Direction::Upload => "Upload",
            Direction::Download => "Download",
        }
    }
}

/// Status changes reported for one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Started(Direction),
    Paused,
    Resumed,
    Completed(Direction),
    NotFound,
    Failed(String),
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed(_) | TransferStatus::NotFound | TransferStatus::Failed(_)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Started(d) => write!(f, "{} started", d.noun()),
            TransferStatus::Paused => f.write_str("Transfer paused"),
            TransferStatus::Resumed => f.write_str("Resuming transfer"),
            TransferStatus::Completed(Direction::Upload) => f.write_str("File uploaded successfully"),
            TransferStatus::Completed(Direction::Download) => {
                f.write_str("File downloaded successfully")
            }
            TransferStatus::NotFound => f.write_str("File does not exist on the server"),
            TransferStatus::Failed(msg) => write!(f, "Transfer failed: {msg}"),
        }
    }
}

/// Receives progress and status for a transfer. Called from the transfer's
/// own task, so implementations must not block.
pub trait TransferObserver: Send + Sync {
    /// `fraction` is in `0.0..=1.0` and never decreases within one transfer
    fn on_progress(&self, _fraction: f64) {}
    fn on_status_changed(&self, _status: &TransferStatus) {}
}

pub struct NoopObserver;
impl TransferObserver for NoopObserver {}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress(f64),
    Status(TransferStatus),
}

/// Forward events to a channel, for front ends that poll on their own thread
impl TransferObserver for UnboundedSender<TransferEvent> {
    fn on_progress(&self, fraction: f64) {
        let _ = self.send(TransferEvent::Progress(fraction));
    }
    fn on_status_changed(&self, status: &TransferStatus) {
        let _ = self.send(TransferEvent::Status(status.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(
            TransferStatus::Completed(Direction::Upload).to_string(),
            "File uploaded successfully"
        );
        assert_eq!(
            TransferStatus::NotFound.to_string(),
            "File does not exist on the server"
        );
        assert!(TransferStatus::Failed("x".into()).is_terminal());
        assert!(!TransferStatus::Paused.is_terminal());
    }

    #[test]
    fn test_channel_observer_forwards() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<TransferEvent>();
        tx.on_progress(0.5);
        tx.on_status_changed(&TransferStatus::Paused);
        assert_eq!(rx.try_recv().unwrap(), TransferEvent::Progress(0.5));
        assert_eq!(
            rx.try_recv().unwrap(),
            TransferEvent::Status(TransferStatus::Paused)
        );
    }
}
