//! Progress Events
//!
//! Intermediate progress raised from inside a stage (per-file upload, remote
//! translation percentage, poll attempts). Events travel over an unbounded
//! channel to the orchestrator, which folds them into the session record
//! before the next stage starts.

use tokio::sync::mpsc;

/// Progress event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// One file of an upload set finished
    FileUploaded {
        completed: usize,
        total: usize,
        file: String,
    },
    /// Remote side reported a completion percentage
    RemotePercent { percent: u8 },
    /// A poll attempt came back not-yet-ready
    StillWaiting { attempt: u32 },
}

impl ProgressEvent {
    /// Fraction of the current stage's work (0-100) this event represents
    pub fn percent(&self) -> Option<u8> {
        match self {
            Self::FileUploaded {
                completed, total, ..
            } if *total > 0 => Some(((completed * 100) / total).min(100) as u8),
            Self::FileUploaded { .. } => None,
            Self::RemotePercent { percent } => Some((*percent).min(100)),
            Self::StillWaiting { .. } => None,
        }
    }

    /// Human-readable description for the session message
    pub fn describe(&self) -> String {
        match self {
            Self::FileUploaded {
                completed,
                total,
                file,
            } => format!("Uploaded {} ({}/{})", file, completed, total),
            Self::RemotePercent { percent } => format!("Translation {}% complete", percent),
            Self::StillWaiting { attempt } => format!("Waiting for remote data (attempt {})", attempt),
        }
    }
}

/// Sending half handed to stage operations
#[derive(Debug, Clone)]
pub struct ProgressSink {
    sender: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// Create a connected sink and its receiving half
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Sink that discards every event
    pub fn disconnected() -> Self {
        Self { sender: None }
    }

    /// Send an event.
    /// Silently discards if the receiver is gone.
    #[inline]
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_percent() {
        let event = ProgressEvent::FileUploaded {
            completed: 1,
            total: 4,
            file: "a.ipt".to_string(),
        };
        assert_eq!(event.percent(), Some(25));
        assert!(event.describe().contains("1/4"));
    }

    #[test]
    fn test_empty_upload_has_no_percent() {
        let event = ProgressEvent::FileUploaded {
            completed: 0,
            total: 0,
            file: String::new(),
        };
        assert_eq!(event.percent(), None);
    }

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.emit(ProgressEvent::RemotePercent { percent: 10 });
        sink.emit(ProgressEvent::RemotePercent { percent: 40 });
        drop(sink);

        assert_eq!(rx.recv().await, Some(ProgressEvent::RemotePercent { percent: 10 }));
        assert_eq!(rx.recv().await, Some(ProgressEvent::RemotePercent { percent: 40 }));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_disconnected_sink_is_silent() {
        ProgressSink::disconnected().emit(ProgressEvent::StillWaiting { attempt: 1 });
    }
}
