//! Callbacks from a running paste back into the UI layer.

use tokio::sync::mpsc;

use super::types::{PreprocessEvent, TransferErrorEvent, TransferProgress};

/// Receives paste events. All methods are called from the task running the paste.
///
/// `on_finalize` is called exactly once per paste, on every path including rejected ones.
/// After it, exactly one of `on_completed` or `on_error` follows.
pub trait TransferObserver: Send + Sync {
    fn on_preprocess(&self, _event: &PreprocessEvent) {}

    fn on_progress(&self, _progress: &TransferProgress) {}

    fn on_error(&self, _event: &TransferErrorEvent) {}

    fn on_completed(&self, _operation_id: &str) {}

    /// Tear down the progress indicator and refresh the directory listing.
    fn on_finalize(&self, _operation_id: &str) {}
}

/// Every observer callback as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Preprocess(PreprocessEvent),
    Progress(TransferProgress),
    Error(TransferErrorEvent),
    Completed { operation_id: String },
    Finalized { operation_id: String },
}

/// Forwards callbacks into a channel, for callers that prefer consuming a stream.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: TransferEvent) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

impl TransferObserver for ChannelObserver {
    fn on_preprocess(&self, event: &PreprocessEvent) {
        self.send(TransferEvent::Preprocess(event.clone()));
    }

    fn on_progress(&self, progress: &TransferProgress) {
        self.send(TransferEvent::Progress(progress.clone()));
    }

    fn on_error(&self, event: &TransferErrorEvent) {
        self.send(TransferEvent::Error(event.clone()));
    }

    fn on_completed(&self, operation_id: &str) {
        self.send(TransferEvent::Completed {
            operation_id: operation_id.to_string(),
        });
    }

    fn on_finalize(&self, operation_id: &str) {
        self.send(TransferEvent::Finalized {
            operation_id: operation_id.to_string(),
        });
    }
}
