//! Multi-file copy between the local filesystem and the device.

mod observer;
mod orchestrator;
mod types;

pub use observer::{ChannelObserver, TransferEvent, TransferObserver};
pub use orchestrator::TransferOrchestrator;
pub use types::{
    PasteRequest, PreprocessEvent, TransferDirection, TransferErrorEvent, TransferItem, TransferOutcome,
    TransferPhase, TransferProgress, TransferSummary,
};
