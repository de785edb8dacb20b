// Bundled workers: forwarding to a topic, and dead letter routing around any worker
pub mod dead_letter;
pub mod forward;

pub use dead_letter::DeadLetterWorker;
pub use forward::{ForwardWorker, ForwardedRecord};
