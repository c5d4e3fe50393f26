pub mod backoff;
pub mod engine;
pub mod sink;

pub use engine::{SyncController, SyncTrigger};
pub use sink::{HttpLocationSink, LocationSink};
