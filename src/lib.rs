pub mod config;
pub mod db;
pub mod models;
pub mod sampling;
pub mod status;
pub mod sync;
pub mod tracker;

pub use config::AgentConfig;
pub use db::Database;
pub use models::{PositionFix, Sample, SessionIdentity, StatusSnapshot, TrackingSession};
pub use sampling::{PositionProvider, SimulatedProvider};
pub use status::{StatusBroadcaster, Subscription};
pub use sync::{HttpLocationSink, LocationSink};
pub use tracker::{LocationAgent, TrackerController};
