pub mod sample;
pub mod session;
pub mod status;

pub use sample::{PositionFix, Sample};
pub use session::{SessionIdentity, TrackingSession};
pub use status::{ErrorKind, StatusSnapshot};
