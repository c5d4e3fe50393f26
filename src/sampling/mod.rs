pub mod controller;
pub mod loop_worker;
pub mod provider;

pub use controller::SamplingController;
pub use provider::{PositionProvider, SimulatedProvider};
