pub mod queue;
pub mod sessions;
