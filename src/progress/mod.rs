//! Progress tracking: timestamps, frontiers, and pointstamps.

pub mod frontier;
pub mod pointstamp;
pub mod timestamp;

pub use frontier::{Frontier, FrontierChange, SupportedFrontier};
pub use pointstamp::Pointstamp;
pub use timestamp::Timestamp;
