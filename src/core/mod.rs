pub mod error;
pub mod types;

pub use error::{DriverError, Result, UpgradeError, display_version};
pub use types::{Branch, SegmentKind, Version};
