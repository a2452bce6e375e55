pub mod deviation;
pub mod fixed_point;
pub mod reference;

pub use deviation::{Decision, Threshold, UpdatePolicy};
pub use fixed_point::{FixedPoint, ReferenceValue, StoredValue};
pub use reference::ReferenceSource;
