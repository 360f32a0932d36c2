//! Carrier policy: threshold predicates, selection policies, the compiled
//! policy store and the pre-condition matcher.

pub mod ansp;
pub mod matcher;
pub mod parser;
pub mod precondition;
pub mod store;
pub mod threshold;

pub use ansp::Ansp;
pub use matcher::{AnspMatcher, PolicyMap};
pub use precondition::{GuardingDirection, PreCondition};
pub use store::{CarrierPolicyStore, PolicySnapshot, RatPreference};
pub use threshold::{Threshold, ThresholdGroup, ThresholdOp};
