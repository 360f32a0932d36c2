use qnsd_events::{CallType, Coverage, WfcPreference};
use serde::{Deserialize, Serialize};

/// Which side a guard timer is currently protecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuardingDirection {
    None,
    Wifi,
    Cellular,
}

/// The situation a selection policy applies to.
///
/// `guarding: None` is a plain pre-condition. A guarded pre-condition is
/// equal only to another guarded one with the same direction, so plain and
/// guarded policies never shadow each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreCondition {
    pub call_type: CallType,
    pub preference: WfcPreference,
    pub coverage: Coverage,
    pub guarding: Option<GuardingDirection>,
}

impl PreCondition {
    pub fn plain(
        call_type: CallType,
        preference: WfcPreference,
        coverage: Coverage,
    ) -> Self {
        Self {
            call_type,
            preference,
            coverage,
            guarding: None,
        }
    }

    pub fn guarded(
        call_type: CallType,
        preference: WfcPreference,
        coverage: Coverage,
        direction: GuardingDirection,
    ) -> Self {
        Self {
            call_type,
            preference,
            coverage,
            guarding: Some(direction),
        }
    }

    /// Structural match over all fields, including the guarding variant.
    pub fn matches(&self, other: &PreCondition) -> bool {
        self == other
    }

    /// The same condition with the guarding extension stripped.
    pub fn without_guarding(mut self) -> Self {
        self.guarding = None;
        self
    }
}
