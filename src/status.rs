use crate::collection::Entity;
use crate::errors::{AppError, AppResult};
use crate::models::TransitionPolicy;
use std::fmt::Debug;

/// A status enumeration with an explicit transition table.
pub trait Lifecycle: Copy + Ord + Debug + 'static {
    const ALL: &'static [Self];

    fn as_str(self) -> &'static str;

    /// States reachable in one step under [`TransitionPolicy::Enforced`].
    fn next_states(self) -> &'static [Self];

    fn can_transition(self, to: Self) -> bool {
        self == to || self.next_states().contains(&to)
    }

    fn is_terminal(self) -> bool {
        self.next_states().is_empty()
    }

    fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(wanted))
    }
}

pub trait HasStatus: Entity {
    type Status: Lifecycle;

    fn status(&self) -> Self::Status;
    fn set_status(&mut self, status: Self::Status);
}

pub fn check_transition<S: Lifecycle>(
    entity: &str,
    from: S,
    to: S,
    policy: TransitionPolicy,
) -> AppResult<()> {
    match policy {
        TransitionPolicy::Unrestricted => Ok(()),
        TransitionPolicy::Enforced if from.can_transition(to) => Ok(()),
        TransitionPolicy::Enforced => Err(AppError::InvalidTransition {
            entity: entity.to_string(),
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        }),
    }
}
