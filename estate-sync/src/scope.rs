//! Scope stabilization.
//!
//! Callers may re-supply an equal but freshly constructed scope on every
//! refresh. Only a change in value counts as a transition; anything else
//! would cause fetch storms and subscription churn.

use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Identifier that cached data and subscriptions are keyed by.
///
/// Two scopes are the same iff they compare equal.
pub trait ScopeKey: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> ScopeKey for T where T: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Outcome of observing a supplied scope value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeTransition<S> {
    /// The supplied value equals the stable scope.
    Unchanged,
    /// The stable scope moved from `previous` to `current`.
    Changed {
        previous: Option<S>,
        current: Option<S>,
    },
}

impl<S> ScopeTransition<S> {
    pub fn is_changed(&self) -> bool {
        matches!(self, ScopeTransition::Changed { .. })
    }
}

/// Holds the stable scope of one binding.
#[derive(Debug, Clone)]
pub struct ScopeTracker<S> {
    stable: Option<S>,
}

impl<S> Default for ScopeTracker<S> {
    fn default() -> Self {
        Self { stable: None }
    }
}

impl<S: ScopeKey> ScopeTracker<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current stable scope, if any.
    pub fn current(&self) -> Option<&S> {
        self.stable.as_ref()
    }

    /// Whether `scope` is the current stable scope.
    pub fn is_current(&self, scope: &S) -> bool {
        self.stable.as_ref() == Some(scope)
    }

    /// Observe a supplied value and report whether the stable scope moved.
    pub fn observe(&mut self, next: Option<S>) -> ScopeTransition<S> {
        if self.stable == next {
            return ScopeTransition::Unchanged;
        }
        let previous = std::mem::replace(&mut self.stable, next.clone());
        ScopeTransition::Changed {
            previous,
            current: next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_equal_values_do_not_transition() {
        let mut tracker = ScopeTracker::new();
        assert!(tracker.observe(Some("agency-1".to_string())).is_changed());
        assert_eq!(
            tracker.observe(Some(String::from("agency-1"))),
            ScopeTransition::Unchanged
        );
        assert_eq!(tracker.current().map(String::as_str), Some("agency-1"));
    }

    #[test]
    fn test_absence_is_a_transition() {
        let mut tracker = ScopeTracker::new();
        tracker.observe(Some(7u32));
        assert_eq!(
            tracker.observe(None),
            ScopeTransition::Changed {
                previous: Some(7),
                current: None
            }
        );
        assert_eq!(tracker.observe(None), ScopeTransition::Unchanged);
    }

    proptest! {
        #[test]
        fn prop_transitions_match_value_changes(
            values in prop::collection::vec(prop::option::of(0u8..4), 0..40),
        ) {
            let mut tracker = ScopeTracker::new();
            let mut last: Option<u8> = None;
            for value in values {
                let transition = tracker.observe(value);
                prop_assert_eq!(transition.is_changed(), value != last);
                last = value;
                prop_assert_eq!(tracker.current().copied(), last);
            }
        }
    }
}
