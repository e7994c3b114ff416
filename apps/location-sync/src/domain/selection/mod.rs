//! Selection
//!
//! Which users the caller wants to see, and whether history overlays are
//! shown. Produced by the caller's selection UI; read-only to the engine.

use std::collections::BTreeSet;

use crate::domain::location::UserId;

/// A set of selected users (empty means "all users") plus the history flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    user_ids: BTreeSet<UserId>,
    history_visible: bool,
}

impl Selection {
    /// Select every user, history hidden.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Select the given users, history hidden.
    #[must_use]
    pub fn users(users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            user_ids: users.into_iter().collect(),
            history_visible: false,
        }
    }

    /// Set the history flag.
    #[must_use]
    pub const fn with_history(mut self, visible: bool) -> Self {
        self.history_visible = visible;
        self
    }

    /// Selected users; empty means all.
    #[must_use]
    pub const fn user_ids(&self) -> &BTreeSet<UserId> {
        &self.user_ids
    }

    /// Whether history overlays are requested.
    #[must_use]
    pub const fn history_visible(&self) -> bool {
        self.history_visible
    }

    /// Whether `user` passes the filter.
    #[must_use]
    pub fn includes(&self, user: UserId) -> bool {
        self.user_ids.is_empty() || self.user_ids.contains(&user)
    }

    /// History is fetched only for an explicit, non-empty selection.
    #[must_use]
    pub fn wants_history(&self) -> bool {
        self.history_visible && !self.user_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selection_includes_everyone() {
        let selection = Selection::all();
        assert!(selection.includes(UserId::new(1)));
        assert!(selection.includes(UserId::new(99)));
    }

    #[test]
    fn explicit_selection_filters() {
        let selection = Selection::users([UserId::new(2)]);
        assert!(selection.includes(UserId::new(2)));
        assert!(!selection.includes(UserId::new(1)));
    }

    #[test]
    fn history_needs_flag_and_users() {
        assert!(!Selection::all().with_history(true).wants_history());
        assert!(!Selection::users([UserId::new(1)]).wants_history());
        assert!(
            Selection::users([UserId::new(1)])
                .with_history(true)
                .wants_history()
        );
    }
}
