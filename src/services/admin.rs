//! Admin permission check
//!
//! A user is an admin when any of these hold: the email is on the configured
//! allow-list, the stored `is_admin` flag is set, or the role is `admin`.

use crate::models::{User, UserRole};
use std::collections::HashSet;

/// Configured admin allow-list
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    emails: HashSet<String>,
}

impl AdminPolicy {
    /// Build from configured addresses; blanks are skipped, case is ignored
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            emails: emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn is_admin(&self, user: &User) -> bool {
        user.is_admin
            || user.role == UserRole::Admin
            || self.emails.contains(&user.email.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn user(email: &str, role: UserRole, is_admin: bool) -> User {
        let mut user = User::new(
            email.to_string(),
            "hash".to_string(),
            "Pat".to_string(),
            "Lee".to_string(),
            role,
        );
        user.is_admin = is_admin;
        user
    }

    #[test]
    fn test_allow_list_is_case_insensitive() {
        let policy = AdminPolicy::new([" Director@Homer.org ", ""]);
        assert!(policy.is_admin(&user("director@homer.org", UserRole::Guardian, false)));
        assert!(policy.is_admin(&user("DIRECTOR@homer.org", UserRole::Guardian, false)));
        assert!(!policy.is_admin(&user("parent@homer.org", UserRole::Guardian, false)));
    }

    #[test]
    fn test_flag_and_role_grant_admin() {
        let policy = AdminPolicy::default();
        assert!(policy.is_admin(&user("a@homer.org", UserRole::Guardian, true)));
        assert!(policy.is_admin(&user("b@homer.org", UserRole::Admin, false)));
        assert!(!policy.is_admin(&user("c@homer.org", UserRole::Instructor, false)));
    }

    fn role_strategy() -> impl Strategy<Value = UserRole> {
        prop_oneof![
            Just(UserRole::Admin),
            Just(UserRole::Guardian),
            Just(UserRole::Instructor),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// The check is exactly the disjunction of its three sources
        #[test]
        fn prop_is_admin_is_disjunction(
            role in role_strategy(),
            flag in any::<bool>(),
            listed in any::<bool>(),
        ) {
            let email = "someone@homer.org";
            let policy = if listed { AdminPolicy::new([email]) } else { AdminPolicy::default() };
            let expected = flag || role == UserRole::Admin || listed;
            prop_assert_eq!(policy.is_admin(&user(email, role, flag)), expected);
        }
    }
}
