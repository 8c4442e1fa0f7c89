//! Policy evaluation.
//!
//! Given a user, a target, and an action, decide whether the action is
//! allowed and which rule governs the outcome. Evaluation is a pure
//! function of the policy snapshot passed in: sessions fetch their snapshot
//! once at start and re-evaluate per request without touching the store.

use chrono::{DateTime, Utc};
use jumpgate_core::{Action, Policy, Target, User};
use tracing::debug;

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Allowed under the named rule.
    Allowed { rule: String },
    /// Denied by an explicit rule.
    DeniedByRule { rule: String },
    /// No matching rule allowed the action.
    DeniedByDefault,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// The governing rule name, when a rule decided the outcome.
    pub fn rule(&self) -> Option<&str> {
        match self {
            Decision::Allowed { rule } | Decision::DeniedByRule { rule } => Some(rule),
            Decision::DeniedByDefault => None,
        }
    }
}

/// Evaluate `(user, target, action)` against a policy snapshot.
///
/// Deny has strict priority over allow: if any retained policy carries the
/// `DenyAll` sentinel, the outcome is a deny naming that rule, regardless of
/// other allows. `Login` is implied by any non-sentinel allow, since every
/// granted operation requires a login first.
pub fn evaluate(
    policies: &[Policy],
    user: &User,
    target: &Target,
    action: Action,
    now: DateTime<Utc>,
) -> Decision {
    // The sentinel is not a queryable action.
    if action == Action::DenyAll {
        return Decision::DeniedByDefault;
    }

    let retained: Vec<&Policy> = policies
        .iter()
        .filter(|p| !p.is_expired(now))
        .filter(|p| p.matches_subject(user))
        .filter(|p| p.filter.matches(target))
        .collect();

    if let Some(denier) = retained
        .iter()
        .find(|p| p.actions.contains(&Action::DenyAll))
    {
        debug!(
            user = %user.name,
            target = %target.name,
            action = ?action,
            rule = %denier.name,
            "Denied by rule"
        );
        return Decision::DeniedByRule {
            rule: denier.name.clone(),
        };
    }

    if let Some(allower) = retained.iter().find(|p| allows(p, action)) {
        return Decision::Allowed {
            rule: allower.name.clone(),
        };
    }

    Decision::DeniedByDefault
}

/// Whether a non-sentinel policy grants the action.
fn allows(policy: &Policy, action: Action) -> bool {
    if policy.actions.contains(&action) {
        return true;
    }
    // Login rides along with any concrete grant.
    action == Action::Login
        && policy
            .actions
            .iter()
            .any(|a| *a != Action::DenyAll)
}

/// Convenience: whether the user may log in to the target at all. Drives
/// menu visibility.
pub fn may_login(policies: &[Policy], user: &User, target: &Target, now: DateTime<Utc>) -> bool {
    evaluate(policies, user, target, Action::Login, now).is_allowed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jumpgate_core::{ServerFilter, SshUser, TargetStatus};
    use std::collections::BTreeSet;

    fn user(name: &str, groups: &[&str]) -> User {
        User {
            name: name.into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            public_keys: vec![],
        }
    }

    fn target(name: &str, env: &str) -> Target {
        Target {
            id: format!("i-{name}"),
            name: name.into(),
            host: "10.0.0.1".into(),
            port: 22,
            ssh_users: vec![SshUser {
                username: "ubuntu".into(),
                key_name: "prod".into(),
            }],
            profile: "p1".into(),
            region: "r1".into(),
            status: TargetStatus::Running,
            tags: [("env".to_string(), env.to_string())].into(),
        }
    }

    fn policy(name: &str, groups: &[&str], env: Option<&str>, actions: &[Action]) -> Policy {
        Policy {
            name: name.into(),
            users: BTreeSet::new(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            filter: ServerFilter {
                tags: env.map(|e| [("env".to_string(), e.to_string())].into()),
                ..Default::default()
            },
            actions: actions.iter().copied().collect(),
            expires_at: None,
        }
    }

    #[test]
    fn test_deny_has_priority_over_allow() {
        let policies = vec![
            policy("allow-all", &["dev"], None, &[Action::Login, Action::Connect]),
            policy("lockdown", &["dev"], None, &[Action::DenyAll]),
        ];
        let decision = evaluate(
            &policies,
            &user("alice", &["dev"]),
            &target("t1", "staging"),
            Action::Login,
            Utc::now(),
        );
        assert_eq!(
            decision,
            Decision::DeniedByRule {
                rule: "lockdown".into()
            }
        );
    }

    #[test]
    fn test_deny_by_default_when_nothing_matches() {
        let policies = vec![policy("ops-only", &["ops"], None, &[Action::Login])];
        let decision = evaluate(
            &policies,
            &user("alice", &["dev"]),
            &target("t1", "staging"),
            Action::Login,
            Utc::now(),
        );
        assert_eq!(decision, Decision::DeniedByDefault);
    }

    #[test]
    fn test_staging_policy_scopes_menu_and_denies_prod() {
        // One policy granting dev group Login+Connect on env=staging.
        let policies = vec![policy(
            "dev-staging",
            &["dev"],
            Some("staging"),
            &[Action::Login, Action::Connect],
        )];
        let alice = user("alice", &["dev"]);
        let staging = target("t1", "staging");
        let prod = target("t2", "prod");

        assert!(may_login(&policies, &alice, &staging, Utc::now()));
        assert!(!may_login(&policies, &alice, &prod, Utc::now()));
        assert_eq!(
            evaluate(&policies, &alice, &prod, Action::Login, Utc::now()),
            Decision::DeniedByDefault
        );
    }

    #[test]
    fn test_login_implied_by_upload_grant() {
        let policies = vec![policy("uploader", &["dev"], None, &[Action::Upload])];
        let alice = user("alice", &["dev"]);
        let t = target("t1", "staging");

        assert!(may_login(&policies, &alice, &t, Utc::now()));
        assert!(evaluate(&policies, &alice, &t, Action::Upload, Utc::now()).is_allowed());
        // But Download was never granted.
        assert_eq!(
            evaluate(&policies, &alice, &t, Action::Download, Utc::now()),
            Decision::DeniedByDefault
        );
    }

    #[test]
    fn test_expired_policy_is_ignored() {
        let mut p = policy("old", &["dev"], None, &[Action::Login]);
        p.expires_at = Some(Utc::now() - chrono::Duration::days(1));
        let policies = vec![p];

        assert!(!may_login(
            &policies,
            &user("alice", &["dev"]),
            &target("t1", "staging"),
            Utc::now()
        ));
    }

    #[test]
    fn test_wildcard_subjects_match_anyone() {
        let policies = vec![policy("everyone", &[], None, &[Action::Login])];
        assert!(may_login(
            &policies,
            &user("mallory", &[]),
            &target("t1", "prod"),
            Utc::now()
        ));
    }

    #[test]
    fn test_user_subject_matches_by_name() {
        let mut p = policy("named", &[], None, &[Action::Login]);
        p.users = ["alice".to_string()].into();
        let policies = vec![p];

        assert!(may_login(
            &policies,
            &user("alice", &[]),
            &target("t1", "staging"),
            Utc::now()
        ));
        assert!(!may_login(
            &policies,
            &user("bob", &[]),
            &target("t1", "staging"),
            Utc::now()
        ));
    }

    #[test]
    fn test_allowed_decision_names_the_rule() {
        let policies = vec![policy("dev-staging", &["dev"], None, &[Action::Login])];
        let decision = evaluate(
            &policies,
            &user("alice", &["dev"]),
            &target("t1", "staging"),
            Action::Login,
            Utc::now(),
        );
        assert_eq!(decision.rule(), Some("dev-staging"));
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_sentinel_is_not_queryable() {
        let policies = vec![policy("everyone", &[], None, &[Action::Login])];
        assert_eq!(
            evaluate(
                &policies,
                &user("alice", &[]),
                &target("t1", "staging"),
                Action::DenyAll,
                Utc::now()
            ),
            Decision::DeniedByDefault
        );
    }

    #[test]
    fn test_evaluation_is_stable_for_fixed_snapshot() {
        let policies = vec![
            policy("dev-staging", &["dev"], Some("staging"), &[Action::Login]),
            policy("lockdown", &["contractor"], None, &[Action::DenyAll]),
        ];
        let alice = user("alice", &["dev"]);
        let t = target("t1", "staging");
        let now = Utc::now();

        let first = evaluate(&policies, &alice, &t, Action::Login, now);
        let second = evaluate(&policies, &alice, &t, Action::Login, now);
        assert_eq!(first, second);
    }
}
