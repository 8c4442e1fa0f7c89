//! Target picker: the paginated, searchable list shown after login.
//!
//! The menu itself is pure state over a policy-filtered snapshot; the bin
//! drives it line by line against the downstream channel.

use crate::{RelayError, RelayResult};
use access_policy::may_login;
use chrono::{DateTime, Utc};
use fleet_inventory::FleetSnapshot;
use jumpgate_core::{Policy, SshUser, Target, User};
use std::sync::Arc;

const DEFAULT_PAGE_SIZE: usize = 20;

/// Parsed outcome of one line of menu input.
#[derive(Debug, Clone)]
pub enum MenuAction {
    /// A target was picked, with its resolved ssh user.
    Selected(Arc<Target>, SshUser),
    /// The view changed (page or search); re-render.
    Redraw,
    /// The user asked to leave.
    Quit,
    /// Input did not parse; show the hint.
    Invalid(String),
}

/// Interactive menu state.
pub struct TargetMenu {
    visible: Vec<Arc<Target>>,
    filtered: Vec<Arc<Target>>,
    query: Option<String>,
    page: usize,
    page_size: usize,
}

impl TargetMenu {
    /// Build the menu from the targets the user may log in to. The list is
    /// sorted by name for a stable rendering.
    pub fn new(
        snapshot: &FleetSnapshot,
        policies: &[Policy],
        user: &User,
        now: DateTime<Utc>,
    ) -> Self {
        let mut visible: Vec<Arc<Target>> = snapshot
            .all()
            .into_iter()
            .filter(|t| t.is_reachable())
            .filter(|t| may_login(policies, user, t, now))
            .collect();
        visible.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            filtered: visible.clone(),
            visible,
            query: None,
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Number of targets under the current search.
    pub fn len(&self) -> usize {
        self.filtered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filtered.is_empty()
    }

    /// Targets on the current page.
    pub fn page_targets(&self) -> &[Arc<Target>] {
        let start = self.page * self.page_size;
        let end = (start + self.page_size).min(self.filtered.len());
        if start >= self.filtered.len() {
            &[]
        } else {
            &self.filtered[start..end]
        }
    }

    /// Render the current page as terminal text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(query) = &self.query {
            out.push_str(&format!("search: {query} ({} matches)\r\n", self.len()));
        }
        if self.is_empty() {
            out.push_str("no targets available\r\n");
        }
        let base = self.page * self.page_size;
        for (i, target) in self.page_targets().iter().enumerate() {
            out.push_str(&format!(
                "{:>4}  {:<32} {:<16} {}\r\n",
                base + i + 1,
                target.name,
                target.host,
                target
                    .tags
                    .get("env")
                    .map(String::as_str)
                    .unwrap_or_default(),
            ));
        }
        let pages = self.page_count();
        out.push_str(&format!(
            "page {}/{}  [number] connect  /text search  n next  p prev  q quit\r\n",
            self.page + 1,
            pages.max(1),
        ));
        out
    }

    /// Apply one line of input.
    pub fn handle_input(&mut self, line: &str) -> MenuAction {
        let line = line.trim();
        match line {
            "" => MenuAction::Redraw,
            "q" | "quit" | "exit" => MenuAction::Quit,
            "n" => {
                if self.page + 1 < self.page_count() {
                    self.page += 1;
                }
                MenuAction::Redraw
            }
            "p" => {
                self.page = self.page.saturating_sub(1);
                MenuAction::Redraw
            }
            _ if line.starts_with('/') => {
                self.search(line.trim_start_matches('/'));
                MenuAction::Redraw
            }
            _ => match line.parse::<usize>() {
                Ok(index) if index >= 1 && index <= self.filtered.len() => {
                    let target = self.filtered[index - 1].clone();
                    match target.default_ssh_user().cloned() {
                        Some(ssh_user) => MenuAction::Selected(target, ssh_user),
                        None => MenuAction::Invalid("target has no usable credentials".into()),
                    }
                }
                _ => MenuAction::Invalid(format!("no such entry: {line}")),
            },
        }
    }

    /// Narrow the list by name substring, host substring, or tag value.
    fn search(&mut self, query: &str) {
        let query = query.trim().to_lowercase();
        self.page = 0;
        if query.is_empty() {
            self.query = None;
            self.filtered = self.visible.clone();
            return;
        }
        self.filtered = self
            .visible
            .iter()
            .filter(|t| {
                t.name.to_lowercase().contains(&query)
                    || t.host.contains(&query)
                    || t.tags.values().any(|v| v.to_lowercase().contains(&query))
            })
            .cloned()
            .collect();
        self.query = Some(query);
    }

    fn page_count(&self) -> usize {
        self.filtered.len().div_ceil(self.page_size)
    }
}

/// Resolve a direct target identifier (host or name) under policy `Login`.
///
/// Unknown identifiers report not-found; known targets the user may not
/// reach report a policy denial.
pub fn resolve_direct(
    snapshot: &FleetSnapshot,
    policies: &[Policy],
    user: &User,
    ident: &str,
    now: DateTime<Utc>,
) -> RelayResult<(Arc<Target>, SshUser)> {
    let target = snapshot
        .get(ident)
        .or_else(|| snapshot.all().into_iter().find(|t| t.name == ident))
        .ok_or_else(|| RelayError::TargetNotFound(ident.to_string()))?;

    if !may_login(policies, user, &target, now) {
        return Err(RelayError::PolicyDenied {
            action: "login".into(),
            target: ident.to_string(),
        });
    }
    let ssh_user = target
        .default_ssh_user()
        .cloned()
        .ok_or_else(|| RelayError::TargetNotFound(ident.to_string()))?;
    Ok((target, ssh_user))
}

/// A parsed `[user@]host:path` SCP destination resolved against the fleet.
#[derive(Debug, Clone)]
pub struct ScpDestination {
    pub target: Arc<Target>,
    pub ssh_user: SshUser,
    pub remote_path: String,
}

/// Resolve an SCP destination string into a target, a login identity, and
/// the remote path.
///
/// An explicit `user@` must name a user the target actually registers;
/// without one the first registered user is taken.
pub fn resolve_scp_destination(
    snapshot: &FleetSnapshot,
    raw: &str,
) -> RelayResult<ScpDestination> {
    let (login, rest) = match raw.split_once('@') {
        Some((user, rest)) => (Some(user), rest),
        None => (None, raw),
    };
    let (host, path) = rest
        .split_once(':')
        .ok_or_else(|| RelayError::TargetNotFound(raw.to_string()))?;
    if host.is_empty() || path.is_empty() {
        return Err(RelayError::TargetNotFound(raw.to_string()));
    }

    let target = snapshot
        .get(host)
        .ok_or_else(|| RelayError::TargetNotFound(host.to_string()))?;

    let ssh_user = match login {
        Some(username) => target
            .ssh_user(username)
            .cloned()
            .ok_or_else(|| RelayError::TargetNotFound(format!("{username}@{host}")))?,
        None => target
            .default_ssh_user()
            .cloned()
            .ok_or_else(|| RelayError::TargetNotFound(host.to_string()))?,
    };

    Ok(ScpDestination {
        target,
        ssh_user,
        remote_path: path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jumpgate_core::{Action, ServerFilter, TargetStatus};
    use std::collections::{BTreeSet, HashSet};

    fn target(id: &str, name: &str, host: &str, env: &str) -> Target {
        Target {
            id: id.into(),
            name: name.into(),
            host: host.into(),
            port: 22,
            ssh_users: vec![
                SshUser {
                    username: "ubuntu".into(),
                    key_name: "prod".into(),
                },
                SshUser {
                    username: "root".into(),
                    key_name: "prod".into(),
                },
            ],
            profile: "p1".into(),
            region: "r1".into(),
            status: TargetStatus::Running,
            tags: [("env".to_string(), env.to_string())].into(),
        }
    }

    fn staging_policy() -> Policy {
        Policy {
            name: "dev-staging".into(),
            users: BTreeSet::new(),
            groups: ["dev".to_string()].into(),
            filter: ServerFilter {
                tags: Some([("env".to_string(), "staging".to_string())].into()),
                ..Default::default()
            },
            actions: [Action::Login, Action::Connect].into(),
            expires_at: None,
        }
    }

    fn dev_user() -> User {
        User {
            name: "alice".into(),
            groups: ["dev".to_string()].into(),
            public_keys: vec![],
        }
    }

    fn snapshot() -> FleetSnapshot {
        FleetSnapshot::new(
            vec![
                target("i-1", "t1", "10.0.0.1", "staging"),
                target("i-2", "t2", "10.0.0.2", "prod"),
            ],
            HashSet::new(),
        )
    }

    #[test]
    fn test_menu_shows_only_policy_visible_targets() {
        let menu = TargetMenu::new(&snapshot(), &[staging_policy()], &dev_user(), Utc::now());
        assert_eq!(menu.len(), 1);
        assert_eq!(menu.page_targets()[0].name, "t1");

        let rendered = menu.render();
        assert!(rendered.contains("t1"));
        assert!(!rendered.contains("t2"));
    }

    #[test]
    fn test_menu_selection_resolves_first_registered_user() {
        let mut menu = TargetMenu::new(&snapshot(), &[staging_policy()], &dev_user(), Utc::now());
        match menu.handle_input("1") {
            MenuAction::Selected(target, ssh_user) => {
                assert_eq!(target.name, "t1");
                assert_eq!(ssh_user.username, "ubuntu");
            }
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[test]
    fn test_menu_search_by_name_host_and_tag() {
        let policies = vec![Policy {
            filter: ServerFilter::default(),
            ..staging_policy()
        }];
        let mut menu = TargetMenu::new(&snapshot(), &policies, &dev_user(), Utc::now());
        assert_eq!(menu.len(), 2);

        menu.handle_input("/t2");
        assert_eq!(menu.len(), 1);
        assert_eq!(menu.page_targets()[0].name, "t2");

        menu.handle_input("/10.0.0.1");
        assert_eq!(menu.page_targets()[0].name, "t1");

        menu.handle_input("/prod");
        assert_eq!(menu.page_targets()[0].name, "t2");

        // Empty search resets.
        menu.handle_input("/");
        assert_eq!(menu.len(), 2);
    }

    #[test]
    fn test_menu_rejects_out_of_range_selection() {
        let mut menu = TargetMenu::new(&snapshot(), &[staging_policy()], &dev_user(), Utc::now());
        assert!(matches!(menu.handle_input("7"), MenuAction::Invalid(_)));
        assert!(matches!(menu.handle_input("zero"), MenuAction::Invalid(_)));
        assert!(matches!(menu.handle_input("q"), MenuAction::Quit));
    }

    #[test]
    fn test_direct_identifier_denied_by_policy() {
        let result = resolve_direct(
            &snapshot(),
            &[staging_policy()],
            &dev_user(),
            "10.0.0.2",
            Utc::now(),
        );
        assert!(matches!(result, Err(RelayError::PolicyDenied { .. })));
    }

    #[test]
    fn test_direct_identifier_unknown_host() {
        let result = resolve_direct(
            &snapshot(),
            &[staging_policy()],
            &dev_user(),
            "10.9.9.9",
            Utc::now(),
        );
        assert!(matches!(result, Err(RelayError::TargetNotFound(_))));
    }

    #[test]
    fn test_scp_destination_with_explicit_user() {
        let dest = resolve_scp_destination(&snapshot(), "root@10.0.0.1:/data/x.zip").unwrap();
        assert_eq!(dest.target.name, "t1");
        assert_eq!(dest.ssh_user.username, "root");
        assert_eq!(dest.remote_path, "/data/x.zip");
    }

    #[test]
    fn test_scp_destination_defaults_to_first_user() {
        let dest = resolve_scp_destination(&snapshot(), "10.0.0.1:/tmp/hello.txt").unwrap();
        assert_eq!(dest.ssh_user.username, "ubuntu");
    }

    #[test]
    fn test_scp_destination_rejects_unknown_pieces() {
        assert!(resolve_scp_destination(&snapshot(), "10.9.9.9:/tmp/x").is_err());
        assert!(resolve_scp_destination(&snapshot(), "admin@10.0.0.1:/tmp/x").is_err());
        assert!(resolve_scp_destination(&snapshot(), "not-a-destination").is_err());
        assert!(resolve_scp_destination(&snapshot(), ":/tmp/x").is_err());
    }
}
