//! Target filters: the conjunction of axes shared by policies and shell
//! fan-out tasks.

use crate::model::Target;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Tag key carrying the environment classification of a target.
const ENV_TYPE_TAG: &str = "EnvType";
/// Tag key carrying the owning team of a target.
const TEAM_TAG: &str = "Team";

/// A conjunction over target axes. Every axis that is present must match;
/// an empty filter matches every target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerFilter {
    /// Name globs; at least one must match the target name.
    #[serde(default)]
    pub name: Option<Vec<String>>,
    /// Host addresses; the target host must be in the list.
    #[serde(default)]
    pub ip_addr: Option<Vec<String>>,
    /// Matches the target's `EnvType` tag.
    #[serde(default)]
    pub env_type: Option<String>,
    /// Matches the target's `Team` tag.
    #[serde(default)]
    pub team: Option<String>,
    /// Matches the discovery profile.
    #[serde(default)]
    pub profile: Option<String>,
    /// Matches the discovery region.
    #[serde(default)]
    pub region: Option<String>,
    /// Individual tag predicates, each must equal.
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
}

impl ServerFilter {
    /// Whether the filter matches the target. All specified axes must match.
    pub fn matches(&self, target: &Target) -> bool {
        if let Some(ips) = &self.ip_addr {
            if !ips.iter().any(|ip| ip == &target.host) {
                return false;
            }
        }
        if let Some(globs) = &self.name {
            if !globs.iter().any(|g| glob_matches(g, &target.name)) {
                return false;
            }
        }
        if let Some(env) = &self.env_type {
            if target.tags.get(ENV_TYPE_TAG) != Some(env) {
                return false;
            }
        }
        if let Some(team) = &self.team {
            if target.tags.get(TEAM_TAG) != Some(team) {
                return false;
            }
        }
        if let Some(profile) = &self.profile {
            if &target.profile != profile {
                return false;
            }
        }
        if let Some(region) = &self.region {
            if &target.region != region {
                return false;
            }
        }
        if let Some(tags) = &self.tags {
            for (key, value) in tags {
                if target.tags.get(key) != Some(value) {
                    return false;
                }
            }
        }
        true
    }

    /// Whether no axis is specified.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.ip_addr.is_none()
            && self.env_type.is_none()
            && self.team.is_none()
            && self.profile.is_none()
            && self.region.is_none()
            && self.tags.is_none()
    }
}

/// Match a single glob pattern against a name. Invalid patterns never match.
fn glob_matches(pattern: &str, name: &str) -> bool {
    match globset::Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(name),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Invalid name glob in filter");
            false
        }
    }
}
