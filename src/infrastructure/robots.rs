//! robots.txt directives, cached per host.
//!
//! Parsing and matching (groups, `Allow` precedence, `*` and `$` patterns)
//! come from `texting_robots`; this module only adds the allow-all fallback
//! and the per-origin cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use texting_robots::Robot;
use tracing::warn;

/// Product token matched against `User-agent` lines. The browser strings the
/// fetcher rotates through name no crawler, so the rules are resolved once
/// for this token and fall back to the `*` group.
pub const ROBOTS_AGENT: &str = "genshin-data-sync";

/// Rules of one host for [`ROBOTS_AGENT`].
pub struct RobotsRules {
    robot: Option<Robot>,
}

impl std::fmt::Debug for RobotsRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotsRules")
            .field("allow_all", &self.robot.is_none())
            .finish()
    }
}

impl RobotsRules {
    #[must_use]
    pub fn allow_all() -> Self {
        Self { robot: None }
    }

    /// A file that cannot be parsed allows everything.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        match Robot::new(ROBOTS_AGENT, content.as_bytes()) {
            Ok(robot) => Self { robot: Some(robot) },
            Err(err) => {
                warn!("unparseable robots.txt, assuming allowed: {}", err);
                Self::allow_all()
            }
        }
    }

    /// `target` is either a full URL or its path plus query.
    #[must_use]
    pub fn is_allowed(&self, target: &str) -> bool {
        self.robot.as_ref().is_none_or(|robot| robot.allowed(target))
    }
}

/// Parsed rules keyed by `scheme://host[:port]`.
#[derive(Debug, Default)]
pub struct RobotsCache {
    hosts: Mutex<HashMap<String, Arc<RobotsRules>>>,
}

impl RobotsCache {
    #[must_use]
    pub fn get(&self, origin: &str) -> Option<Arc<RobotsRules>> {
        self.hosts.lock().ok()?.get(origin).cloned()
    }

    pub fn insert(&self, origin: &str, rules: RobotsRules) -> Arc<RobotsRules> {
        let rules = Arc::new(rules);
        if let Ok(mut hosts) = self.hosts.lock() {
            hosts.insert(origin.to_string(), Arc::clone(&rules));
        }
        rules
    }
}
