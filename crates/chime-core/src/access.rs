//! Allow/block user filter.
//!
//! The command layer runs every sender through [`AccessFilter::allows`]
//! before invoking the reminder manager. Policy beyond this predicate is
//! out of scope for the scheduling core.

use crate::config::{AccessConfig, AccessListConfig};
use crate::error::ChimeError;
use regex::Regex;
use std::fmt;

/// Compiled allow/block lists of user-id patterns.
#[derive(Debug)]
pub struct AccessFilter {
    allowlist: Option<Vec<Regex>>,
    blocklist: Option<Vec<Regex>>,
}

impl AccessFilter {
    /// Compile the configured pattern lists. Invalid patterns fail fast.
    pub fn new(config: &AccessConfig) -> Result<Self, ChimeError> {
        Ok(Self {
            allowlist: compile_list(&config.allowlist, "allowlist")?,
            blocklist: compile_list(&config.blocklist, "blocklist")?,
        })
    }

    /// Whether `user_id` may create reminders. The blocklist wins over the
    /// allowlist; with no allowlist enabled, everyone not blocked is allowed.
    pub fn allows(&self, user_id: &str) -> bool {
        if let Some(blocklist) = &self.blocklist {
            if blocklist.iter().any(|re| re.is_match(user_id)) {
                return false;
            }
        }
        match &self.allowlist {
            Some(allowlist) => allowlist.iter().any(|re| re.is_match(user_id)),
            None => true,
        }
    }
}

impl fmt::Display for AccessFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let describe = |list: &Option<Vec<Regex>>| match list {
            Some(patterns) => format!("{} pattern(s)", patterns.len()),
            None => "disabled".to_string(),
        };
        write!(
            f,
            "allowlist {}, blocklist {}",
            describe(&self.allowlist),
            describe(&self.blocklist)
        )
    }
}

fn compile_list(
    list: &AccessListConfig,
    which: &str,
) -> Result<Option<Vec<Regex>>, ChimeError> {
    if !list.enabled {
        return Ok(None);
    }
    list.regexes
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| {
                ChimeError::Config(format!("invalid {which} pattern '{pattern}': {e}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(
        allow: Option<Vec<&str>>,
        block: Option<Vec<&str>>,
    ) -> AccessConfig {
        let to_list = |patterns: Option<Vec<&str>>| AccessListConfig {
            enabled: patterns.is_some(),
            regexes: patterns
                .unwrap_or_default()
                .into_iter()
                .map(String::from)
                .collect(),
        };
        AccessConfig {
            allowlist: to_list(allow),
            blocklist: to_list(block),
        }
    }

    #[test]
    fn everything_allowed_by_default() {
        let filter = AccessFilter::new(&config(None, None)).unwrap();
        assert!(filter.allows("@anyone:example.org"));
    }

    #[test]
    fn allowlist_restricts_to_matches() {
        let filter =
            AccessFilter::new(&config(Some(vec![r"@.*:example\.org"]), None)).unwrap();
        assert!(filter.allows("@alice:example.org"));
        assert!(!filter.allows("@mallory:evil.net"));
    }

    #[test]
    fn blocklist_wins_over_allowlist() {
        let filter = AccessFilter::new(&config(
            Some(vec![r"@.*:example\.org"]),
            Some(vec![r"@mallory:.*"]),
        ))
        .unwrap();
        assert!(filter.allows("@alice:example.org"));
        assert!(!filter.allows("@mallory:example.org"));
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let err = AccessFilter::new(&config(Some(vec!["(unclosed"]), None)).unwrap_err();
        assert!(matches!(err, ChimeError::Config(_)));
    }
}
