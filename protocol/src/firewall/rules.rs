//! ACL rules and tool-name patterns.

use serde::{Deserialize, Serialize};

use super::FirewallError;

/// Matches any peer, or any tool.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclAction {
    Allow,
    Deny,
}

/// One line of the access-control list.
///
/// Rules are evaluated in the order they were added and the first one that
/// matches decides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclRule {
    /// A literal DID or `*`.
    pub peer_did: String,
    pub action: AclAction,
    /// Tool name patterns (`*` matches any run of characters). Empty means
    /// every tool.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Calls per minute per peer. `0` is unlimited.
    #[serde(default)]
    pub rate_limit: u32,
}

impl AclRule {
    pub fn allow(peer_did: impl Into<String>, tools: &[&str]) -> Self {
        Self {
            peer_did: peer_did.into(),
            action: AclAction::Allow,
            tools: tools.iter().map(|t| t.to_string()).collect(),
            rate_limit: 0,
        }
    }

    pub fn deny(peer_did: impl Into<String>, tools: &[&str]) -> Self {
        Self {
            peer_did: peer_did.into(),
            action: AclAction::Deny,
            tools: tools.iter().map(|t| t.to_string()).collect(),
            rate_limit: 0,
        }
    }

    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit = per_minute;
        self
    }

    pub fn matches_peer(&self, peer_did: &str) -> bool {
        self.peer_did == WILDCARD || self.peer_did == peer_did
    }

    pub fn matches_tool(&self, tool: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|p| glob_match(p, tool))
    }

    pub fn matches(&self, peer_did: &str, tool: &str) -> bool {
        self.matches_peer(peer_did) && self.matches_tool(tool)
    }

    pub fn validate(&self) -> Result<(), FirewallError> {
        if self.peer_did.trim().is_empty() {
            return Err(FirewallError::InvalidRule("empty peer DID".into()));
        }
        for pattern in &self.tools {
            if pattern.is_empty() {
                return Err(FirewallError::InvalidRule("empty tool pattern".into()));
            }
            if pattern.chars().any(char::is_whitespace) {
                return Err(FirewallError::InvalidRule(format!(
                    "whitespace in tool pattern {pattern:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Glob match where `*` stands for any (possibly empty) run of characters.
/// Everything else is literal.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ni));
            pi += 1;
        } else if pi < p.len() && p[pi] == n[ni] {
            pi += 1;
            ni += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ni = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*", ""));
        assert!(glob_match("search", "search"));
        assert!(!glob_match("search", "search_web"));
        assert!(glob_match("search_*", "search_web"));
        assert!(glob_match("*_web", "search_web"));
        assert!(glob_match("s*h*b", "search_web"));
        assert!(!glob_match("s*x", "search_web"));
        assert!(!glob_match("", "x"));
    }

    #[test]
    fn test_rule_matching() {
        let rule = AclRule::allow("did:lango:aa", &["weather_*", "echo"]);
        assert!(rule.matches("did:lango:aa", "weather_today"));
        assert!(rule.matches("did:lango:aa", "echo"));
        assert!(!rule.matches("did:lango:aa", "shell"));
        assert!(!rule.matches("did:lango:bb", "echo"));

        let any = AclRule::deny(WILDCARD, &[]);
        assert!(any.matches("did:lango:zz", "whatever"));
    }

    #[test]
    fn test_validation() {
        assert!(AclRule::allow("did:lango:aa", &["x"]).validate().is_ok());
        assert!(AclRule::allow("", &["x"]).validate().is_err());
        assert!(AclRule::allow("did:lango:aa", &[""]).validate().is_err());
        assert!(AclRule::allow("did:lango:aa", &["two words"]).validate().is_err());
    }

    #[test]
    fn test_rule_serde() {
        let json = r#"{"peer_did":"*","action":"allow","tools":["echo"],"rate_limit":10}"#;
        let rule: AclRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule, AclRule::allow("*", &["echo"]).with_rate_limit(10));
        let bare: AclRule = serde_json::from_str(r#"{"peer_did":"*","action":"deny"}"#).unwrap();
        assert!(bare.tools.is_empty());
        assert_eq!(bare.rate_limit, 0);
    }
}
