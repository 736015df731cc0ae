/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use wildmatch::WildMatch;

/// Compiled `federation.blocked` list.
#[derive(Debug, Clone, Default)]
pub struct Defederation {
    patterns: Vec<WildMatch>,
}

impl Defederation {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .map(|p| p.trim().trim_end_matches('.').to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .map(|p| WildMatch::new(&p))
                .collect(),
        }
    }

    /// Glob match, not substring: `bad.example` does not block `notbad.example`.
    pub fn is_defederated(&self, hostname: &str) -> bool {
        let host = hostname.trim().trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return false;
        }
        self.patterns.iter().any(|p| p.matches(&host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(p: &[&str]) -> Defederation {
        Defederation::new(&p.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn exact_host() {
        let f = filter(&["bad.example"]);
        assert!(f.is_defederated("bad.example"));
        assert!(f.is_defederated("BAD.example."));
        assert!(!f.is_defederated("notbad.example"));
        assert!(!f.is_defederated("bad.example.org"));
    }

    #[test]
    fn wildcard_subdomains() {
        let f = filter(&["*.spam.example"]);
        assert!(f.is_defederated("a.spam.example"));
        assert!(f.is_defederated("a.b.spam.example"));
        assert!(!f.is_defederated("spam.example"));
    }

    #[test]
    fn single_char_and_port() {
        let f = filter(&["node?.example", "host.example:*"]);
        assert!(f.is_defederated("node1.example"));
        assert!(!f.is_defederated("node12.example"));
        assert!(f.is_defederated("host.example:8443"));
    }

    #[test]
    fn empty_host_and_empty_list() {
        assert!(!filter(&["*"]).is_defederated(""));
        assert!(!filter(&[]).is_defederated("anything.example"));
        assert!(!filter(&["", "  "]).is_defederated("anything.example"));
    }
}
