// Copyright (C) 2026  promgate contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//! Path exclusion rules.

use regex::Regex;

use crate::error::ExporterError;

/// Compiled path-exclusion patterns.
///
/// Patterns are anchored at the start of the path and do not need to
/// consume all of it, so `/health` excludes `/health` and `/health/live`
/// but not `/api/health`.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    patterns: Vec<Regex>,
}

impl ExclusionRules {
    /// Compile a list of patterns. Fails on the first invalid pattern.
    pub fn compile<I, S>(patterns: I) -> Result<Self, ExporterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let anchored = format!("^(?:{pattern})");
            let regex = Regex::new(&anchored).map_err(|source| {
                ExporterError::InvalidExclusionPattern {
                    pattern: pattern.to_owned(),
                    source,
                }
            })?;
            compiled.push(regex);
        }
        Ok(Self { patterns: compiled })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_semantics() {
        let rules = ExclusionRules::compile(["/health", "/internal/.*/debug"]).unwrap();
        assert!(rules.matches("/health"));
        assert!(rules.matches("/health/live"));
        assert!(rules.matches("/internal/x/debug"));
        assert!(!rules.matches("/api/health"));
        assert!(!rules.matches("/internal/x"));
    }

    #[test]
    fn test_alternation_stays_anchored() {
        let rules = ExclusionRules::compile(["/a|/b"]).unwrap();
        assert!(rules.matches("/a"));
        assert!(rules.matches("/b"));
        assert!(!rules.matches("/c/a"));
    }

    #[test]
    fn test_empty_rules_match_nothing() {
        let rules = ExclusionRules::default();
        assert!(!rules.matches("/anything"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = ExclusionRules::compile(["("]).unwrap_err();
        assert!(matches!(err, ExporterError::InvalidExclusionPattern { .. }));
    }
}
