//! Path classification for the synced subtree.
//!
//! Every path the syncer touches is first run through the [`PathPolicy`],
//! which decides whether it is excluded from mirroring, part of the include
//! set, or the first-sync marker. Paths are always relative and use forward
//! slashes; callers join the scope prefix before asking.

use glob::Pattern;

/// Suffix of the first-sync marker file. Paths carrying it are never
/// mirrored, deleted, or watched.
pub const MARKER_SUFFIX: &str = ".custom.sync";

/// Classifies relative paths against the configured exclude/include patterns.
///
/// Patterns without `**` match by glob on the whole relative path, or by
/// literal prefix. Patterns containing `**` are recursive: a trailing `/`
/// means "any path containing the remainder", no trailing `/` means "any
/// path ending with the remainder, or containing `<remainder>/`".
#[derive(Debug, Clone, Default)]
pub struct PathPolicy {
    exclude: Vec<String>,
    include: Vec<String>,
}

impl PathPolicy {
    pub fn new(exclude: Vec<String>, include: Vec<String>) -> Self {
        Self { exclude, include }
    }

    /// Whether the relative path is the first-sync marker.
    pub fn is_marker(rel: &str) -> bool {
        rel.ends_with(MARKER_SUFFIX)
    }

    /// Whether the relative path is excluded from mirroring.
    ///
    /// The marker file is always excluded, regardless of patterns.
    pub fn is_excluded(&self, rel: &str) -> bool {
        if Self::is_marker(rel) {
            return true;
        }

        for pattern in &self.exclude {
            if pattern.contains("**") {
                if matches_recursive(rel, pattern) {
                    return true;
                }
            } else {
                let glob_match = Pattern::new(pattern)
                    .map(|p| p.matches(rel))
                    .unwrap_or(false);
                if glob_match || rel.starts_with(pattern.as_str()) {
                    return true;
                }
            }
        }
        false
    }

    /// Whether the relative path matches the include set. An empty include
    /// list means everything not excluded is included.
    pub fn is_included(&self, rel: &str) -> bool {
        if self.include.is_empty() {
            return true;
        }

        for pattern in &self.include {
            let glob_match = Pattern::new(pattern)
                .map(|p| p.matches(rel))
                .unwrap_or(false);
            if glob_match || rel.contains(pattern.as_str()) {
                return true;
            }
        }
        false
    }
}

/// Match a path against a `**` pattern.
///
/// `**/node_modules/` matches any path containing `/node_modules/`;
/// `**/node_modules` matches any path ending with `/node_modules` or
/// containing `node_modules/` deeper in.
fn matches_recursive(path: &str, pattern: &str) -> bool {
    let remainder = pattern.replace("**", "");

    if remainder.ends_with('/') {
        path.contains(&remainder)
    } else {
        path.ends_with(&remainder) || path.contains(&format!("{}/", remainder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(exclude: &[&str]) -> PathPolicy {
        PathPolicy::new(exclude.iter().map(|s| s.to_string()).collect(), vec![])
    }

    #[test]
    fn test_marker_is_always_excluded() {
        let p = policy(&[]);
        assert!(PathPolicy::is_marker(".custom.sync"));
        assert!(PathPolicy::is_marker("User/.custom.sync"));
        assert!(p.is_excluded(".custom.sync"));
        assert!(p.is_excluded("User/.custom.sync"));
    }

    #[test]
    fn test_marker_implies_excluded() {
        // is_marker(p) => is_excluded(p), for any pattern set
        let p = policy(&["User/globalStorage/**"]);
        for rel in ["a/.custom.sync", ".custom.sync", "deep/ly/nested/.custom.sync"] {
            assert!(PathPolicy::is_marker(rel));
            assert!(p.is_excluded(rel));
        }
    }

    #[test]
    fn test_literal_prefix_match() {
        let p = policy(&["User/workspaceStorage"]);
        assert!(p.is_excluded("User/workspaceStorage"));
        assert!(p.is_excluded("User/workspaceStorage/abc/state.json"));
        assert!(!p.is_excluded("User/settings.json"));
    }

    #[test]
    fn test_glob_match() {
        let p = policy(&["User/*.log"]);
        assert!(p.is_excluded("User/output.log"));
        assert!(!p.is_excluded("User/settings.json"));
    }

    #[test]
    fn test_recursive_pattern_with_trailing_slash() {
        let p = policy(&["**/node_modules/"]);
        assert!(p.is_excluded("User/ext/node_modules/pkg/index.js"));
        assert!(!p.is_excluded("User/ext/src/index.js"));
    }

    #[test]
    fn test_recursive_pattern_without_trailing_slash() {
        let p = policy(&["**/node_modules"]);
        // ends with remainder
        assert!(p.is_excluded("User/ext/node_modules"));
        // contains remainder as a directory
        assert!(p.is_excluded("User/ext/node_modules/pkg/index.js"));
        assert!(!p.is_excluded("User/ext/node_modules_backup.txt"));
    }

    #[test]
    fn test_empty_include_matches_all() {
        let p = PathPolicy::new(vec![], vec![]);
        assert!(p.is_included("User/anything.json"));
    }

    #[test]
    fn test_include_patterns() {
        let p = PathPolicy::new(vec![], vec!["User/snippets".to_string()]);
        assert!(p.is_included("User/snippets/js.json"));
        assert!(!p.is_included("User/settings.json"));
    }
}
