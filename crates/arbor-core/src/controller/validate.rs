//! Input validation for mutating operations.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Validate a branch name against a safe character set.
pub fn validate_branch(branch: &str) -> Result<()> {
    if branch.is_empty() {
        return Err(invalid("branch name cannot be empty"));
    }
    if branch.starts_with('-') {
        return Err(invalid("branch name cannot start with a dash"));
    }
    if branch.contains("..") {
        return Err(invalid("branch name cannot contain '..'"));
    }
    if branch.starts_with('/') || branch.ends_with('/') || branch.ends_with(".lock") {
        return Err(invalid(format!("invalid branch name: {branch}")));
    }
    if !branch
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(invalid(format!(
            "branch name contains invalid characters: {branch}"
        )));
    }
    Ok(())
}

/// Validate the new final path segment of a rename.
pub fn validate_new_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid("new name cannot be empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid("new name cannot contain path separators"));
    }
    if name == "." || name == ".." {
        return Err(invalid(format!("'{name}' is not a valid name")));
    }
    if name.starts_with('-') {
        return Err(invalid("new name cannot start with a dash"));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid("new name contains control characters"));
    }
    Ok(())
}

/// The sibling of `path` whose final segment is `new_name`.
pub fn sibling_path(path: &Path, new_name: &str) -> Result<PathBuf> {
    path.parent()
        .map(|parent| parent.join(new_name))
        .ok_or_else(|| invalid(format!("{} has no parent directory", path.display())))
}

/// Turn a branch name into a single directory name.
pub fn sanitize_for_path(branch: &str) -> String {
    branch
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

/// Absolute form of a path that may not exist yet.
///
/// The deepest existing ancestor is canonicalized and the remaining
/// components are appended, so the result matches what git reports once
/// the directory is created.
pub fn normalize_target(path: &Path, base: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let mut missing = Vec::new();
    let mut current = absolute.as_path();
    loop {
        if let Ok(canonical) = std::fs::canonicalize(current) {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                current = parent;
            }
            _ => return absolute,
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ValidationFailed(message.into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn branch_accepts_valid() {
        assert!(validate_branch("feat-login").is_ok());
        assert!(validate_branch("feature/auth").is_ok());
        assert!(validate_branch("v1.2.3").is_ok());
        assert!(validate_branch("my_worktree").is_ok());
    }

    #[test]
    fn branch_rejects_traversal_and_flags() {
        assert!(validate_branch("").is_err());
        assert!(validate_branch("../etc/passwd").is_err());
        assert!(validate_branch("-f").is_err());
        assert!(validate_branch("topic.lock").is_err());
        assert!(validate_branch("foo bar").is_err());
        assert!(validate_branch("foo;bar").is_err());
    }

    #[test]
    fn new_name_rules() {
        assert!(validate_new_name("feature1-renamed").is_ok());
        assert!(validate_new_name("").is_err());
        assert!(validate_new_name("a/b").is_err());
        assert!(validate_new_name("a\\b").is_err());
        assert!(validate_new_name(".").is_err());
        assert!(validate_new_name("..").is_err());
    }

    #[test]
    fn sibling_keeps_parent() {
        assert_eq!(
            sibling_path(Path::new("/wt/repo/feature1"), "feature1-renamed").unwrap(),
            PathBuf::from("/wt/repo/feature1-renamed")
        );
        assert!(sibling_path(Path::new("/"), "x").is_err());
    }

    #[test]
    fn normalize_resolves_existing_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let canonical = std::fs::canonicalize(tmp.path()).unwrap();
        assert_eq!(
            normalize_target(Path::new("repo/feature"), tmp.path()),
            canonical.join("repo").join("feature")
        );
    }

    #[test]
    fn branch_becomes_one_segment() {
        assert_eq!(sanitize_for_path("feature/auth"), "feature-auth");
        assert_eq!(sanitize_for_path("/odd/"), "odd");
    }
}
