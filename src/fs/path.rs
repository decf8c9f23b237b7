//! Remote path helpers.

use crate::error::{MegaError, Result};

/// Normalize a path (remove trailing slashes, collapse `//`, force a leading `/`).
pub(crate) fn normalize_path(path: &str) -> String {
    let segments = segments(path);
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Non-empty `/`-separated components.
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Split into parent path and final component.
pub(crate) fn split_parent(path: &str) -> Result<(String, String)> {
    let mut parts = segments(path);
    let name = parts
        .pop()
        .ok_or_else(|| MegaError::InvalidArgument(format!("{:?} has no final component", path)))?;
    if parts.is_empty() {
        return Err(MegaError::InvalidArgument(format!(
            "{:?} names a root category",
            path
        )));
    }
    Ok((format!("/{}", parts.join("/")), name.to_string()))
}

/// Reject names that cannot be a single path component.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(MegaError::InvalidArgument(format!(
            "invalid node name {:?}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/foo"), "/foo");
        assert_eq!(normalize_path("/foo/"), "/foo");
        assert_eq!(normalize_path("/foo//bar"), "/foo/bar");
        assert_eq!(normalize_path("foo"), "/foo");
    }

    #[test]
    fn test_split_parent() {
        let (parent, name) = split_parent("/Root/a/b").unwrap();
        assert_eq!(parent, "/Root/a");
        assert_eq!(name, "b");
        assert!(split_parent("/Root").is_err());
        assert!(split_parent("/").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("report.pdf").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("..").is_err());
    }
}
