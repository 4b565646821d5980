use std::sync::LazyLock;

use regex::Regex;

use crate::error::AppError;

static PROJECT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").unwrap());

pub fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Project ids name a directory under the projects root, so only a
/// conservative character set is accepted.
pub fn require_project_id(value: &str) -> Result<(), AppError> {
    if !PROJECT_ID.is_match(value) {
        return Err(AppError::Validation(
            "projectId must be 1-128 characters of letters, digits, '-' or '_'".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_non_empty() {
        assert!(require_non_empty("prompt", "  ").is_err());
        assert!(require_non_empty("prompt", "hi").is_ok());
    }

    #[test]
    fn test_project_id_rules() {
        assert!(require_project_id("1700000000000-abc123xyz").is_ok());
        assert!(require_project_id("my_project").is_ok());
        for bad in ["", "..", "a/b", "a\\b", "a b", "é", &"x".repeat(129)] {
            assert!(require_project_id(bad).is_err(), "accepted {:?}", bad);
        }
    }
}
