//! Field validation for catalog input.
//!
//! Email addresses must look like `local@domain.tld`:
//! - No whitespace anywhere
//! - Exactly one `@`, with a non-empty local part
//! - A domain containing a `.` with characters on both sides

use crate::error::{CatalogError, CatalogResult};

/// Trim a required text field, rejecting blank input.
pub fn required(field: &'static str, value: &str) -> CatalogResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::validation(field, "is required"));
    }
    Ok(trimmed.to_string())
}

/// Trim an optional text field; blank input counts as absent.
pub fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Normalize (trim, lower-case) and validate an email address.
///
/// # Examples
///
/// ```
/// use stacks_catalog::validate::normalize_email;
///
/// assert_eq!(normalize_email("  Ada@Example.ORG ").unwrap(), "ada@example.org");
/// assert!(normalize_email("ada@localhost").is_err());
/// assert!(normalize_email("no at sign").is_err());
/// ```
pub fn normalize_email(email: &str) -> CatalogResult<String> {
    let email = required("email", email)?.to_lowercase();

    if email.chars().any(char::is_whitespace) {
        return Err(CatalogError::validation("email", "must not contain whitespace"));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(CatalogError::validation("email", "must contain '@'"));
    };
    if local.is_empty() {
        return Err(CatalogError::validation("email", "local part is empty"));
    }
    if domain.contains('@') {
        return Err(CatalogError::validation("email", "must contain a single '@'"));
    }

    let has_inner_dot = domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len());
    if !has_inner_dot {
        return Err(CatalogError::validation("email", "domain must contain a '.'"));
    }

    Ok(email)
}

/// Copy counts are never negative.
pub fn copies(value: i64) -> CatalogResult<i64> {
    if value < 0 {
        return Err(CatalogError::validation("copies", format!("{value} is negative")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_trims_and_rejects_blank() {
        assert_eq!(required("title", "  Dune  ").unwrap(), "Dune");
        assert!(matches!(
            required("title", "   "),
            Err(CatalogError::Validation { field: "title", .. })
        ));
    }

    #[test]
    fn optional_drops_blank() {
        assert_eq!(optional(Some(" x ")), Some("x".to_string()));
        assert_eq!(optional(Some("  ")), None);
        assert_eq!(optional(None), None);
    }

    #[test]
    fn accepts_ordinary_addresses() {
        for email in ["a@b.co", "first.last@dept.uni.edu", "x+tag@mail.example.org"] {
            assert!(normalize_email(email).is_ok(), "{email} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_addresses() {
        for email in [
            "",
            "plain",
            "@example.org",
            "a@@example.org",
            "a@b@example.org",
            "a@.org",
            "a@example.",
            "a b@example.org",
        ] {
            assert!(normalize_email(email).is_err(), "{email} should be invalid");
        }
    }

    #[test]
    fn negative_copies_rejected() {
        assert_eq!(copies(0).unwrap(), 0);
        assert!(copies(-1).is_err());
    }
}
