//! Collection naming
//!
//! Logical collection names are case-folded, namespaced with the root prefix
//! (`<prefix>_<name>`) and checked against the store's database naming rule
//! `^[a-z][a-z0-9_$()+-]{0,254}$`. Colons become underscores and dots become
//! hyphens before the check, so DID-like names survive.

use crate::error::{EnclaveError, Result};

/// Maximum database name length accepted by the store
pub const MAX_NAME_LEN: usize = 255;

/// Case-fold and substitute separators without validating
pub fn normalize(name: &str) -> String {
    name.to_lowercase().replace(':', "_").replace('.', "-")
}

/// Check an already-normalized name against the naming rule
pub fn validate(name: &str) -> Result<()> {
    let mut chars = name.chars();

    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase());
    let rest_ok = chars.all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '$' | '(' | ')' | '+' | '-')
    });

    if !first_ok || !rest_ok || name.len() > MAX_NAME_LEN {
        return Err(EnclaveError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Normalize then validate, returning the physical name
pub fn resolve(name: &str) -> Result<String> {
    let normalized = normalize(name);
    validate(&normalized)?;
    Ok(normalized)
}

/// Build the physical name for a logical collection under a root prefix
pub fn prefixed(prefix: &str, logical: &str) -> Result<String> {
    if logical.is_empty() {
        return Err(EnclaveError::InvalidName(logical.to_string()));
    }
    if prefix.is_empty() {
        return resolve(logical);
    }
    resolve(&format!("{}_{}", prefix, logical))
}

/// Strip the root prefix from a physical name, if it belongs to that root
pub fn strip_prefix<'a>(prefix: &str, physical: &'a str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(physical);
    }
    let normalized_prefix = normalize(prefix);
    physical
        .strip_prefix(normalized_prefix.as_str())
        .and_then(|rest| rest.strip_prefix('_'))
        .filter(|rest| !rest.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert_eq!(resolve("cars").unwrap(), "cars");
        assert_eq!(resolve("Cars").unwrap(), "cars");
        assert_eq!(resolve("a$b(c)+d-e_f9").unwrap(), "a$b(c)+d-e_f9");
    }

    #[test]
    fn test_separators_are_substituted() {
        assert_eq!(
            resolve("did:ssi:name:vault.domain").unwrap(),
            "did_ssi_name_vault-domain"
        );
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(resolve("Invalid Name!"), Err(EnclaveError::InvalidName(_))));
        assert!(resolve("9lives").is_err());
        assert!(resolve("_private").is_err());
        assert!(resolve("").is_err());
        assert!(resolve(&"a".repeat(256)).is_err());
        assert!(resolve(&"a".repeat(255)).is_ok());
    }

    #[test]
    fn test_prefixed() {
        assert_eq!(prefixed("hub", "Cars").unwrap(), "hub_cars");
        assert_eq!(prefixed("", "cars").unwrap(), "cars");
        assert!(prefixed("hub", "").is_err());
        assert!(prefixed("hub", "bad name").is_err());
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("hub", "hub_cars"), Some("cars"));
        assert_eq!(strip_prefix("hub", "other_cars"), None);
        assert_eq!(strip_prefix("hub", "hub_"), None);
        assert_eq!(strip_prefix("", "cars"), Some("cars"));
    }
}
