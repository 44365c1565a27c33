//! Per-principal namespacing for vector tags and chain tags.
//!
//! The vector canister is not principal-aware, so isolation is encoded in
//! the tag itself: entries written by principal `P` carry the tag `P|tags`,
//! and search results are post-filtered on that prefix. On chain, the
//! principal rides as a trailing `principal:P` segment of the tags string.

use crate::error::GatewayError;

/// Separator between principal and tag list inside a vector-store tag.
pub const VECTOR_SEPARATOR: char = '|';
/// Prefix of the principal segment inside a chain tags string.
pub const CHAIN_PRINCIPAL_PREFIX: &str = "principal:";

/// `P|tags` when a principal is present, plain `tags` otherwise.
pub fn scope_vector_tag(principal: Option<&str>, tags: &str) -> String {
    match principal {
        Some(p) => format!("{}{}{}", p, VECTOR_SEPARATOR, tags),
        None => tags.to_string(),
    }
}

/// `tags,principal:P` when a principal is present, plain `tags` otherwise.
pub fn scope_chain_tags(principal: Option<&str>, tags: &str) -> String {
    match principal {
        Some(p) if tags.is_empty() => format!("{}{}", CHAIN_PRINCIPAL_PREFIX, p),
        Some(p) => format!("{},{}{}", tags, CHAIN_PRINCIPAL_PREFIX, p),
        None => tags.to_string(),
    }
}

/// Ownership predicate for search hits. Without a principal every hit is
/// visible; with one, the hit's scoped tag must carry the `P|` prefix.
pub fn is_owned_by(scoped_tag: &str, principal: Option<&str>) -> bool {
    match principal {
        None => true,
        Some(p) => scoped_tag
            .strip_prefix(p)
            .map(|rest| rest.starts_with(VECTOR_SEPARATOR))
            .unwrap_or(false),
    }
}

/// Splits a scoped vector tag back into `(principal, tags)`.
pub fn split_scoped_tag(scoped: &str) -> (Option<&str>, &str) {
    match scoped.split_once(VECTOR_SEPARATOR) {
        Some((principal, tags)) if !principal.is_empty() => (Some(principal), tags),
        _ => (None, scoped),
    }
}

/// Defensive superset of the identity provider's token grammar: non-empty,
/// and free of the characters that would break either tag encoding.
pub fn validate_principal(principal: &str) -> bool {
    !principal.is_empty()
        && !principal.contains(VECTOR_SEPARATOR)
        && !principal.contains(',')
        && !principal.chars().any(char::is_whitespace)
}

/// Validates an optional principal from a request, normalizing to `Option`.
pub fn checked_principal(principal: Option<&str>) -> Result<Option<&str>, GatewayError> {
    match principal {
        None => Ok(None),
        Some(p) => {
            if validate_principal(p) {
                Ok(Some(p))
            } else {
                Err(GatewayError::bad_request(
                    "principal must be non-empty and contain no '|', ',' or whitespace",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_tag_prefixes_principal() {
        assert_eq!(scope_vector_tag(Some("userA"), "pets,cats"), "userA|pets,cats");
        assert_eq!(scope_vector_tag(None, "pets,cats"), "pets,cats");
    }

    #[test]
    fn chain_tags_append_principal_segment() {
        assert_eq!(
            scope_chain_tags(Some("userA"), "ml,research"),
            "ml,research,principal:userA"
        );
        assert_eq!(scope_chain_tags(None, "ml"), "ml");
        assert_eq!(scope_chain_tags(Some("userA"), ""), "principal:userA");
    }

    #[test]
    fn ownership_requires_exact_prefix() {
        assert!(is_owned_by("userA|pets", Some("userA")));
        assert!(!is_owned_by("userB|pets", Some("userA")));
        // "userAB|..." must not match "userA"
        assert!(!is_owned_by("userAB|pets", Some("userA")));
        assert!(!is_owned_by("pets", Some("userA")));
    }

    #[test]
    fn absent_principal_sees_everything() {
        assert!(is_owned_by("userA|pets", None));
        assert!(is_owned_by("pets", None));
    }

    #[test]
    fn scope_then_split_round_trips() {
        let scoped = scope_vector_tag(Some("userA"), "pets,cats");
        assert_eq!(split_scoped_tag(&scoped), (Some("userA"), "pets,cats"));
        assert_eq!(split_scoped_tag("pets,cats"), (None, "pets,cats"));
    }

    #[test]
    fn principal_grammar_is_enforced() {
        assert!(validate_principal("userA"));
        assert!(validate_principal("w3gef-xyz-123"));
        assert!(!validate_principal(""));
        assert!(!validate_principal("user|A"));
        assert!(!validate_principal("user,A"));
        assert!(!validate_principal("user A"));
        assert!(!validate_principal("user\tA"));
    }

    #[test]
    fn checked_principal_maps_to_bad_request() {
        assert_eq!(checked_principal(None).unwrap(), None);
        assert_eq!(checked_principal(Some("userA")).unwrap(), Some("userA"));
        let err = checked_principal(Some("user|A")).unwrap_err();
        assert_eq!(err.kind(), "KindBadRequest");
    }
}
