//! Name validation for Systems, Services, namespaces and VM name components.
//!
//! Adapted from the RFC-1123/1035 matchers used across the Kubernetes
//! ecosystem: a lazily-compiled regex plus an explicit, accumulating list of
//! human-readable violations rather than a single bail-on-first-error check.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum length of a System, Service or namespace-component name.
pub const MAX_NAME_LENGTH: usize = 15;

const NAME_FMT: &str = "[a-z]([-a-z0-9]*[a-z0-9])?";
const NAME_ERR_MSG: &str =
    "name must start with a lowercase letter, contain only lowercase alphanumerics and single hyphens, and end with an alphanumeric character";

static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{NAME_FMT}$")).expect("failed to compile name regex"));

static DOUBLE_HYPHEN: &str = "--";

const RESERVED_NAMES: &[&str] = &["default", "system", "admin", "root", "internal"];
const RESERVED_PREFIXES: &[&str] = &["kube-", "kubevirt-shepherd-"];

/// Returns the set of violations for `value`, or an empty vec if it is valid.
///
/// A name must:
/// - start with a lowercase letter,
/// - contain only lowercase alphanumerics and single hyphens,
/// - not contain a `--` sequence,
/// - end with an alphanumeric character,
/// - be no longer than [`MAX_NAME_LENGTH`],
/// - not be in the reserved name set, and not start with a reserved prefix.
pub fn validate_name(value: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if value.len() > MAX_NAME_LENGTH {
        errors.push(format!("must be no more than {MAX_NAME_LENGTH} characters"));
    }

    if !NAME_REGEX.is_match(value) {
        errors.push(format!("{NAME_ERR_MSG} (e.g. 'shop', 'redis-01')"));
    }

    if value.contains(DOUBLE_HYPHEN) {
        errors.push("must not contain a '--' sequence".to_string());
    }

    if RESERVED_NAMES.contains(&value) {
        errors.push(format!("'{value}' is a reserved name"));
    }

    if RESERVED_PREFIXES
        .iter()
        .any(|prefix| value.starts_with(prefix))
    {
        errors.push(format!(
            "must not start with a reserved prefix ({})",
            RESERVED_PREFIXES.join(", ")
        ));
    }

    errors
}

/// Returns `Ok(())` if `value` satisfies [`validate_name`], or the first
/// violation as an `Err` otherwise. Convenience wrapper for call sites that
/// only need a single error message.
pub fn is_valid_name(value: &str) -> Result<(), String> {
    let errors = validate_name(value);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Composes the canonical generated VM name `{namespace}-{system}-{service}-{index}`.
pub fn compose_vm_name(namespace: &str, system: &str, service: &str, index: u64) -> String {
    format!("{namespace}-{system}-{service}-{index}")
}

/// The components a generated VM name decomposes into.
///
/// Because each of `namespace`, `system` and `service` is itself a
/// hyphen-containing [`validate_name`]-conformant string, splitting the
/// concatenated name back into its parts by scanning for `-` is ambiguous in
/// general (`"prod-shop-shop-redis-7"` could be `(prod, shop, shop-redis, 7)`
/// or `(prod-shop, shop, redis, 7)`). Shepherd does not attempt to recover
/// these components from the string alone: the VM row persists
/// `service_id` (and, transitively through the Service, `system_id`) at
/// creation time, and that stored identity — not string-splitting — is the
/// authoritative way to answer "what System/Service does this VM belong
/// to". `index` alone can always be recovered, since it is the final
/// `-`-delimited segment and is always purely numeric.
pub fn trailing_instance_index(name: &str) -> Option<u64> {
    let (_, index_str) = name.rsplit_once('-')?;
    index_str.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("shop")]
    #[case("redis-01")]
    #[case("a")]
    #[case("a1-b2-c3")]
    fn accepts_valid_names(#[case] name: &str) {
        assert!(validate_name(name).is_empty(), "expected {name} to be valid");
    }

    #[rstest]
    #[case("Shop", "must start lowercase")]
    #[case("-shop", "must not start with hyphen")]
    #[case("shop-", "must not end with hyphen")]
    #[case("sh--op", "must not contain double hyphen")]
    #[case("this-name-is-too-long-for-sure", "must respect length cap")]
    #[case("default", "must reject reserved name")]
    #[case("kube-system", "must reject reserved prefix")]
    #[case("kubevirt-shepherd-internal", "must reject reserved prefix")]
    fn rejects_invalid_names(#[case] name: &str, #[case] why: &str) {
        assert!(!validate_name(name).is_empty(), "{why}: {name}");
    }

    #[test]
    fn vm_name_composes_the_documented_shape() {
        let name = compose_vm_name("prod-shop", "shop", "redis", 7);
        assert_eq!(name, "prod-shop-shop-redis-7");
        assert_eq!(trailing_instance_index(&name), Some(7));
    }

    #[test]
    fn trailing_index_rejects_non_numeric_suffix() {
        assert_eq!(trailing_instance_index("prod-shop-shop-redis-seven"), None);
    }
}
