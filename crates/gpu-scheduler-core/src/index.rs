//! Pod ordinal resolution from naming conventions.
//!
//! StatefulSet replicas are named `<set>-<ordinal>`. Resolution scans the
//! hyphen-separated tokens of a name from the end and takes the first one made
//! entirely of ASCII digits, so `gpu-scheduler-check-3` resolves to `3`. A name
//! with no hyphen is a single token, which covers names that are wholly numeric.

/// Resolve the ordinal encoded in a pod name.
///
/// Returns `None` when no token is numeric. Digit runs too large for a `u32`
/// are not treated as ordinals.
#[must_use]
pub fn resolve(pod_name: &str) -> Option<u32> {
    pod_name
        .split('-')
        .rev()
        .filter(|token| is_digits(token))
        .find_map(|token| token.parse().ok())
}

/// Resolve an ordinal, falling back to `default` when the name has none.
#[must_use]
pub fn resolve_or(pod_name: &str, default: u32) -> u32 {
    resolve(pod_name).unwrap_or(default)
}

fn is_digits(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}
