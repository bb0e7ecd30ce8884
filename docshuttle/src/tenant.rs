//! Tenant-name normalization and matching.
//!
//! The Filing System shows the active tenant only as free text in its
//! header, so verification is a normalized substring comparison in
//! either direction ("Alrewas" vs "ALREWAS SURGERY"). Short or
//! overlapping tenant names can false-match; the heuristic is kept
//! because the UI offers nothing stronger.

/// Generic suffix words that tenants append inconsistently between the
/// Portal record and the Filing System header.
const GENERIC_SUFFIXES: &[&str] = &["practice", "surgery"];

/// Lowercase, strip punctuation, drop generic suffix words, collapse
/// whitespace.
pub fn normalize_tenant(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|word| !GENERIC_SUFFIXES.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Substring match in either direction on the normalized forms.
pub fn tenant_matches(requested: &str, active: &str) -> bool {
    let a = normalize_tenant(requested);
    let b = normalize_tenant(active);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}
