//! Distinguished name helpers.
//!
//! These are deliberately small: the engine never needs a full RFC 4514
//! parser, only the leftmost RDN (for labels) and parent/child comparisons.
//! Backslash escapes and quoted values are honoured when looking for the
//! RDN separator.

/// Splits `dn` at its first unescaped RDN separator (`,` or `;`).
///
/// Returns the leftmost RDN and, if present, the remainder (the parent DN).
#[must_use]
pub fn split_first(dn: &str) -> (&str, Option<&str>) {
    let mut escaped = false;
    let mut quoted = false;
    for (idx, c) in dn.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => quoted = !quoted,
            ',' | ';' if !quoted => return (dn[..idx].trim(), Some(dn[idx + 1..].trim())),
            _ => {}
        }
    }
    (dn.trim(), None)
}

/// Returns the leftmost RDN of `dn`, e.g. `ou=people` for
/// `ou=people,dc=example,dc=com`.
#[must_use]
pub fn leftmost_rdn(dn: &str) -> &str {
    split_first(dn).0
}

/// Returns the parent DN, or `None` for a single-RDN (or empty) DN.
#[must_use]
pub fn parent(dn: &str) -> Option<&str> {
    split_first(dn).1
}

/// Normalizes a DN for comparison: lower-cased, with whitespace around
/// separators and `=` removed.
#[must_use]
pub fn normalize(dn: &str) -> String {
    let mut parts = Vec::new();
    let mut rest = Some(dn);
    while let Some(current) = rest {
        if current.is_empty() {
            break;
        }
        let (rdn, tail) = split_first(current);
        let rdn = match rdn.split_once('=') {
            Some((attr, value)) => format!("{}={}", attr.trim(), value.trim()),
            None => rdn.to_string(),
        };
        parts.push(rdn.to_lowercase());
        rest = tail;
    }
    parts.join(",")
}

/// Returns `true` when `child` is an immediate child of `parent_dn`.
#[must_use]
pub fn is_child_of(child: &str, parent_dn: &str) -> bool {
    match parent(child) {
        Some(p) => normalize(p) == normalize(parent_dn),
        None => parent_dn.trim().is_empty() && !child.trim().is_empty(),
    }
}

/// Returns `true` when `dn` equals `ancestor` or lies anywhere below it.
#[must_use]
pub fn is_within(dn: &str, ancestor: &str) -> bool {
    let ancestor = normalize(ancestor);
    if ancestor.is_empty() {
        return true;
    }
    let dn = normalize(dn);
    dn == ancestor || dn.ends_with(&format!(",{ancestor}"))
}
