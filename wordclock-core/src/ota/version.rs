//! Release version ordering.
//!
//! Only the leading numeric core (`1.2.0` of `1.2.0-rc.2`) is compared.
//! Anything after it counts as "different build": if the cores are equal but
//! the strings differ, the remote build is treated as newer so suffix-only
//! releases still roll out.

/// Leading dot-separated numeric components, stopping at the first character
/// that is neither a digit nor a dot
pub fn parse_version_core(version: &str) -> Vec<u32> {
    let mut parts = Vec::new();
    let mut current: u32 = 0;
    let mut in_number = false;

    for c in version.chars() {
        if let Some(d) = c.to_digit(10) {
            current = current.saturating_mul(10).saturating_add(d);
            in_number = true;
        } else if c == '.' {
            if in_number {
                parts.push(current);
                current = 0;
                in_number = false;
            }
        } else {
            break;
        }
    }
    if in_number {
        parts.push(current);
    }
    parts
}

pub fn is_version_newer(remote: &str, current: &str) -> bool {
    if remote == current {
        return false;
    }
    let a = parse_version_core(remote);
    let b = parse_version_core(current);
    let n = a.len().max(b.len());
    for i in 0..n {
        let av = a.get(i).copied().unwrap_or(0);
        let bv = b.get(i).copied().unwrap_or(0);
        if av != bv {
            return av > bv;
        }
    }
    true
}
