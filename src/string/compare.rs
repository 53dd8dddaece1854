//! Orderings over UTF-16 code unit slices.
//!
//! Case-insensitive order folds every unit with `lower(upper(c))`, using
//! single-character case mappings only. Units whose mapping is not one BMP
//! unit (and surrogates) fold to themselves.

use std::cmp::Ordering;

pub fn fold_case(c: u16) -> u16 {
    let up = map_single(c, |ch| {
        let mut it = ch.to_uppercase();
        match (it.next(), it.next()) {
            (Some(u), None) => Some(u),
            _ => None,
        }
    });
    map_single(up, |ch| {
        let mut it = ch.to_lowercase();
        match (it.next(), it.next()) {
            (Some(l), None) => Some(l),
            _ => None,
        }
    })
}

fn map_single(c: u16, f: impl Fn(char) -> Option<char>) -> u16 {
    let Some(ch) = char::from_u32(u32::from(c)) else {
        return c;
    };
    match f(ch) {
        Some(m) if (m as u32) <= 0xffff => m as u32 as u16,
        _ => c,
    }
}

fn unit_cmp(a: u16, b: u16, case_sensitive: bool) -> Ordering {
    if case_sensitive || a == b {
        a.cmp(&b)
    } else {
        fold_case(a).cmp(&fold_case(b))
    }
}

pub fn compare(a: &[u16], b: &[u16], case_sensitive: bool) -> Ordering {
    if case_sensitive {
        return a.cmp(b);
    }
    for (&x, &y) in a.iter().zip(b.iter()) {
        let o = unit_cmp(x, y, false);
        if o != Ordering::Equal {
            return o;
        }
    }
    a.len().cmp(&b.len())
}

/// `Equal` when `s` starts with `prefix`.
pub fn compare_prefix(s: &[u16], prefix: &[u16], case_sensitive: bool) -> Ordering {
    for (&x, &y) in s.iter().zip(prefix.iter()) {
        let o = unit_cmp(x, y, case_sensitive);
        if o != Ordering::Equal {
            return o;
        }
    }
    if s.len() < prefix.len() {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

/// Case-insensitive order, ties broken by the case-sensitive one.
pub fn compare_compatible_with_ignore_case(a: &[u16], b: &[u16]) -> Ordering {
    let mut sensitive = Ordering::Equal;
    for (&x, &y) in a.iter().zip(b.iter()) {
        if x != y {
            let o = unit_cmp(x, y, false);
            if o != Ordering::Equal {
                return o;
            }
            if sensitive == Ordering::Equal {
                sensitive = x.cmp(&y);
            }
        }
    }
    a.len().cmp(&b.len()).then(sensitive)
}

/// 32-bit polynomial hash, `h = 31 * h + unit`.
pub fn string_hash(chars: &[u16]) -> i32 {
    chars
        .iter()
        .fold(0i32, |h, &c| h.wrapping_mul(31).wrapping_add(i32::from(c)))
}
