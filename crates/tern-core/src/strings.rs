//! Bootstrap string helpers
//!
//! Byte-level search and parsing used before any general-purpose string
//! library is available, e.g. while reading tuning variables at startup.

/// Index of the first occurrence of `needle` in `haystack`.
///
/// An empty needle matches at 0. Naive search.
pub fn index(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let Some(&first) = needle.first() else {
        return Some(0);
    };
    (0..haystack.len()).find(|&i| haystack[i] == first && has_prefix(&haystack[i..], needle))
}

/// Whether `s` starts with `prefix`.
#[inline]
pub fn has_prefix(s: &[u8], prefix: &[u8]) -> bool {
    s.len() >= prefix.len() && &s[..prefix.len()] == prefix
}

/// Value of the leading ASCII digits of `s`; zero when there are none.
///
/// No overflow detection: the accumulator wraps.
pub fn parse_leading_int(s: &[u8]) -> isize {
    let mut n: isize = 0;
    for &c in s.iter().take_while(|c| c.is_ascii_digit()) {
        n = n.wrapping_mul(10).wrapping_add((c - b'0') as isize);
    }
    n
}

#[cfg(kani)]
mod proofs {
    use super::*;

    /// Proof: a single digit followed by anything parses to that digit
    #[kani::proof]
    fn single_digit_prefix() {
        let d: u8 = kani::any();
        let tail: u8 = kani::any();
        kani::assume(d.is_ascii_digit());
        kani::assume(!tail.is_ascii_digit());
        let s = [d, tail];
        kani::assert(
            parse_leading_int(&s) == (d - b'0') as isize,
            "parse stops at first non-digit",
        );
    }

    /// Proof: empty needle always matches at zero
    #[kani::proof]
    fn empty_needle_matches_at_zero() {
        let s: [u8; 4] = kani::any();
        kani::assert(index(&s, &[]) == Some(0), "empty needle matches at 0");
    }
}
