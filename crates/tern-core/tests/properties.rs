//! Property tests for the pure helpers

use proptest::prelude::*;
use tern_core::{has_prefix, index, parse_leading_int, round};

proptest! {
    #[test]
    fn round_is_next_multiple(n in 0usize..(1 << 40), shift in 0u32..20) {
        let a = 1usize << shift;
        let r = round(n, a);
        prop_assert_eq!(r % a, 0);
        prop_assert!(r >= n);
        prop_assert!(r < n + a);
    }

    #[test]
    fn empty_needle_matches_at_zero(s in proptest::collection::vec(any::<u8>(), 0..64)) {
        prop_assert_eq!(index(&s, b""), Some(0));
    }

    #[test]
    fn index_reports_first_occurrence(
        s in proptest::collection::vec(0u8..4, 1..48),
        start in any::<proptest::sample::Index>(),
        len in 1usize..6,
    ) {
        let start = start.index(s.len());
        let len = len.min(s.len() - start);
        let t = &s[start..start + len];
        let found = index(&s, t);
        prop_assert!(found.is_some());
        let i = found.unwrap();
        prop_assert!(i <= start);
        prop_assert_eq!(&s[i..i + len], t);
    }

    #[test]
    fn index_absent_when_not_contained(
        s in proptest::collection::vec(0u8..3, 0..32),
        mut t in proptest::collection::vec(0u8..4, 0..4),
    ) {
        // s never holds a 3, so any needle carrying one is absent
        t.push(3);
        prop_assert_eq!(index(&s, &t), None);
    }

    #[test]
    fn has_prefix_matches_definition(
        s in proptest::collection::vec(0u8..3, 0..16),
        t in proptest::collection::vec(0u8..3, 0..16),
    ) {
        let expected = s.len() >= t.len() && s[..t.len()] == t[..];
        prop_assert_eq!(has_prefix(&s, &t), expected);
    }

    #[test]
    fn parse_leading_int_reads_decimal_prefix(n in 0u32..1_000_000, tail in "[a-z]{0,4}") {
        let s = format!("{n}{tail}");
        prop_assert_eq!(parse_leading_int(s.as_bytes()), n as isize);
    }
}

#[test]
fn parse_leading_int_examples() {
    assert_eq!(parse_leading_int(b""), 0);
    assert_eq!(parse_leading_int(b"42abc"), 42);
    assert_eq!(parse_leading_int(b"abc"), 0);
}
