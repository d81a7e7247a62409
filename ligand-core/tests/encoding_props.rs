//! Property-based tests for encoding round-trips and ordering.

use ligand_core::encoding::{Base36, BigEndian, Cbor, Encoding, Natural, Raw, Timestamp};
use proptest::prelude::*;
use time::OffsetDateTime;

/// Instants from year 1 to year 9999, at nanosecond precision.
fn arb_instant() -> impl Strategy<Value = OffsetDateTime> {
    const FIRST: i128 = -62_135_596_800 * 1_000_000_000;
    const LAST: i128 = 253_402_300_799 * 1_000_000_000 + 999_999_999;
    (FIRST..=LAST).prop_map(|nanos| OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap())
}

/// Digit strings without leading zeros, so distinct strings are distinct
/// numbers.
fn arb_number_text() -> impl Strategy<Value = String> {
    any::<u64>().prop_map(|n| n.to_string())
}

proptest! {
    #[test]
    fn raw_roundtrip(value in ".*") {
        let encoded = Raw.encode(&value).unwrap();
        prop_assert_eq!(Raw.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn big_endian_roundtrip(value in any::<u64>()) {
        let encoded = BigEndian.encode(&value).unwrap();
        prop_assert_eq!(BigEndian.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn big_endian_preserves_order(a in any::<u64>(), b in any::<u64>()) {
        let (ea, eb) = (BigEndian.encode(&a).unwrap(), BigEndian.encode(&b).unwrap());
        prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
    }

    #[test]
    fn base36_roundtrip(value in any::<u64>()) {
        let encoded = Base36.encode(&value).unwrap();
        prop_assert_eq!(Base36.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn timestamp_roundtrip(value in arb_instant()) {
        let encoded = Timestamp.encode(&value).unwrap();
        prop_assert_eq!(encoded.len(), 9);
        prop_assert_eq!(Timestamp.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn timestamp_preserves_order(a in arb_instant(), b in arb_instant()) {
        let (ea, eb) = (Timestamp.encode(&a).unwrap(), Timestamp.encode(&b).unwrap());
        prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
    }

    #[test]
    fn natural_roundtrip(value in "\\PC{0,24}") {
        // Digit runs must fit in 64 bits to be encodable.
        prop_assume!(Natural.encode(&value).is_ok());
        let encoded = Natural.encode(&value).unwrap();
        prop_assert_eq!(Natural.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn natural_orders_words_alphabetically(a in "[a-z]{0,12}", b in "[a-z]{0,12}") {
        let (ea, eb) = (Natural.encode(&a).unwrap(), Natural.encode(&b).unwrap());
        prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
    }

    #[test]
    fn natural_orders_numbers_by_value(a in arb_number_text(), b in arb_number_text()) {
        let (na, nb) = (a.parse::<u64>().unwrap(), b.parse::<u64>().unwrap());
        let (ea, eb) = (Natural.encode(&a).unwrap(), Natural.encode(&b).unwrap());
        prop_assert_eq!(na.cmp(&nb), ea.cmp(&eb));
    }

    #[test]
    fn natural_compares_embedded_numbers(
        prefix in "[a-z]{1,6}",
        a in any::<u32>(),
        b in any::<u32>()
    ) {
        let (sa, sb) = (format!("{prefix}{a}"), format!("{prefix}{b}"));
        let (ea, eb) = (Natural.encode(&sa).unwrap(), Natural.encode(&sb).unwrap());
        prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
    }

    #[test]
    fn cbor_roundtrip(name in ".{0,16}", tags in prop::collection::vec(any::<u32>(), 0..8)) {
        let cbor = Cbor::<(String, Vec<u32>)>::new();
        let value = (name, tags);
        let encoded = cbor.encode(&value).unwrap();
        prop_assert_eq!(cbor.decode(&encoded).unwrap(), value);
    }
}

#[test]
fn natural_puts_numbers_before_words() {
    let key = |s: &str| Natural.encode(&s.to_string()).unwrap();
    assert!(key("2") < key("10"));
    assert!(key("10") < key("a1"));
    assert!(key("file2") < key("File10"));
}
