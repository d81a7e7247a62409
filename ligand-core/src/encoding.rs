//! Typed values to ordered byte strings and back.
//!
//! Every structure in this crate stores encoded bytes and iterates in byte
//! order, so an encoding used for keys decides the iteration order of the
//! structure it is used in. Each built-in documents its ordering contract.

use std::fmt;
use std::marker::PhantomData;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::{Date, Duration, OffsetDateTime, UtcOffset};

use crate::error::{Error, Result};

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("invalid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("invalid base-36 integer: {0}")]
    Base36(#[from] std::num::ParseIntError),
    #[error("year {0} is outside the encodable range")]
    YearOutOfRange(i32),
    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] time::error::ComponentRange),
    #[error("timestamp overflows the supported date range")]
    TimestampOverflow,
    #[error("digit run {0:?} does not fit in 64 bits")]
    DigitRun(String),
    #[error("natural-order key has no separator")]
    MissingSeparator,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("cbor: {0}")]
    Cbor(String),
}

/// A bidirectional mapping between a typed value and a byte string.
pub trait Encoding {
    type Value;

    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>, EncodingError>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Value, EncodingError>;
}

pub(crate) fn encode<E: Encoding>(
    encoding: &E,
    value: &E::Value,
    context: &'static str,
) -> Result<Vec<u8>> {
    encoding
        .encode(value)
        .map_err(|source| Error::Encode { context, source })
}

pub(crate) fn decode<E: Encoding>(
    encoding: &E,
    bytes: &[u8],
    context: &'static str,
) -> Result<E::Value> {
    encoding
        .decode(bytes)
        .map_err(|source| Error::Decode { context, source })
}

fn exact<const N: usize>(bytes: &[u8]) -> Result<[u8; N], EncodingError> {
    bytes.try_into().map_err(|_| EncodingError::Length {
        expected: N,
        actual: bytes.len(),
    })
}

/// UTF-8 strings copied byte for byte. Orders by UTF-8 byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Raw;

impl Encoding for Raw {
    type Value = String;

    fn encode(&self, value: &String) -> Result<Vec<u8>, EncodingError> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, EncodingError> {
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

/// `u64` as 8 big-endian bytes. Orders numerically.
#[derive(Debug, Clone, Copy, Default)]
pub struct BigEndian;

impl Encoding for BigEndian {
    type Value = u64;

    fn encode(&self, value: &u64) -> Result<Vec<u8>, EncodingError> {
        Ok(value.to_be_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<u64, EncodingError> {
        Ok(u64::from_be_bytes(exact::<8>(bytes)?))
    }
}

/// `u64` as lower-case base-36 text.
///
/// Compact, but byte order is not numeric order ("z" sorts after "10").
/// Use it for opaque identifiers, never for keys that are range-scanned.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base36;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

impl Encoding for Base36 {
    type Value = u64;

    fn encode(&self, value: &u64) -> Result<Vec<u8>, EncodingError> {
        let mut n = *value;
        let mut out = Vec::with_capacity(13);
        loop {
            out.push(BASE36_DIGITS[(n % 36) as usize]);
            n /= 36;
            if n == 0 {
                break;
            }
        }
        out.reverse();
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<u64, EncodingError> {
        let text = String::from_utf8(bytes.to_vec())?;
        Ok(u64::from_str_radix(&text, 36)?)
    }
}

const YEAR_BIAS: i32 = 32768;

/// Instants in 9 bytes that sort chronologically.
///
/// Layout: `year + 32768` as a big-endian `u16`, then the nanoseconds since
/// the start of that (UTC) year as a big-endian 56-bit integer. Years
/// -32768..=32767 are representable. Values are normalized to UTC, so a
/// decoded value compares equal to the original but carries a UTC offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamp;

fn start_of_year(year: i32) -> Result<OffsetDateTime, EncodingError> {
    Ok(Date::from_ordinal_date(year, 1)?.midnight().assume_utc())
}

impl Encoding for Timestamp {
    type Value = OffsetDateTime;

    fn encode(&self, value: &OffsetDateTime) -> Result<Vec<u8>, EncodingError> {
        let utc = value.to_offset(UtcOffset::UTC);
        let year = utc.year();
        let shifted =
            u16::try_from(year + YEAR_BIAS).map_err(|_| EncodingError::YearOutOfRange(year))?;
        let nanos = (utc - start_of_year(year)?).whole_nanoseconds();
        let nanos = u64::try_from(nanos).map_err(|_| EncodingError::TimestampOverflow)?;

        let mut out = Vec::with_capacity(9);
        out.extend_from_slice(&shifted.to_be_bytes());
        out.extend_from_slice(&nanos.to_be_bytes()[1..]);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<OffsetDateTime, EncodingError> {
        let bytes = exact::<9>(bytes)?;
        let year = i32::from(u16::from_be_bytes([bytes[0], bytes[1]])) - YEAR_BIAS;
        let mut nanos = [0u8; 8];
        nanos[1..].copy_from_slice(&bytes[2..]);
        // Top byte is zero, so this is never negative.
        let nanos = i64::from_be_bytes(nanos);
        start_of_year(year)?
            .checked_add(Duration::nanoseconds(nanos))
            .ok_or(EncodingError::TimestampOverflow)
    }
}

const NATURAL_SEPARATOR: [u8; 4] = [0; 4];

/// Strings in "natural" order, where embedded numbers compare by value.
///
/// Non-digit runs are lower-cased and copied, each ASCII digit run becomes
/// an 8-byte big-endian integer, so "file2" sorts before "file10". The
/// original string follows a 4-byte zero separator as base64, which both
/// recovers it exactly and breaks ties between strings that fold to the
/// same key ("File1" vs "file01").
#[derive(Debug, Clone, Copy, Default)]
pub struct Natural;

impl Encoding for Natural {
    type Value = String;

    fn encode(&self, value: &String) -> Result<Vec<u8>, EncodingError> {
        let mut out = Vec::with_capacity(value.len() * 2 + NATURAL_SEPARATOR.len());
        let mut rest = value.as_str();
        while !rest.is_empty() {
            let digits = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            if digits > 0 {
                let (run, tail) = rest.split_at(digits);
                let n: u64 = run
                    .parse()
                    .map_err(|_| EncodingError::DigitRun(run.to_owned()))?;
                out.extend_from_slice(&n.to_be_bytes());
                rest = tail;
            } else {
                let text = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
                let (run, tail) = rest.split_at(text);
                out.extend_from_slice(run.to_lowercase().as_bytes());
                rest = tail;
            }
        }
        out.extend_from_slice(&NATURAL_SEPARATOR);
        out.extend_from_slice(STANDARD.encode(value).as_bytes());
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, EncodingError> {
        // The base64 alphabet has no zero byte, so the last all-zero window
        // is the separator.
        let at = bytes
            .windows(NATURAL_SEPARATOR.len())
            .rposition(|window| window == NATURAL_SEPARATOR)
            .ok_or(EncodingError::MissingSeparator)?;
        let payload = STANDARD.decode(&bytes[at + NATURAL_SEPARATOR.len()..])?;
        Ok(String::from_utf8(payload)?)
    }
}

/// Encodes nothing. For a dimension that plays no part in ordering, such
/// as the order key of a list sorted by its values alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct Null;

impl Encoding for Null {
    type Value = ();

    fn encode(&self, _value: &()) -> Result<Vec<u8>, EncodingError> {
        Ok(Vec::new())
    }

    fn decode(&self, _bytes: &[u8]) -> Result<(), EncodingError> {
        Ok(())
    }
}

/// Any serde value as CBOR. No ordering contract, meant for stored values.
pub struct Cbor<T>(PhantomData<fn() -> T>);

impl<T> Cbor<T> {
    pub const fn new() -> Self {
        Cbor(PhantomData)
    }
}

impl<T> Default for Cbor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Cbor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Cbor<T> {}

impl<T> fmt::Debug for Cbor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cbor<{}>", std::any::type_name::<T>())
    }
}

impl<T: Serialize + DeserializeOwned> Encoding for Cbor<T> {
    type Value = T;

    fn encode(&self, value: &T) -> Result<Vec<u8>, EncodingError> {
        let mut out = Vec::new();
        ciborium::into_writer(value, &mut out).map_err(|e| EncodingError::Cbor(e.to_string()))?;
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, EncodingError> {
        ciborium::from_reader(bytes).map_err(|e| EncodingError::Cbor(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use time::Month;

    fn natural(s: &str) -> Vec<u8> {
        Natural.encode(&s.to_owned()).unwrap()
    }

    #[test]
    fn raw_roundtrip() {
        for s in ["", "hello", "héllo wörld", "日本語"] {
            let bytes = Raw.encode(&s.to_owned()).unwrap();
            assert_eq!(bytes, s.as_bytes());
            assert_eq!(Raw.decode(&bytes).unwrap(), s);
        }
    }

    #[test]
    fn raw_rejects_invalid_utf8() {
        assert!(matches!(
            Raw.decode(&[0xff, 0xfe]),
            Err(EncodingError::Utf8(_))
        ));
    }

    #[test]
    fn big_endian_boundaries() {
        for n in [0, 1, 255, 256, u64::MAX - 1, u64::MAX] {
            let bytes = BigEndian.encode(&n).unwrap();
            assert_eq!(bytes.len(), 8);
            assert_eq!(BigEndian.decode(&bytes).unwrap(), n);
        }
        assert!(BigEndian.encode(&255).unwrap() < BigEndian.encode(&256).unwrap());
    }

    #[test]
    fn big_endian_rejects_wrong_length() {
        assert!(matches!(
            BigEndian.decode(&[1, 2, 3]),
            Err(EncodingError::Length {
                expected: 8,
                actual: 3
            })
        ));
    }

    #[test]
    fn base36_roundtrip() {
        assert_eq!(Base36.encode(&0).unwrap(), b"0");
        assert_eq!(Base36.encode(&35).unwrap(), b"z");
        assert_eq!(Base36.encode(&36).unwrap(), b"10");
        assert_eq!(Base36.encode(&u64::MAX).unwrap(), b"3w5e11264sgsf");
        for n in [0, 7, 36, 1_000_000, u64::MAX] {
            let bytes = Base36.encode(&n).unwrap();
            assert_eq!(Base36.decode(&bytes).unwrap(), n);
        }
    }

    #[test]
    fn base36_is_not_numeric_order() {
        // 35 < 36 but "z" > "10".
        assert!(Base36.encode(&35).unwrap() > Base36.encode(&36).unwrap());
    }

    fn at(year: i32, month: Month, day: u8, hms: (u8, u8, u8), nano: u32) -> OffsetDateTime {
        Date::from_calendar_date(year, month, day)
            .unwrap()
            .with_hms_nano(hms.0, hms.1, hms.2, nano)
            .unwrap()
            .assume_utc()
    }

    #[test]
    fn timestamp_layout() {
        let t = at(2024, Month::January, 1, (0, 0, 0), 1);
        let bytes = Timestamp.encode(&t).unwrap();
        assert_eq!(bytes.len(), 9);
        assert_eq!(&bytes[..2], &(2024u16 + 32768).to_be_bytes());
        assert_eq!(&bytes[2..], &[0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn timestamp_roundtrip_extremes() {
        for t in [
            at(-32768, Month::January, 1, (0, 0, 0), 0),
            at(-1, Month::December, 31, (23, 59, 59), 999_999_999),
            at(0, Month::January, 1, (0, 0, 0), 0),
            at(1970, Month::January, 1, (0, 0, 0), 0),
            at(2024, Month::February, 29, (12, 34, 56), 789_000_000),
            at(32767, Month::December, 31, (23, 59, 59), 999_999_999),
        ] {
            let bytes = Timestamp.encode(&t).unwrap();
            assert_eq!(Timestamp.decode(&bytes).unwrap(), t);
        }
    }

    #[test]
    fn timestamp_normalizes_offsets() {
        let local = Date::from_calendar_date(2024, Month::June, 1)
            .unwrap()
            .with_hms(2, 0, 0)
            .unwrap()
            .assume_offset(UtcOffset::from_hms(3, 0, 0).unwrap());
        let bytes = Timestamp.encode(&local).unwrap();
        let decoded = Timestamp.decode(&bytes).unwrap();
        assert_eq!(decoded, local);
        assert_eq!(decoded.offset(), UtcOffset::UTC);
    }

    #[test]
    fn timestamp_orders_across_zero() {
        let before = Timestamp.encode(&at(-1, Month::June, 1, (0, 0, 0), 0)).unwrap();
        let zero = Timestamp.encode(&at(0, Month::January, 1, (0, 0, 0), 0)).unwrap();
        let after = Timestamp.encode(&at(1, Month::January, 1, (0, 0, 0), 0)).unwrap();
        assert!(before < zero);
        assert!(zero < after);
    }

    #[test]
    fn timestamp_rejects_years_out_of_range() {
        let t = at(40000, Month::January, 1, (0, 0, 0), 0);
        assert!(matches!(
            Timestamp.encode(&t),
            Err(EncodingError::YearOutOfRange(40000))
        ));
    }

    #[test]
    fn natural_orders_numbers_by_value() {
        assert!(natural("2") < natural("10"));
        assert!(natural("10") < natural("a1"));
        assert!(natural("file2.txt") < natural("file10.txt"));
        assert!(natural("v1.9") < natural("v1.10"));
    }

    #[test]
    fn natural_folds_case_and_breaks_ties() {
        let upper = natural("File1");
        let lower = natural("file1");
        assert_ne!(upper, lower);
        let sep = upper.len() - STANDARD.encode("File1").len();
        assert_eq!(&upper[..sep], &lower[..sep]);
    }

    #[test]
    fn natural_roundtrip() {
        for s in ["", "0", "007", "abc", "ABC123def", "日本2語", "a1b22c333"] {
            let bytes = natural(s);
            assert_eq!(Natural.decode(&bytes).unwrap(), s);
        }
    }

    #[test]
    fn natural_rejects_oversized_digit_runs() {
        let err = Natural.encode(&"1".repeat(21)).unwrap_err();
        assert!(matches!(err, EncodingError::DigitRun(_)));
    }

    #[test]
    fn natural_decode_needs_separator() {
        assert!(matches!(
            Natural.decode(b"abc"),
            Err(EncodingError::MissingSeparator)
        ));
    }

    #[test]
    fn null_is_empty() {
        assert!(Null.encode(&()).unwrap().is_empty());
        Null.decode(b"anything").unwrap();
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    #[test]
    fn cbor_roundtrip() {
        let codec = Cbor::<Profile>::new();
        let profile = Profile {
            name: "ada".to_owned(),
            age: 36,
        };
        let bytes = codec.encode(&profile).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), profile);
        assert!(codec.decode(&[0xff]).is_err());
    }

    #[test]
    fn helpers_attach_context() {
        let err = decode(&BigEndian, &[1], "decode value").unwrap_err();
        assert_eq!(err.to_string(), "decode value: expected 8 bytes, got 1");
    }
}
