//! Fixed-point credit amounts.
//!
//! Credits are charged in fractional amounts (0.50, 1.00, 2.00). Storing them
//! as `f64` drifts after enough additions, so every amount is kept as a signed
//! count of hundredths of a credit. Conversion to floating point only happens
//! at the JSON boundary.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error returned when a credit amount cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreditsParseError {
    #[error("empty credit amount")]
    Empty,

    #[error("invalid credit amount: {0}")]
    Invalid(String),

    #[error("credit amount has more than two decimal places: {0}")]
    TooPrecise(String),

    #[error("credit amount out of range: {0}")]
    OutOfRange(String),
}

/// A credit amount in hundredths of a credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Credits(i64);

impl Credits {
    /// Minor units per whole credit.
    pub const SCALE: i64 = 100;

    pub const ZERO: Credits = Credits(0);

    /// Build from minor units (hundredths).
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Build from a whole number of credits.
    pub const fn whole(credits: i64) -> Self {
        Self(credits * Self::SCALE)
    }

    /// Amount in minor units (hundredths).
    pub const fn minor(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Credits) -> Option<Credits> {
        self.0.checked_add(other.0).map(Credits)
    }

    pub fn checked_sub(self, other: Credits) -> Option<Credits> {
        self.0.checked_sub(other.0).map(Credits)
    }

    /// Subtract, clamping at zero.
    pub fn saturating_sub_floor(self, other: Credits) -> Credits {
        Credits(self.0.saturating_sub(other.0).max(0))
    }

    /// Convert from a floating-point amount, rounding to the nearest hundredth.
    ///
    /// Returns `None` for NaN, infinities and values outside the `i64` range.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * Self::SCALE as f64).round();
        if scaled < i64::MIN as f64 || scaled > i64::MAX as f64 {
            return None;
        }
        Some(Self(scaled as i64))
    }

    /// Floating-point view, for serialization only.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    /// Parse a decimal string such as `"7"`, `"1.5"` or `"-0.25"`.
    pub fn parse(s: &str) -> Result<Self, CreditsParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CreditsParseError::Empty);
        }

        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(CreditsParseError::Invalid(s.to_string()));
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(CreditsParseError::Invalid(s.to_string()));
        }
        if frac_part.len() > 2 {
            return Err(CreditsParseError::TooPrecise(s.to_string()));
        }

        let whole: i64 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| CreditsParseError::OutOfRange(s.to_string()))?
        };
        let frac: i64 = match frac_part.len() {
            0 => 0,
            1 => frac_part.parse::<i64>().unwrap_or(0) * 10,
            _ => frac_part.parse::<i64>().unwrap_or(0),
        };

        let minor = whole
            .checked_mul(Self::SCALE)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(|| CreditsParseError::OutOfRange(s.to_string()))?;

        Ok(Self(if negative { -minor } else { minor }))
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = Self::SCALE as u64;
        write!(f, "{}{}.{:02}", sign, abs / scale, abs % scale)
    }
}

impl FromStr for Credits {
    type Err = CreditsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Credits::parse(s)
    }
}

impl Add for Credits {
    type Output = Credits;

    fn add(self, rhs: Credits) -> Credits {
        Credits(self.0 + rhs.0)
    }
}

impl AddAssign for Credits {
    fn add_assign(&mut self, rhs: Credits) {
        self.0 += rhs.0;
    }
}

impl Sub for Credits {
    type Output = Credits;

    fn sub(self, rhs: Credits) -> Credits {
        Credits(self.0 - rhs.0)
    }
}

impl SubAssign for Credits {
    fn sub_assign(&mut self, rhs: Credits) {
        self.0 -= rhs.0;
    }
}

impl Neg for Credits {
    type Output = Credits;

    fn neg(self) -> Credits {
        Credits(-self.0)
    }
}

impl Sum for Credits {
    fn sum<I: Iterator<Item = Credits>>(iter: I) -> Credits {
        iter.fold(Credits::ZERO, |acc, c| acc + c)
    }
}

impl<'a> Sum<&'a Credits> for Credits {
    fn sum<I: Iterator<Item = &'a Credits>>(iter: I) -> Credits {
        iter.fold(Credits::ZERO, |acc, c| acc + *c)
    }
}

impl Serialize for Credits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

struct CreditsVisitor;

impl<'de> Visitor<'de> for CreditsVisitor {
    type Value = Credits;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a credit amount as a number or decimal string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Credits, E> {
        v.checked_mul(Credits::SCALE)
            .map(Credits)
            .ok_or_else(|| E::custom(format!("credit amount out of range: {}", v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Credits, E> {
        i64::try_from(v)
            .ok()
            .and_then(|v| v.checked_mul(Credits::SCALE))
            .map(Credits)
            .ok_or_else(|| E::custom(format!("credit amount out of range: {}", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Credits, E> {
        Credits::from_f64(v).ok_or_else(|| E::custom(format!("invalid credit amount: {}", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Credits, E> {
        Credits::parse(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Credits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(CreditsVisitor)
    }
}

impl JsonSchema for Credits {
    fn schema_name() -> String {
        "Credits".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        f64::json_schema(gen)
    }
}
