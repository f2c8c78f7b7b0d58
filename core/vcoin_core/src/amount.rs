//! # Amounts
//!
//! Fixed-point quantities shared by the ledger and the resolver.
//!
//! | Quantity        | Representation                                  |
//! |-----------------|-------------------------------------------------|
//! | cash            | `i128` minor units (`CASH_DECIMALS` = 2)        |
//! | token           | `i128` base units (`TOKEN_UNIT` per token)      |
//! | [`Price`]       | minor units per whole token × `PRICE_SCALE`     |
//! | [`Value`]       | `units * price.raw()`, never divided            |
//! | [`CapMultiplier`] | basis points, `10_000` = 1.00x                |
//!
//! Every division that produces token units floors. Products are taken in
//! 256 bits so `a * b / d` never overflows on the way to the quotient.

use core::fmt;
use core::str::FromStr;

use ethnum::U256;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const CASH_DECIMALS: u32 = 2;
pub const TOKEN_DECIMALS: u32 = 6;
pub const TOKEN_UNIT: i128 = 1_000_000;
pub const PRICE_DECIMALS: u32 = 6;
pub const PRICE_SCALE: i128 = 1_000_000;
pub const BPS_SCALE: u32 = 10_000;

/// Fractional digits accepted when parsing a price string.
const PRICE_FRACTION_DIGITS: u32 = CASH_DECIMALS + PRICE_DECIMALS;
const BPS_FRACTION_DIGITS: u32 = 4;

// ── Price ────────────────────────────────────────────────────────────

/// Cash per whole token, in minor units scaled by [`PRICE_SCALE`].
///
/// `"0.50"` parses to 50 minor units per token, i.e. `50_000_000` raw.
/// Non-positive prices can be represented so the resolver can reject them
/// with a proper error instead of failing at parse time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Price(i128);

impl Price {
    pub const fn from_raw(raw: i128) -> Self {
        Price(raw)
    }

    pub const fn raw(self) -> i128 {
        self.0
    }

    pub fn from_minor_units(minor: i128) -> Result<Self> {
        checked_mul(minor, PRICE_SCALE).map(Price)
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Exact cash-equivalent of `units` token base units at this price.
    pub fn value_of(self, units: i128) -> Result<Value> {
        checked_mul(units, self.0).map(Value)
    }
}

impl FromStr for Price {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_fixed(s, PRICE_FRACTION_DIGITS)
            .map(Price)
            .ok_or_else(|| Error::InvalidPrice(s.to_string()))
    }
}

impl TryFrom<String> for Price {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Price> for String {
    fn from(price: Price) -> Self {
        price.to_string()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_fixed(self.0, PRICE_FRACTION_DIGITS, CASH_DECIMALS))
    }
}

// ── Value ────────────────────────────────────────────────────────────

/// Cash-equivalent value in "value units": token base units multiplied by a
/// raw [`Price`]. Kept unnormalised so sums and differences stay exact.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Value(#[serde(with = "i128_string")] i128);

impl Value {
    pub const ZERO: Value = Value(0);

    pub const fn from_raw(raw: i128) -> Self {
        Value(raw)
    }

    pub const fn raw(self) -> i128 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Value in cash minor units, truncated toward zero.
    pub const fn to_minor_units(self) -> i128 {
        self.0 / (TOKEN_UNIT * PRICE_SCALE)
    }

    pub fn checked_add(self, other: Value) -> Result<Value> {
        checked_add(self.0, other.0).map(Value)
    }

    pub fn checked_sub(self, other: Value) -> Result<Value> {
        self.0
            .checked_sub(other.0)
            .map(Value)
            .ok_or(Error::ArithmeticOverflow)
    }

    /// `self * multiplier`, floored. Only defined for non-negative values.
    pub fn scale(self, multiplier: CapMultiplier) -> Result<Value> {
        let (scaled, _) = mul_div_rem(self.0, multiplier.bps() as i128, BPS_SCALE as i128)?;
        Ok(Value(scaled))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_fixed(
            self.to_minor_units(),
            CASH_DECIMALS,
            CASH_DECIMALS,
        ))
    }
}

// ── CapMultiplier ────────────────────────────────────────────────────

/// Allowed overshoot over the baseline token value, in basis points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CapMultiplier(u32);

impl CapMultiplier {
    pub fn from_bps(bps: u32) -> Result<Self> {
        if bps < BPS_SCALE {
            return Err(Error::InvalidCapMultiplier(format_fixed(
                bps as i128,
                BPS_FRACTION_DIGITS,
                2,
            )));
        }
        Ok(CapMultiplier(bps))
    }

    pub const fn bps(self) -> u32 {
        self.0
    }
}

impl FromStr for CapMultiplier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bps = parse_fixed(s, BPS_FRACTION_DIGITS)
            .and_then(|raw| u32::try_from(raw).ok())
            .ok_or_else(|| Error::InvalidCapMultiplier(s.to_string()))?;
        CapMultiplier::from_bps(bps)
    }
}

impl TryFrom<String> for CapMultiplier {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<CapMultiplier> for String {
    fn from(multiplier: CapMultiplier) -> Self {
        multiplier.to_string()
    }
}

impl fmt::Display for CapMultiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_fixed(self.0 as i128, BPS_FRACTION_DIGITS, 2))
    }
}

// ── Checked arithmetic ───────────────────────────────────────────────

pub(crate) fn checked_add(a: i128, b: i128) -> Result<i128> {
    a.checked_add(b).ok_or(Error::ArithmeticOverflow)
}

pub(crate) fn checked_mul(a: i128, b: i128) -> Result<i128> {
    a.checked_mul(b).ok_or(Error::ArithmeticOverflow)
}

/// `floor(a * b / d)` and `(a * b) mod d` for non-negative operands.
pub(crate) fn mul_div_rem(a: i128, b: i128, d: i128) -> Result<(i128, i128)> {
    if a < 0 || b < 0 || d <= 0 {
        return Err(Error::InvariantViolation(format!(
            "mul_div operands out of range: {a} * {b} / {d}"
        )));
    }
    let product = U256::from(a as u128) * U256::from(b as u128);
    let divisor = U256::from(d as u128);
    Ok((narrow(product / divisor)?, narrow(product % divisor)?))
}

fn narrow(x: U256) -> Result<i128> {
    let (high, low) = x.into_words();
    if high != 0 || low > i128::MAX as u128 {
        return Err(Error::ArithmeticOverflow);
    }
    Ok(low as i128)
}

// ── Decimal strings ──────────────────────────────────────────────────

/// Parse `"-12.345"` into an integer scaled by `10^decimals`.
/// More fractional digits than `decimals` is rejected, never rounded.
fn parse_fixed(input: &str, decimals: u32) -> Option<i128> {
    let s = input.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) || frac_part.len() > decimals as usize {
        return None;
    }

    let int_value: i128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().ok()?
    };
    let frac_value: i128 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse().ok()?
    };
    let frac_scale = 10i128.checked_pow(decimals - frac_part.len() as u32)?;

    let magnitude = int_value
        .checked_mul(10i128.checked_pow(decimals)?)?
        .checked_add(frac_value.checked_mul(frac_scale)?)?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Inverse of [`parse_fixed`]; trailing zeros are trimmed down to `min_frac` digits.
fn format_fixed(raw: i128, decimals: u32, min_frac: u32) -> String {
    let scale = 10u128.pow(decimals);
    let magnitude = raw.unsigned_abs();
    let int_part = magnitude / scale;
    let mut frac = format!("{:0width$}", magnitude % scale, width = decimals as usize);
    while frac.len() > min_frac as usize && frac.ends_with('0') {
        frac.pop();
    }
    let sign = if raw < 0 { "-" } else { "" };
    if frac.is_empty() {
        format!("{sign}{int_part}")
    } else {
        format!("{sign}{int_part}.{frac}")
    }
}

/// Serde helper: `i128` amounts travel as decimal strings.
pub mod i128_string {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim().parse().map_err(D::Error::custom)
    }
}
