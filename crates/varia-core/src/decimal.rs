//! Fixed-point decimal with six fractional digits.
//!
//! A `Decimal` is an `i64` count of millionths. Arithmetic that can leave
//! the representable range is done in `i128` and reported as
//! `VariantError::Overflow` instead of wrapping.

use std::fmt;

use crate::error::VariantError;

pub const DECIMAL_PLACES: usize = 6;
pub const DECIMAL_PRECISION: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Decimal(i64);

fn narrow(wide: i128, op: &str) -> Result<Decimal, VariantError> {
    i64::try_from(wide)
        .map(Decimal)
        .map_err(|_| VariantError::overflow(format!("decimal {op} out of range")))
}

impl Decimal {
    pub const ZERO: Decimal = Decimal(0);
    pub const ONE: Decimal = Decimal(DECIMAL_PRECISION);

    pub fn from_raw(raw: i64) -> Self {
        Decimal(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn from_int(n: i32) -> Self {
        Decimal(i64::from(n) * DECIMAL_PRECISION)
    }

    /// Convert a float, truncating past the sixth place. `None` if not finite or out of range.
    pub fn from_f64(f: f64) -> Option<Self> {
        let scaled = (f * DECIMAL_PRECISION as f64).trunc();
        if !scaled.is_finite() || scaled >= i64::MAX as f64 || scaled <= i64::MIN as f64 {
            return None;
        }
        Some(Decimal(scaled as i64))
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / DECIMAL_PRECISION as f64
    }

    /// Integer part, truncated toward zero.
    pub fn trunc(self) -> i64 {
        self.0 / DECIMAL_PRECISION
    }

    pub fn is_integer(self) -> bool {
        self.0 % DECIMAL_PRECISION == 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Parse `-?digits[.digits]`. Digits past the sixth place are dropped.
    pub fn parse(text: &str) -> Option<Self> {
        let (negative, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let whole: i128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().ok()?
        };
        let mut frac: i128 = 0;
        let mut scale = DECIMAL_PRECISION as i128;
        for digit in frac_part.bytes().take(DECIMAL_PLACES) {
            scale /= 10;
            frac += i128::from(digit - b'0') * scale;
        }
        let magnitude = whole.checked_mul(DECIMAL_PRECISION as i128)? + frac;
        let value = if negative { -magnitude } else { magnitude };
        i64::try_from(value).ok().map(Decimal)
    }

    pub fn checked_add(self, other: Decimal) -> Result<Decimal, VariantError> {
        narrow(i128::from(self.0) + i128::from(other.0), "addition")
    }

    pub fn checked_sub(self, other: Decimal) -> Result<Decimal, VariantError> {
        narrow(i128::from(self.0) - i128::from(other.0), "subtraction")
    }

    pub fn checked_mul(self, other: Decimal) -> Result<Decimal, VariantError> {
        let wide = i128::from(self.0) * i128::from(other.0) / i128::from(DECIMAL_PRECISION);
        narrow(wide, "multiplication")
    }

    pub fn checked_div(self, other: Decimal) -> Result<Decimal, VariantError> {
        if other.0 == 0 {
            return Err(VariantError::DivideByZero);
        }
        let wide = i128::from(self.0) * i128::from(DECIMAL_PRECISION) / i128::from(other.0);
        narrow(wide, "division")
    }

    pub fn checked_rem(self, other: Decimal) -> Result<Decimal, VariantError> {
        if other.0 == 0 {
            return Err(VariantError::DivideByZero);
        }
        narrow(i128::from(self.0) % i128::from(other.0), "remainder")
    }

    pub fn checked_neg(self) -> Result<Decimal, VariantError> {
        narrow(-i128::from(self.0), "negation")
    }

    /// Raise to an integer power by multiplying left to right, truncating
    /// after every step.
    pub fn checked_powi(self, exponent: i64) -> Result<Decimal, VariantError> {
        if exponent < 0 {
            let positive = self.checked_powi(exponent.checked_neg().ok_or_else(|| {
                VariantError::overflow("exponent out of range")
            })?)?;
            return Decimal::ONE.checked_div(positive);
        }
        let mut result = Decimal::ONE;
        let mut remaining = exponent;
        while remaining > 0 {
            let next = result.checked_mul(self).map_err(|_| pow_overflow(self, exponent))?;
            remaining -= 1;
            if next.0 == 0 {
                return Ok(next);
            }
            // Magnitude is fixed from here; only the sign can still change.
            if next.0.unsigned_abs() == result.0.unsigned_abs() {
                let flips = next.0 != result.0;
                return if flips && remaining % 2 == 1 {
                    next.checked_neg()
                } else {
                    Ok(next)
                };
            }
            result = next;
        }
        Ok(result)
    }

    /// Raise to an arbitrary decimal power. Integer exponents stay in fixed point.
    pub fn checked_pow(self, exponent: Decimal) -> Result<Decimal, VariantError> {
        if exponent.is_integer() {
            return self.checked_powi(exponent.trunc());
        }
        let result = self.to_f64().powf(exponent.to_f64());
        if result.is_nan() {
            return Err(VariantError::eval(format!(
                "{self} ^ {exponent} has no real result"
            )));
        }
        Decimal::from_f64(result).ok_or_else(|| pow_overflow_text(self, exponent))
    }
}

fn pow_overflow(base: Decimal, exponent: i64) -> VariantError {
    VariantError::overflow(format!("{base} ^ {exponent} does not fit a decimal"))
}

fn pow_overflow_text(base: Decimal, exponent: Decimal) -> VariantError {
    VariantError::overflow(format!("{base} ^ {exponent} does not fit a decimal"))
}

impl From<i32> for Decimal {
    fn from(n: i32) -> Self {
        Decimal::from_int(n)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.unsigned_abs();
        let precision = DECIMAL_PRECISION as u64;
        let whole = magnitude / precision;
        let frac = magnitude % precision;
        let mut digits = format!("{frac:06}");
        while digits.len() > 1 && digits.ends_with('0') {
            digits.pop();
        }
        if self.0 < 0 {
            f.write_str("-")?;
        }
        write!(f, "{whole}.{digits}")
    }
}
