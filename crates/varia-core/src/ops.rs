//! Arithmetic over values.
//!
//! Bool counts as Int. Mixing Int and Decimal promotes to Decimal. Integer
//! results that leave the 32-bit range are `Overflow` errors, never wrapped.

use std::rc::Rc;

use crate::context::Context;
use crate::decimal::Decimal;
use crate::error::VariantError;
use crate::value::Value;

enum Numbers {
    Ints(i32, i32),
    Decimals(Decimal, Decimal),
}

fn is_int_like(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Bool(_))
}

fn numbers(a: &Value, b: &Value, op: &str) -> Result<Numbers, VariantError> {
    let (a, b) = (a.resolved(), b.resolved());
    if is_int_like(a) && is_int_like(b) {
        return Ok(Numbers::Ints(a.as_int()?, b.as_int()?));
    }
    if a.is_numeric() && b.is_numeric() {
        return Ok(Numbers::Decimals(a.as_decimal()?, b.as_decimal()?));
    }
    let bad = if a.is_numeric() { b } else { a };
    Err(VariantError::type_mismatch(format!("number for '{op}'"), bad))
}

fn int_overflow(a: i32, op: &str, b: i32) -> VariantError {
    VariantError::overflow(format!("{a} {op} {b} does not fit a 32-bit int"))
}

/// `base ^ exponent` for a non-negative exponent, checked in unsigned magnitude.
fn int_pow(base: i32, exponent: u32) -> Result<i32, VariantError> {
    let overflow =
        || VariantError::overflow(format!("{base} ^ {exponent} does not fit a 32-bit int"));
    let magnitude = base.unsigned_abs().checked_pow(exponent).ok_or_else(overflow)?;
    let magnitude = i32::try_from(magnitude).map_err(|_| overflow())?;
    if base < 0 && exponent % 2 == 1 {
        Ok(-magnitude)
    } else {
        Ok(magnitude)
    }
}

impl Value {
    /// `self + other` for data values: numbers, concatenation and map merge.
    ///
    /// Null is the identity. A string on either side concatenates the other
    /// operand's text.
    pub fn add(&self, other: &Value) -> Result<Value, VariantError> {
        let (a, b) = (self.resolved(), other.resolved());
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => {
                return x.checked_add(*y).map(Value::Int).ok_or_else(|| int_overflow(*x, "+", *y))
            }
            (Value::Null, _) => return Ok(b.clone()),
            (_, Value::Null) => return Ok(a.clone()),
            (Value::String(x), _) => {
                let mut text = x.as_str().to_string();
                text.push_str(&b.string_cast());
                return Ok(Value::from(text));
            }
            (_, Value::String(y)) => {
                let mut text = a.string_cast();
                text.push_str(y.as_str());
                return Ok(Value::from(text));
            }
            (Value::List(x), Value::List(y)) => {
                let mut items = Vec::with_capacity(x.len() + y.len());
                items.extend(x.iter().cloned());
                items.extend(y.iter().cloned());
                return Ok(Value::list(items));
            }
            (Value::Map(x), Value::Map(y)) => {
                let mut merged = x.entries().clone();
                for (k, v) in y.entries().iter() {
                    merged.insert(k.clone(), v.clone());
                }
                return Ok(Value::map(merged));
            }
            _ => {}
        }
        match numbers(a, b, "+")? {
            Numbers::Ints(x, y) => x
                .checked_add(y)
                .map(Value::Int)
                .ok_or_else(|| int_overflow(x, "+", y)),
            Numbers::Decimals(x, y) => x.checked_add(y).map(Value::Decimal),
        }
    }

    /// Like [`Value::add`], with delayed operands forced first, and
    /// `object + map` yields a copy of the object with the map's entries
    /// applied.
    pub fn add_in(&self, ctx: &Context, other: &Value) -> Result<Value, VariantError> {
        let (lhs, rhs) = (self.force(ctx)?, other.force(ctx)?);
        if let (Value::Object(obj), Value::Map(_)) = (&lhs, &rhs) {
            return match obj.clone_with(ctx, &rhs)? {
                Some(copy) => Ok(Value::Object(copy)),
                None => {
                    let note = format!("{} objects cannot be combined with a map", obj.type_name());
                    Err(VariantError::type_mismatch("object that supports copy-with-changes", &lhs)
                        .with_note(note))
                }
            };
        }
        lhs.add(&rhs).map_err(|e| ctx.enrich(e))
    }

    pub fn sub(&self, other: &Value) -> Result<Value, VariantError> {
        match numbers(self, other, "-")? {
            Numbers::Ints(x, y) => x
                .checked_sub(y)
                .map(Value::Int)
                .ok_or_else(|| int_overflow(x, "-", y)),
            Numbers::Decimals(x, y) => x.checked_sub(y).map(Value::Decimal),
        }
    }

    /// Numeric product, or a list repeated `n` times (the sign of `n` is ignored).
    /// The repeated list must stay within the 32-bit length range.
    pub fn mul(&self, other: &Value) -> Result<Value, VariantError> {
        if let Value::List(items) = self.resolved() {
            let count = other.as_int()?.unsigned_abs() as usize;
            let too_long = || {
                VariantError::overflow(format!(
                    "a list of {} items repeated {count} times is too long",
                    items.len()
                ))
            };
            let total = items
                .len()
                .checked_mul(count)
                .filter(|n| *n <= i32::MAX as usize)
                .ok_or_else(too_long)?;
            let mut out = Vec::new();
            out.try_reserve_exact(total).map_err(|_| too_long())?;
            if items.is_empty() {
                return Ok(Value::list(out));
            }
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            return Ok(Value::list(out));
        }
        match numbers(self, other, "*")? {
            Numbers::Ints(x, y) => x
                .checked_mul(y)
                .map(Value::Int)
                .ok_or_else(|| int_overflow(x, "*", y)),
            Numbers::Decimals(x, y) => x.checked_mul(y).map(Value::Decimal),
        }
    }

    /// Int / Int truncates toward zero.
    pub fn div(&self, other: &Value) -> Result<Value, VariantError> {
        match numbers(self, other, "/")? {
            Numbers::Ints(_, 0) => Err(VariantError::DivideByZero),
            Numbers::Ints(x, y) => x
                .checked_div(y)
                .map(Value::Int)
                .ok_or_else(|| int_overflow(x, "/", y)),
            Numbers::Decimals(x, y) => x.checked_div(y).map(Value::Decimal),
        }
    }

    /// Remainder with the sign of the dividend.
    pub fn rem(&self, other: &Value) -> Result<Value, VariantError> {
        match numbers(self, other, "%")? {
            Numbers::Ints(_, 0) => Err(VariantError::DivideByZero),
            Numbers::Ints(x, y) => Ok(Value::Int(x.wrapping_rem(y))),
            Numbers::Decimals(x, y) => x.checked_rem(y).map(Value::Decimal),
        }
    }

    /// Exponentiation. A negative Int exponent gives a Decimal result.
    pub fn pow(&self, other: &Value) -> Result<Value, VariantError> {
        match numbers(self, other, "^")? {
            Numbers::Ints(base, exponent) => match u32::try_from(exponent) {
                Ok(e) => int_pow(base, e).map(Value::Int),
                Err(_) => Decimal::from_int(base)
                    .checked_powi(i64::from(exponent))
                    .map(Value::Decimal),
            },
            Numbers::Decimals(base, exponent) => base.checked_pow(exponent).map(Value::Decimal),
        }
    }

    pub fn neg(&self) -> Result<Value, VariantError> {
        match self.resolved() {
            Value::Decimal(d) => d.checked_neg().map(Value::Decimal),
            v if is_int_like(v) => {
                let n = v.as_int()?;
                n.checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| {
                        VariantError::overflow(format!("-({n}) does not fit a 32-bit int"))
                    })
            }
            other => Err(VariantError::type_mismatch("number for unary '-'", other)),
        }
    }

    /// Append another list's items to this value's private copy of its list.
    pub fn append(&mut self, other: &Value) -> Result<(), VariantError> {
        let extra = other.as_slice()?.to_vec();
        match self {
            Value::List(store) => {
                Rc::make_mut(store).modify(|items| items.extend(extra));
                Ok(())
            }
            other => Err(VariantError::type_mismatch("list", other)),
        }
    }
}
