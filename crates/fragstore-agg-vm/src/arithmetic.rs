//! Mixed-signedness arithmetic, preserving exact overflow rules to keep
//! SQL-visible semantics. Overflow boundaries are checked using
//! `i128`/`u128` widening rather than 32-bit-half bit tricks — both
//! reject exactly the same out-of-range results, and widening is the
//! idiomatic Rust way to get there (see DESIGN.md).

use fragstore_common::{StorageError, StorageResult};

use crate::register::{magnitude, widen, RegValue};

fn to_f64(v: RegValue) -> f64 {
    match v {
        RegValue::Int64(i) => i as f64,
        RegValue::Uint64(u) => u as f64,
        RegValue::Double(d) => d,
        RegValue::Undefined => 0.0,
    }
}

fn combine_add_sub(a: RegValue, b: RegValue, subtract: bool) -> StorageResult<RegValue> {
    if matches!(a, RegValue::Double(_)) || matches!(b, RegValue::Double(_)) {
        let (fa, fb) = (to_f64(a), to_f64(b));
        return Ok(RegValue::Double(if subtract { fa - fb } else { fa + fb }));
    }
    let a_signed = matches!(a, RegValue::Int64(_));
    let b_signed = matches!(b, RegValue::Int64(_));
    let wa = widen(a).ok_or(StorageError::ArithmeticOverflow)?;
    let wb = widen(b).ok_or(StorageError::ArithmeticOverflow)?;
    let result = if subtract { wa - wb } else { wa + wb };

    if a_signed && b_signed {
        if result < i64::MIN as i128 || result > i64::MAX as i128 {
            return Err(StorageError::ArithmeticOverflow);
        }
        Ok(RegValue::Int64(result as i64))
    } else if !a_signed && !b_signed {
        if result < 0 || result > u64::MAX as i128 {
            return Err(StorageError::ArithmeticOverflow);
        }
        Ok(RegValue::Uint64(result as u64))
    } else if result >= 0 {
        if result > u64::MAX as i128 {
            return Err(StorageError::ArithmeticOverflow);
        }
        Ok(RegValue::Uint64(result as u64))
    } else {
        if result < i64::MIN as i128 {
            return Err(StorageError::ArithmeticOverflow);
        }
        Ok(RegValue::Int64(result as i64))
    }
}

pub fn add(a: RegValue, b: RegValue) -> StorageResult<RegValue> {
    combine_add_sub(a, b, false)
}

pub fn sub(a: RegValue, b: RegValue) -> StorageResult<RegValue> {
    combine_add_sub(a, b, true)
}

/// The product's sign determines the output representation: nonnegative
/// maps to unsigned (matching same-sign operands), negative to signed.
pub fn mul(a: RegValue, b: RegValue) -> StorageResult<RegValue> {
    if matches!(a, RegValue::Double(_)) || matches!(b, RegValue::Double(_)) {
        return Ok(RegValue::Double(to_f64(a) * to_f64(b)));
    }
    let wa = widen(a).ok_or(StorageError::ArithmeticOverflow)?;
    let wb = widen(b).ok_or(StorageError::ArithmeticOverflow)?;
    let product = wa * wb;
    if product >= 0 {
        if product > u64::MAX as i128 {
            return Err(StorageError::ArithmeticOverflow);
        }
        Ok(RegValue::Uint64(product as u64))
    } else {
        if product < i64::MIN as i128 {
            return Err(StorageError::ArithmeticOverflow);
        }
        Ok(RegValue::Int64(product as i64))
    }
}

/// True division: always promotes to `double`, matching SQL's `/`.
/// Caller is responsible for the divide-by-zero-is-NULL rule.
pub fn true_div(a: RegValue, b: RegValue) -> RegValue {
    RegValue::Double(to_f64(a) / to_f64(b))
}

/// Integer-preserving division: normalises both operands to unsigned
/// magnitudes, divides, and re-signs the quotient. Caller must have
/// already handled `b == 0` (division by zero is NULL, not an error).
pub fn div_int(a: RegValue, b: RegValue) -> StorageResult<RegValue> {
    let (au, a_neg) = magnitude(a);
    let (bu, b_neg) = magnitude(b);
    let q = au / bu;
    let negative = a_neg != b_neg;
    if negative {
        if q > i64::MIN.unsigned_abs() {
            return Err(StorageError::ArithmeticOverflow);
        }
        Ok(RegValue::Int64((-(q as i128)) as i64))
    } else {
        Ok(RegValue::Uint64(q))
    }
}

/// Modulo follows the dividend's signedness. Caller must have already
/// handled `b == 0`.
pub fn modulo(a: RegValue, b: RegValue) -> StorageResult<RegValue> {
    let (au, a_neg) = magnitude(a);
    let (bu, _) = magnitude(b);
    let r = au % bu;
    if a_neg {
        Ok(RegValue::Int64((-(r as i128)) as i64))
    } else {
        Ok(RegValue::Uint64(r))
    }
}

/// Typed ordering used for `Max`/`Min` aggregation and result merging.
/// Always computes the true maximum/minimum, including across mixed
/// signedness.
pub fn compare(a: RegValue, b: RegValue) -> std::cmp::Ordering {
    if let (Some(wa), Some(wb)) = (widen(a), widen(b)) {
        return wa.cmp(&wb);
    }
    to_f64(a).partial_cmp(&to_f64(b)).unwrap_or(std::cmp::Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_overflow_detected_by_sign_flip() {
        let a = RegValue::Int64(i64::MAX);
        let b = RegValue::Int64(1);
        assert!(add(a, b).is_err());
    }

    #[test]
    fn mixed_sign_addition_promotes_to_unsigned_when_it_fits() {
        let a = RegValue::Uint64(u64::MAX);
        let b = RegValue::Int64(-5);
        let result = add(a, b).unwrap();
        assert_eq!(result, RegValue::Uint64(u64::MAX - 5));
    }

    #[test]
    fn division_by_true_div_always_yields_double() {
        let a = RegValue::Int64(7);
        let b = RegValue::Int64(2);
        assert_eq!(true_div(a, b), RegValue::Double(3.5));
    }

    #[test]
    fn div_int_reapplies_dividend_xor_divisor_sign() {
        let a = RegValue::Int64(-7);
        let b = RegValue::Int64(2);
        assert_eq!(div_int(a, b).unwrap(), RegValue::Int64(-3));
    }

    #[test]
    fn modulo_follows_dividend_sign() {
        let a = RegValue::Int64(-7);
        let b = RegValue::Uint64(2);
        assert_eq!(modulo(a, b).unwrap(), RegValue::Int64(-1));
    }
}
