//! Arithmetic, comparison and membership operators.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::value::{
    compare_error, py_cmp, py_eq, py_is, DictFlavor, Exc, Num, PyDict, Table, Value,
    MAX_SEQUENCE,
};

pub fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, Exc> {
    if let (Value::Bool(p), Value::Bool(q)) = (a, b) {
        match op {
            BinOp::BitAnd => return Ok(Value::Bool(p & q)),
            BinOp::BitOr => return Ok(Value::Bool(p | q)),
            BinOp::BitXor => return Ok(Value::Bool(p ^ q)),
            _ => {}
        }
    }
    if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
        return match (x, y) {
            (Num::Int(x), Num::Int(y)) => int_op(op, x, y),
            (x @ Num::Float(_), y) | (x, y @ Num::Float(_)) => {
                float_op(op, x.as_f64(), y.as_f64(), a, b)
            }
            (x, y) => match (x.to_bigint(), y.to_bigint()) {
                (Some(x), Some(y)) => big_op(op, &x, &y),
                _ => Err(unsupported(op, a, b)),
            },
        };
    }

    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            let mut joined = String::with_capacity(x.len() + y.len());
            joined.push_str(x);
            joined.push_str(y);
            Ok(Value::str(&joined))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            let mut items = x.as_ref().clone();
            items.extend(y.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinOp::Add, Value::Str(_) | Value::List(_) | Value::Tuple(_), other) => {
            let kind = a.type_name();
            Err(Exc::type_error(format!(
                "can only concatenate {kind} (not \"{}\") to {kind}",
                other.type_name()
            )))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let count = repeat_count(n, s.chars().count())?;
            Ok(Value::str(&s.repeat(count)))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if n.as_int().is_some() =>
        {
            let items = items.borrow();
            let count = repeat_count(n, items.len())?;
            Ok(Value::list(repeat_items(&items, count)))
        }
        (BinOp::Mul, Value::Tuple(items), n) | (BinOp::Mul, n, Value::Tuple(items))
            if n.as_int().is_some() =>
        {
            let count = repeat_count(n, items.len())?;
            Ok(Value::tuple(repeat_items(items, count)))
        }
        (BinOp::Sub | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor, Value::Set(x), Value::Set(y)) => {
            Ok(Value::set(set_op(op, &x.borrow(), &y.borrow())))
        }
        (BinOp::BitOr, Value::Dict(x), Value::Dict(y)) => {
            let mut merged = x.borrow().clone();
            for (key, value) in y.borrow().table.iter() {
                merged.table.insert(key.hash_key()?, key.clone(), value.clone());
            }
            Ok(Value::dict(merged))
        }
        (BinOp::Add | BinOp::Sub, Value::Dict(x), Value::Dict(y))
            if matches!(x.borrow().flavor, DictFlavor::Counter)
                && matches!(y.borrow().flavor, DictFlavor::Counter) =>
        {
            counter_op(op, &x.borrow(), &y.borrow())
        }
        _ => Err(unsupported(op, a, b)),
    }
}

fn unsupported(op: BinOp, a: &Value, b: &Value) -> Exc {
    Exc::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

fn repeat_count(n: &Value, unit: usize) -> Result<usize, Exc> {
    let count = n.as_int().unwrap_or(0).max(0) as usize;
    if unit.saturating_mul(count) > MAX_SEQUENCE {
        return Err(Exc::new("MemoryError", "sequence repetition too large"));
    }
    Ok(count)
}

fn repeat_items(items: &[Value], count: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

pub fn set_op(op: BinOp, x: &Table, y: &Table) -> Table {
    let mut out = Table::default();
    let mut keep = |key: &Value| {
        if let Ok(hash) = key.hash_key() {
            out.insert(hash, key.clone(), Value::None);
        }
    };
    match op {
        BinOp::BitOr => {
            x.iter().for_each(|(k, _)| keep(k));
            y.iter().for_each(|(k, _)| keep(k));
        }
        BinOp::BitAnd => x
            .iter()
            .filter(|(k, _)| k.hash_key().is_ok_and(|h| y.contains(&h)))
            .for_each(|(k, _)| keep(k)),
        BinOp::Sub => x
            .iter()
            .filter(|(k, _)| !k.hash_key().is_ok_and(|h| y.contains(&h)))
            .for_each(|(k, _)| keep(k)),
        _ => {
            x.iter()
                .filter(|(k, _)| !k.hash_key().is_ok_and(|h| y.contains(&h)))
                .for_each(|(k, _)| keep(k));
            y.iter()
                .filter(|(k, _)| !k.hash_key().is_ok_and(|h| x.contains(&h)))
                .for_each(|(k, _)| keep(k));
        }
    }
    out
}

fn counter_op(op: BinOp, x: &PyDict, y: &PyDict) -> Result<Value, Exc> {
    let mut out = PyDict::new(DictFlavor::Counter);
    let mut keys: Vec<Value> = x.table.keys();
    for key in y.table.keys() {
        if !x.table.contains(&key.hash_key()?) {
            keys.push(key);
        }
    }
    for key in keys {
        let hash = key.hash_key()?;
        let left = x.table.get(&hash).cloned().unwrap_or(Value::Int(0));
        let right = y.table.get(&hash).cloned().unwrap_or(Value::Int(0));
        let total = binary(op, &left, &right)?;
        if py_cmp(&total, &Value::Int(0)) == Some(Ordering::Greater) {
            out.table.insert(hash, key, total);
        }
    }
    Ok(Value::dict(out))
}

fn int_op(op: BinOp, a: i64, b: i64) -> Result<Value, Exc> {
    let promote = || big_op(op, &BigInt::from(a), &BigInt::from(b));
    let value = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(Exc::zero_division("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(Exc::zero_division("integer division or modulo by zero"));
            }
            floor_div(a, b).ok()
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(Exc::zero_division("integer modulo by zero"));
            }
            floor_mod(a, b).ok()
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(Exc::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp))
        }
        BinOp::BitAnd => Some(a & b),
        BinOp::BitOr => Some(a | b),
        BinOp::BitXor => Some(a ^ b),
        BinOp::LShift => {
            if b < 0 {
                return Err(Exc::value_error("negative shift count"));
            }
            if a == 0 {
                Some(0)
            } else if b >= 64 {
                None
            } else {
                i64::try_from(i128::from(a) << b).ok()
            }
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(Exc::value_error("negative shift count"));
            }
            Some(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
        }
    };
    match value {
        Some(value) => Ok(Value::Int(value)),
        None => promote(),
    }
}

/// Largest integer result, in bits, the interpreter will materialize.
const MAX_INT_BITS: u64 = 1 << 24;

fn too_large() -> Exc {
    Exc::new("MemoryError", "integer result too large")
}

/// Integer arithmetic past the 64-bit range.
fn big_op(op: BinOp, a: &BigInt, b: &BigInt) -> Result<Value, Exc> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => {
            if a.bits() + b.bits() > MAX_INT_BITS {
                return Err(too_large());
            }
            a * b
        }
        BinOp::Div => {
            if b.is_zero() {
                return Err(Exc::zero_division("division by zero"));
            }
            let quotient = a.to_f64().unwrap_or(f64::NAN) / b.to_f64().unwrap_or(f64::NAN);
            if !quotient.is_finite() {
                return Err(Exc::new(
                    "OverflowError",
                    "integer division result too large for a float",
                ));
            }
            return Ok(Value::Float(quotient));
        }
        BinOp::FloorDiv => {
            if b.is_zero() {
                return Err(Exc::zero_division("integer division or modulo by zero"));
            }
            a.div_floor(b)
        }
        BinOp::Mod => {
            if b.is_zero() {
                return Err(Exc::zero_division("integer modulo by zero"));
            }
            a.mod_floor(b)
        }
        BinOp::Pow => {
            if b.is_negative() {
                if a.is_zero() {
                    return Err(Exc::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                let base = a.to_f64().unwrap_or(f64::NAN);
                return Ok(Value::Float(base.powf(b.to_f64().unwrap_or(f64::NAN))));
            }
            if a.is_zero() || a.magnitude().bits() <= 1 {
                // 0, 1 and -1 stay small for any exponent
                let odd = b.is_odd();
                return Ok(Value::from_bigint(if a.is_negative() && !odd {
                    -a.clone()
                } else if b.is_zero() {
                    BigInt::from(1)
                } else {
                    a.clone()
                }));
            }
            let exp = b.to_u32().ok_or_else(too_large)?;
            if a.bits().saturating_mul(u64::from(exp)) > MAX_INT_BITS {
                return Err(too_large());
            }
            a.pow(exp)
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::LShift => {
            if b.is_negative() {
                return Err(Exc::value_error("negative shift count"));
            }
            if a.is_zero() {
                return Ok(Value::Int(0));
            }
            let shift = b
                .to_u64()
                .filter(|shift| a.bits() + shift <= MAX_INT_BITS)
                .ok_or_else(too_large)?;
            a << shift
        }
        BinOp::RShift => {
            if b.is_negative() {
                return Err(Exc::value_error("negative shift count"));
            }
            match b.to_u64().filter(|shift| *shift < a.bits()) {
                Some(shift) => a >> shift,
                None => BigInt::from(if a.is_negative() { -1 } else { 0 }),
            }
        }
    };
    Ok(Value::from_bigint(value))
}

pub fn floor_div(a: i64, b: i64) -> Result<i64, Exc> {
    let q = a.checked_div(b).ok_or_else(Exc::overflow)?;
    let r = a.checked_rem(b).ok_or_else(Exc::overflow)?;
    Ok(if r != 0 && ((r < 0) != (b < 0)) { q - 1 } else { q })
}

pub fn floor_mod(a: i64, b: i64) -> Result<i64, Exc> {
    let r = a.checked_rem(b).ok_or_else(Exc::overflow)?;
    Ok(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
}

fn float_op(op: BinOp, x: f64, y: f64, a: &Value, b: &Value) -> Result<Value, Exc> {
    let value = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(Exc::zero_division("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(Exc::zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(Exc::zero_division("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(Exc::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Err(Exc::value_error("math domain error"));
            }
            x.powf(y)
        }
        _ => return Err(unsupported(op, a, b)),
    };
    Ok(Value::Float(value))
}

pub fn unary(op: UnaryOp, value: &Value) -> Result<Value, Exc> {
    match (op, value.as_num()) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!value.truthy())),
        (UnaryOp::Neg, Some(Num::Int(i))) => Ok(match i.checked_neg() {
            Some(negated) => Value::Int(negated),
            None => Value::from_bigint(-BigInt::from(i)),
        }),
        (UnaryOp::Neg, Some(Num::Big(n))) => Ok(Value::from_bigint(-n)),
        (UnaryOp::Pos, Some(Num::Big(n))) => Ok(Value::from_bigint(n)),
        (UnaryOp::Invert, Some(Num::Big(n))) => Ok(Value::from_bigint(-n - 1)),
        (UnaryOp::Neg, Some(Num::Float(f))) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Some(Num::Int(i))) => Ok(Value::Int(i)),
        (UnaryOp::Pos, Some(Num::Float(f))) => Ok(Value::Float(f)),
        (UnaryOp::Invert, Some(Num::Int(i))) => Ok(Value::Int(!i)),
        _ => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                _ => "~",
            };
            Err(Exc::type_error(format!(
                "bad operand type for unary {symbol}: '{}'",
                value.type_name()
            )))
        }
    }
}

/// `item in container`
pub fn contains(container: &Value, item: &Value) -> Result<bool, Exc> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
            other => Err(Exc::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| py_eq(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| py_eq(v, item))),
        Value::Deque(items) => Ok(items.borrow().iter().any(|v| py_eq(v, item))),
        Value::Dict(dict) => Ok(dict.borrow().table.contains(&item.hash_key()?)),
        Value::Set(table) => Ok(table.borrow().contains(&item.hash_key()?)),
        Value::Range(range) => Ok(match item.as_num() {
            Some(Num::Int(i)) => range.contains(i),
            Some(Num::Float(f)) if f.fract() == 0.0 => range.contains(f as i64),
            _ => false,
        }),
        Value::Iter(it) => {
            let it = it.borrow();
            Ok(it.items[it.pos.min(it.items.len())..]
                .iter()
                .any(|v| py_eq(v, item)))
        }
        other => Err(Exc::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, Exc> {
    let ordered = |symbol: &str, test: fn(Ordering) -> bool| {
        py_cmp(a, b)
            .map(test)
            .ok_or_else(|| compare_error(symbol, a, b))
    };
    match op {
        CmpOp::Eq => Ok(py_eq(a, b)),
        CmpOp::NotEq => Ok(!py_eq(a, b)),
        CmpOp::Lt => ordered("<", Ordering::is_lt),
        CmpOp::LtE => ordered("<=", Ordering::is_le),
        CmpOp::Gt => ordered(">", Ordering::is_gt),
        CmpOp::GtE => ordered(">=", Ordering::is_ge),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => contains(b, a).map(|found| !found),
        CmpOp::Is => Ok(py_is(a, b)),
        CmpOp::IsNot => Ok(!py_is(a, b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_floor_division_and_modulo_follow_sign_of_divisor() {
        assert_eq!(binary(BinOp::FloorDiv, &int(-7), &int(2)).unwrap().repr(), "-4");
        assert_eq!(binary(BinOp::Mod, &int(-7), &int(2)).unwrap().repr(), "1");
        assert_eq!(binary(BinOp::Mod, &int(7), &int(-2)).unwrap().repr(), "-1");
        assert_eq!(binary(BinOp::Div, &int(7), &int(2)).unwrap().repr(), "3.5");
    }

    #[test]
    fn test_division_by_zero() {
        let err = binary(BinOp::Div, &int(1), &int(0)).unwrap_err();
        assert_eq!(err.kind, "ZeroDivisionError");
        assert_eq!(err.message, "division by zero");
    }

    #[test]
    fn test_concatenation_errors() {
        let err = binary(BinOp::Add, &Value::str("a"), &int(1)).unwrap_err();
        assert_eq!(err.message, "can only concatenate str (not \"int\") to str");
        let err = binary(BinOp::Add, &int(1), &Value::str("a")).unwrap_err();
        assert_eq!(
            err.message,
            "unsupported operand type(s) for +: 'int' and 'str'"
        );
    }

    #[test]
    fn test_sequence_repetition() {
        let list = Value::list(vec![int(0)]);
        assert_eq!(binary(BinOp::Mul, &list, &int(3)).unwrap().repr(), "[0, 0, 0]");
        assert_eq!(binary(BinOp::Mul, &int(2), &Value::str("ab")).unwrap().repr(), "'abab'");
    }

    #[test]
    fn test_integers_grow_past_64_bits() {
        let big = binary(BinOp::Pow, &int(2), &int(64)).unwrap();
        assert_eq!(big.repr(), "18446744073709551616");
        assert_eq!(big.type_name(), "int");

        let product = binary(BinOp::Mul, &int(1_000_000_000_000_000_000), &int(10)).unwrap();
        assert_eq!(product.repr(), "10000000000000000000");

        // results that fit again come back as plain ints
        let back = binary(BinOp::FloorDiv, &big, &int(4)).unwrap();
        assert!(matches!(back, Value::Int(4_611_686_018_427_387_904)));
        assert_eq!(binary(BinOp::Mod, &big, &int(7)).unwrap().repr(), "2");
        assert_eq!(binary(BinOp::Sub, &big, &big).unwrap().repr(), "0");
        assert_eq!(unary(UnaryOp::Neg, &int(i64::MIN)).unwrap().repr(), "9223372036854775808");
    }

    #[test]
    fn test_big_integers_compare_with_small_ones() {
        let big = binary(BinOp::Pow, &int(10), &int(20)).unwrap();
        assert!(compare(CmpOp::Gt, &big, &int(i64::MAX)).unwrap());
        assert!(compare(CmpOp::Eq, &big, &Value::Float(1e20)).unwrap());
        assert_eq!(
            big.hash_key().unwrap(),
            Value::Float(1e20).hash_key().unwrap()
        );
        assert_eq!(binary(BinOp::Div, &big, &int(10)).unwrap().repr(), "1e+19");
    }

    #[test]
    fn test_unbounded_growth_is_refused() {
        let err = binary(BinOp::Pow, &int(3), &int(1 << 40)).unwrap_err();
        assert_eq!(err.kind, "MemoryError");
    }

    #[test]
    fn test_membership() {
        let list = Value::list(vec![int(1), int(2)]);
        assert!(contains(&list, &int(2)).unwrap());
        assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap());
        assert!(contains(&int(3), &int(1)).is_err());
    }

    #[test]
    fn test_ordering_error_message() {
        let err = compare(CmpOp::Lt, &int(1), &Value::str("a")).unwrap_err();
        assert_eq!(
            err.message,
            "'<' not supported between instances of 'int' and 'str'"
        );
    }
}
