//! Runtime values produced by expression evaluation

use bytescope_ir::Value;
use bytescope_schema::BinOp;
use std::cmp::Ordering;
use std::fmt;

/// Result of evaluating an expression
///
/// `Unknown` is the fallback for anything that could not be resolved. It
/// propagates through operators and is read as `0` or `false` where a
/// concrete value is required.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Int(i128),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Unknown,
}

impl EvalValue {
    /// Integer view (`true` counts as 1)
    pub fn as_int(&self) -> Option<i128> {
        match self {
            EvalValue::Int(v) => Some(*v),
            EvalValue::Bool(b) => Some(i128::from(*b)),
            #[allow(clippy::cast_possible_truncation)]
            EvalValue::Float(f) if f.is_finite() => Some(f.trunc() as i128),
            _ => None,
        }
    }

    /// Boolean view (non-zero integers are true)
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EvalValue::Bool(b) => Some(*b),
            EvalValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Whether the value is the unresolved sentinel
    pub fn is_unknown(&self) -> bool {
        matches!(self, EvalValue::Unknown)
    }

    /// Length of byte and string values
    pub fn length(&self) -> Option<usize> {
        match self {
            EvalValue::Bytes(b) => Some(b.len()),
            EvalValue::Str(s) => Some(s.chars().count()),
            _ => None,
        }
    }

    /// Convert to a tree value
    pub fn to_value(&self) -> Value {
        match self {
            EvalValue::Int(v) => match u64::try_from(*v) {
                Ok(u) => Value::Unsigned(u),
                Err(_) => i64::try_from(*v).map_or(Value::Null, Value::Signed),
            },
            EvalValue::Float(f) => Value::Float(*f),
            EvalValue::Bool(b) => Value::Boolean(*b),
            EvalValue::Str(s) => Value::String(s.clone()),
            EvalValue::Bytes(b) => Value::Bytes(b.clone()),
            EvalValue::Unknown => Value::Null,
        }
    }

    /// Loose equality used by `==`, switch cases and `valid`
    pub fn loose_eq(&self, other: &EvalValue) -> Option<bool> {
        match (self, other) {
            (EvalValue::Unknown, _) | (_, EvalValue::Unknown) => None,
            (EvalValue::Str(a), EvalValue::Str(b)) => Some(a == b),
            (EvalValue::Bytes(a), EvalValue::Bytes(b)) => Some(a == b),
            (EvalValue::Bool(a), EvalValue::Bool(b)) => Some(a == b),
            _ => self.compare(other).map(|o| o == Ordering::Equal),
        }
    }

    /// Ordering between numbers, strings or byte arrays
    pub fn compare(&self, other: &EvalValue) -> Option<Ordering> {
        match (self, other) {
            (EvalValue::Int(a), EvalValue::Int(b)) => Some(a.cmp(b)),
            (EvalValue::Float(a), EvalValue::Float(b)) => a.partial_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (EvalValue::Int(a), EvalValue::Float(b)) => (*a as f64).partial_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (EvalValue::Float(a), EvalValue::Int(b)) => a.partial_cmp(&(*b as f64)),
            (EvalValue::Str(a), EvalValue::Str(b)) => Some(a.cmp(b)),
            (EvalValue::Bytes(a), EvalValue::Bytes(b)) => Some(a.cmp(b)),
            (EvalValue::Bool(a), EvalValue::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Apply a binary operator to evaluated operands
    pub fn binary(op: BinOp, lhs: &EvalValue, rhs: &EvalValue) -> EvalValue {
        let cmp = |pred: fn(Ordering) -> bool| {
            lhs.compare(rhs)
                .map_or(EvalValue::Unknown, |o| EvalValue::Bool(pred(o)))
        };

        match op {
            BinOp::Eq => lhs.loose_eq(rhs).map_or(EvalValue::Unknown, EvalValue::Bool),
            BinOp::Ne => lhs
                .loose_eq(rhs)
                .map_or(EvalValue::Unknown, |e| EvalValue::Bool(!e)),
            BinOp::Lt => cmp(|o| o == Ordering::Less),
            BinOp::Le => cmp(|o| o != Ordering::Greater),
            BinOp::Gt => cmp(|o| o == Ordering::Greater),
            BinOp::Ge => cmp(|o| o != Ordering::Less),
            BinOp::Add => match (lhs, rhs) {
                (EvalValue::Str(a), EvalValue::Str(b)) => EvalValue::Str(format!("{a}{b}")),
                _ => arithmetic(lhs, rhs, i128::checked_add, |a, b| a + b),
            },
            BinOp::Sub => arithmetic(lhs, rhs, i128::checked_sub, |a, b| a - b),
            BinOp::Mul => arithmetic(lhs, rhs, i128::checked_mul, |a, b| a * b),
            BinOp::Div => arithmetic(lhs, rhs, i128::checked_div_euclid, |a, b| {
                if b == 0.0 { f64::NAN } else { a / b }
            }),
            BinOp::Mod => integer(lhs, rhs, i128::checked_rem_euclid),
            BinOp::Shl => integer(lhs, rhs, |a, b| {
                u32::try_from(b).ok().filter(|s| *s < 127).and_then(|s| a.checked_shl(s))
            }),
            BinOp::Shr => integer(lhs, rhs, |a, b| {
                u32::try_from(b).ok().filter(|s| *s < 128).and_then(|s| a.checked_shr(s))
            }),
            BinOp::BitAnd => integer(lhs, rhs, |a, b| Some(a & b)),
            BinOp::BitOr => integer(lhs, rhs, |a, b| Some(a | b)),
            BinOp::And | BinOp::Or => match (lhs.as_bool(), rhs.as_bool()) {
                (Some(a), Some(b)) if op == BinOp::And => EvalValue::Bool(a && b),
                (Some(a), Some(b)) => EvalValue::Bool(a || b),
                _ => EvalValue::Unknown,
            },
        }
    }
}

fn arithmetic(
    lhs: &EvalValue,
    rhs: &EvalValue,
    int_op: fn(i128, i128) -> Option<i128>,
    float_op: fn(f64, f64) -> f64,
) -> EvalValue {
    match (lhs, rhs) {
        (EvalValue::Float(_), _) | (_, EvalValue::Float(_)) => {
            match (as_float(lhs), as_float(rhs)) {
                (Some(a), Some(b)) => {
                    let result = float_op(a, b);
                    if result.is_nan() {
                        EvalValue::Unknown
                    } else {
                        EvalValue::Float(result)
                    }
                }
                _ => EvalValue::Unknown,
            }
        }
        _ => integer(lhs, rhs, int_op),
    }
}

fn integer(lhs: &EvalValue, rhs: &EvalValue, op: impl Fn(i128, i128) -> Option<i128>) -> EvalValue {
    match (lhs, rhs) {
        (EvalValue::Int(a), EvalValue::Int(b)) => op(*a, *b).map_or(EvalValue::Unknown, EvalValue::Int),
        _ => EvalValue::Unknown,
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_float(value: &EvalValue) -> Option<f64> {
    match value {
        EvalValue::Float(f) => Some(*f),
        EvalValue::Int(v) => Some(*v as f64),
        _ => None,
    }
}

impl From<&Value> for EvalValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Unsigned(v) => EvalValue::Int(i128::from(*v)),
            Value::Signed(v) => EvalValue::Int(i128::from(*v)),
            Value::Enum { value, .. } => EvalValue::Int(i128::from(*value)),
            Value::Float(f) => EvalValue::Float(*f),
            Value::Boolean(b) => EvalValue::Bool(*b),
            Value::String(s) => EvalValue::Str(s.clone()),
            Value::Bytes(b) => EvalValue::Bytes(b.clone()),
            Value::Null => EvalValue::Unknown,
        }
    }
}

impl fmt::Display for EvalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalValue::Int(v) => write!(f, "{v}"),
            EvalValue::Float(v) => write!(f, "{v}"),
            EvalValue::Bool(b) => write!(f, "{b}"),
            EvalValue::Str(s) => write!(f, "\"{s}\""),
            EvalValue::Bytes(bytes) => {
                f.write_str("[")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{b:02X}")?;
                }
                f.write_str("]")
            }
            EvalValue::Unknown => f.write_str("unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_and_overflow() {
        let v = EvalValue::Int;
        assert_eq!(EvalValue::binary(BinOp::Add, &v(2), &v(3)), v(5));
        assert_eq!(EvalValue::binary(BinOp::Div, &v(7), &v(2)), v(3));
        assert_eq!(EvalValue::binary(BinOp::Div, &v(1), &v(0)), EvalValue::Unknown);
        assert_eq!(EvalValue::binary(BinOp::Mod, &v(-1), &v(4)), v(3));
        assert_eq!(EvalValue::binary(BinOp::Shl, &v(1), &v(200)), EvalValue::Unknown);
        assert_eq!(EvalValue::binary(BinOp::Mul, &v(i128::MAX), &v(2)), EvalValue::Unknown);
        assert_eq!(
            EvalValue::binary(BinOp::Add, &v(1), &EvalValue::Float(0.5)),
            EvalValue::Float(1.5)
        );
    }

    #[test]
    fn test_comparisons() {
        let v = EvalValue::Int;
        assert_eq!(EvalValue::binary(BinOp::Lt, &v(1), &v(2)), EvalValue::Bool(true));
        assert_eq!(EvalValue::binary(BinOp::Ge, &v(1), &v(2)), EvalValue::Bool(false));
        assert_eq!(
            EvalValue::binary(
                BinOp::Eq,
                &EvalValue::Str("IHDR".into()),
                &EvalValue::Str("IHDR".into())
            ),
            EvalValue::Bool(true)
        );
        assert_eq!(
            EvalValue::binary(BinOp::Eq, &v(1), &EvalValue::Str("1".into())),
            EvalValue::Unknown
        );
        assert_eq!(EvalValue::binary(BinOp::Ne, &v(1), &EvalValue::Unknown), EvalValue::Unknown);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(EvalValue::from(&Value::Unsigned(7)), EvalValue::Int(7));
        assert_eq!(EvalValue::from(&Value::Null), EvalValue::Unknown);
        assert_eq!(EvalValue::Int(-2).to_value(), Value::Signed(-2));
        assert_eq!(EvalValue::Int(2).to_value(), Value::Unsigned(2));
        assert_eq!(EvalValue::Bool(true).as_int(), Some(1));
        assert_eq!(EvalValue::Int(0).as_bool(), Some(false));
        assert_eq!(EvalValue::Bytes(vec![0xAB, 0x01]).to_string(), "[AB 01]");
    }
}
