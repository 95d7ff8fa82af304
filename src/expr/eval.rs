//! Row-at-a-time evaluation of parsed rule expressions.
//!
//! Null semantics: any `Null` operand of an operator, `abs` or `round` yields `Null`. The
//! aggregate functions (`max`, `min`, `sum`) skip `Null` arguments and return `Null` only when
//! every argument is `Null`.

use std::fmt;
use std::str::FromStr;

use crate::error::{EvalError, EvalResult};
use crate::types::Value;

use super::ast::{BinaryOp, Expr, Function};

/// What `x / 0` evaluates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DivisionByZeroPolicy {
    /// The result is `Null` and the row is not reported.
    #[default]
    Null,
    /// The row is recorded as failed with [`EvalError::DivisionByZero`].
    Fail,
}

impl FromStr for DivisionByZeroPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null" => Ok(Self::Null),
            "fail" | "error" => Ok(Self::Fail),
            other => Err(format!("unknown division-by-zero policy '{other}' (expected null|fail)")),
        }
    }
}

impl fmt::Display for DivisionByZeroPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Fail => f.write_str("fail"),
        }
    }
}

/// Evaluates expressions against a row of values.
///
/// Stateless apart from its policy, so one evaluator is shared by every worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    division_by_zero: DivisionByZeroPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(v) => v as f64,
            Num::Float(v) => v,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(v) => Value::Int64(v),
            Num::Float(v) => Value::Float64(v),
        }
    }
}

/// `Ok(None)` for null, `Err` for non-numeric values.
fn numeric(value: &Value, operation: &'static str) -> EvalResult<Option<Num>> {
    match value {
        Value::Null => Ok(None),
        Value::Int64(v) => Ok(Some(Num::Int(*v))),
        Value::Float64(v) => Ok(Some(Num::Float(*v))),
        other => Err(EvalError::TypeMismatch {
            operation,
            found: other.type_name(),
        }),
    }
}

impl Evaluator {
    pub fn new(division_by_zero: DivisionByZeroPolicy) -> Self {
        Self { division_by_zero }
    }

    pub fn division_by_zero(&self) -> DivisionByZeroPolicy {
        self.division_by_zero
    }

    /// Evaluate `expr` against `row`, whose positions are the slots bound into the expression.
    ///
    /// A slot past the end of the row reads as `Null`.
    pub fn evaluate(&self, expr: &Expr, row: &[Value]) -> EvalResult<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column { slot, .. } => Ok(row.get(*slot).cloned().unwrap_or(Value::Null)),
            Expr::Negate(inner) => {
                let v = self.evaluate(inner, row)?;
                Ok(match numeric(&v, "-")? {
                    None => Value::Null,
                    Some(Num::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int64)
                        .unwrap_or(Value::Float64(-(i as f64))),
                    Some(Num::Float(f)) => Value::Float64(-f),
                })
            }
            Expr::Binary { op, left, right } => {
                let l = self.evaluate(left, row)?;
                let r = self.evaluate(right, row)?;
                self.binary(*op, &l, &r)
            }
            Expr::Call { func, args } => {
                let values = args
                    .iter()
                    .map(|a| self.evaluate(a, row))
                    .collect::<EvalResult<Vec<_>>>()?;
                call(*func, &values)
            }
        }
    }

    fn binary(&self, op: BinaryOp, l: &Value, r: &Value) -> EvalResult<Value> {
        if l.is_null() || r.is_null() {
            return Ok(Value::Null);
        }
        let (Some(a), Some(b)) = (numeric(l, op.symbol())?, numeric(r, op.symbol())?) else {
            return Ok(Value::Null);
        };

        let out = match (op, a, b) {
            (BinaryOp::Div, _, _) => {
                let divisor = b.as_f64();
                if divisor == 0.0 {
                    return match self.division_by_zero {
                        DivisionByZeroPolicy::Null => Ok(Value::Null),
                        DivisionByZeroPolicy::Fail => Err(EvalError::DivisionByZero),
                    };
                }
                Num::Float(a.as_f64() / divisor)
            }
            (_, Num::Int(x), Num::Int(y)) => {
                let checked = match op {
                    BinaryOp::Add => x.checked_add(y),
                    BinaryOp::Sub => x.checked_sub(y),
                    _ => x.checked_mul(y),
                };
                match checked {
                    Some(v) => Num::Int(v),
                    None => Num::Float(float_op(op, x as f64, y as f64)),
                }
            }
            _ => Num::Float(float_op(op, a.as_f64(), b.as_f64())),
        };
        Ok(out.into_value())
    }
}

fn float_op(op: BinaryOp, x: f64, y: f64) -> f64 {
    match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
    }
}

fn call(func: Function, args: &[Value]) -> EvalResult<Value> {
    match func {
        Function::Max => extreme(func, args, |candidate, best| candidate > best),
        Function::Min => extreme(func, args, |candidate, best| candidate < best),
        Function::Sum => sum(args),
        Function::Abs => {
            let Some(x) = args.first() else {
                return Ok(Value::Null);
            };
            Ok(match numeric(x, "abs")? {
                None => Value::Null,
                Some(Num::Int(i)) => i
                    .checked_abs()
                    .map(Value::Int64)
                    .unwrap_or(Value::Float64((i as f64).abs())),
                Some(Num::Float(f)) => Value::Float64(f.abs()),
            })
        }
        Function::Round => round(args),
    }
}

/// `max`/`min`: the first argument that beats every other non-null one, returned unconverted.
fn extreme(func: Function, args: &[Value], beats: impl Fn(f64, f64) -> bool) -> EvalResult<Value> {
    let mut best: Option<(f64, &Value)> = None;
    for arg in args {
        let Some(n) = numeric(arg, func.name())? else {
            continue;
        };
        let candidate = n.as_f64();
        match best {
            Some((current, _)) if !beats(candidate, current) => {}
            _ => best = Some((candidate, arg)),
        }
    }
    Ok(best.map(|(_, v)| v.clone()).unwrap_or(Value::Null))
}

fn sum(args: &[Value]) -> EvalResult<Value> {
    let mut acc: Option<Num> = None;
    for arg in args {
        let Some(n) = numeric(arg, "sum")? else {
            continue;
        };
        acc = Some(match (acc, n) {
            (None, n) => n,
            (Some(Num::Int(a)), Num::Int(b)) => a
                .checked_add(b)
                .map(Num::Int)
                .unwrap_or(Num::Float(a as f64 + b as f64)),
            (Some(a), b) => Num::Float(a.as_f64() + b.as_f64()),
        });
    }
    Ok(acc.map(Num::into_value).unwrap_or(Value::Null))
}

fn round(args: &[Value]) -> EvalResult<Value> {
    let Some(x) = args.first() else {
        return Ok(Value::Null);
    };
    let Some(x) = numeric(x, "round")? else {
        return Ok(Value::Null);
    };

    let digits = match args.get(1) {
        None => 0,
        Some(n) => match numeric(n, "round")? {
            None => return Ok(Value::Null),
            Some(Num::Int(n)) => n,
            Some(Num::Float(f)) if f.is_finite() && f.fract() == 0.0 => f as i64,
            Some(Num::Float(f)) => {
                return Err(EvalError::InvalidArgument {
                    function: "round",
                    message: format!("digits must be an integer, got {f}"),
                });
            }
        },
    };

    Ok(match x {
        Num::Int(i) if digits >= 0 => Value::Int64(i),
        Num::Int(i) => round_int(i, digits.unsigned_abs()),
        Num::Float(f) => Value::Float64(round_float(f, digits)),
    })
}

/// Half-to-even rounding of an integer to a multiple of `10^places`.
fn round_int(x: i64, places: u64) -> Value {
    // |x| < 5 * 10^19, so anything coarser rounds to zero.
    if places > 19 {
        return Value::Int64(0);
    }
    let factor = 10i128.pow(places as u32);
    let wide = x as i128;
    let mut q = wide / factor;
    let twice_rem = (wide % factor).abs() * 2;
    if twice_rem > factor || (twice_rem == factor && q % 2 != 0) {
        q += wide.signum();
    }
    let rounded = q * factor;
    i64::try_from(rounded)
        .map(Value::Int64)
        .unwrap_or(Value::Float64(rounded as f64))
}

/// Half-to-even rounding of a float on the decimal scale given by `digits`.
fn round_float(x: f64, digits: i64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    if digits == 0 {
        return x.round_ties_even();
    }
    let places = digits.unsigned_abs().min(400) as i32;
    let scale = 10f64.powi(places);
    if digits > 0 {
        let scaled = x * scale;
        if !scaled.is_finite() {
            return x;
        }
        scaled.round_ties_even() / scale
    } else {
        if !scale.is_finite() {
            return 0.0;
        }
        (x / scale).round_ties_even() * scale
    }
}

#[cfg(test)]
mod tests {
    use super::{DivisionByZeroPolicy, Evaluator};
    use crate::error::EvalError;
    use crate::expr::parse_expression;
    use crate::types::{DataType, Field, Schema, Value};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("price", DataType::Float64),
            Field::new("qty", DataType::Int64),
            Field::new("total", DataType::Float64),
            Field::new("name", DataType::Utf8),
        ])
    }

    fn eval_with(policy: DivisionByZeroPolicy, text: &str, row: &[Value]) -> Result<Value, EvalError> {
        let expr = parse_expression(text, &schema()).unwrap();
        Evaluator::new(policy).evaluate(&expr, row)
    }

    fn eval(text: &str, row: &[Value]) -> Result<Value, EvalError> {
        eval_with(DivisionByZeroPolicy::Null, text, row)
    }

    fn row(price: Value, qty: Value, total: Value) -> Vec<Value> {
        vec![price, qty, total, Value::Utf8("widget".to_string())]
    }

    #[test]
    fn multiplies_and_propagates_nulls() {
        let full = row(Value::Int64(10), Value::Int64(2), Value::Null);
        assert_eq!(eval("price * qty", &full).unwrap(), Value::Int64(20));

        let missing = row(Value::Int64(5), Value::Null, Value::Null);
        assert_eq!(eval("price * qty", &missing).unwrap(), Value::Null);
        assert_eq!(eval("-qty", &missing).unwrap(), Value::Null);
        assert_eq!(eval("abs(qty)", &missing).unwrap(), Value::Null);
        assert_eq!(eval("round(qty, 2)", &missing).unwrap(), Value::Null);
    }

    #[test]
    fn max_with_zero_floor() {
        let pos = row(Value::Null, Value::Null, Value::Float64(20.0));
        assert_eq!(eval("max(0, total * 0.1)", &pos).unwrap(), Value::Float64(2.0));

        let neg = row(Value::Null, Value::Null, Value::Float64(-5.0));
        assert_eq!(eval("max(0, total * 0.1)", &neg).unwrap(), Value::Int64(0));
    }

    #[test]
    fn aggregates_skip_nulls_until_all_are_null() {
        let r = row(Value::Float64(1.5), Value::Null, Value::Int64(4));
        assert_eq!(eval("sum(price, qty, total)", &r).unwrap(), Value::Float64(5.5));
        assert_eq!(eval("min(price, qty, total)", &r).unwrap(), Value::Float64(1.5));
        assert_eq!(eval("max(price, qty, total)", &r).unwrap(), Value::Int64(4));
        assert_eq!(eval("sum(qty)", &r).unwrap(), Value::Null);
        assert_eq!(eval("max(qty, qty)", &r).unwrap(), Value::Null);
    }

    #[test]
    fn integer_arithmetic_widens_on_overflow() {
        let r = row(Value::Null, Value::Int64(i64::MAX), Value::Null);
        assert_eq!(eval("qty + 1", &r).unwrap(), Value::Float64(i64::MAX as f64 + 1.0));
        assert_eq!(eval("sum(qty, qty)", &r).unwrap(), Value::Float64(i64::MAX as f64 * 2.0));

        let r = row(Value::Null, Value::Int64(i64::MIN), Value::Null);
        assert_eq!(eval("abs(qty)", &r).unwrap(), Value::Float64(-(i64::MIN as f64)));
        assert_eq!(eval("-qty", &r).unwrap(), Value::Float64(-(i64::MIN as f64)));
    }

    #[test]
    fn division_is_float_division() {
        let r = row(Value::Null, Value::Int64(7), Value::Null);
        assert_eq!(eval("qty / 2", &r).unwrap(), Value::Float64(3.5));
    }

    #[test]
    fn division_by_zero_follows_policy() {
        let r = row(Value::Int64(10), Value::Int64(0), Value::Null);
        assert_eq!(eval("price / qty", &r).unwrap(), Value::Null);
        assert_eq!(eval("price / 0.0", &r).unwrap(), Value::Null);
        assert_eq!(
            eval_with(DivisionByZeroPolicy::Fail, "price / qty", &r).unwrap_err(),
            EvalError::DivisionByZero
        );
        // null wins over the zero divisor
        let r = row(Value::Null, Value::Int64(0), Value::Null);
        assert_eq!(eval_with(DivisionByZeroPolicy::Fail, "price / qty", &r).unwrap(), Value::Null);
    }

    #[test]
    fn text_operands_are_type_mismatches() {
        let r = row(Value::Int64(1), Value::Int64(1), Value::Null);
        assert_eq!(
            eval("name + 1", &r).unwrap_err(),
            EvalError::TypeMismatch {
                operation: "+",
                found: "utf8"
            }
        );
        assert!(matches!(eval("max(price, name)", &r), Err(EvalError::TypeMismatch { .. })));
        assert!(matches!(eval("abs(name)", &r), Err(EvalError::TypeMismatch { .. })));
    }

    #[test]
    fn round_is_half_to_even() {
        let r = row(Value::Null, Value::Null, Value::Null);
        assert_eq!(eval("round(2.5)", &r).unwrap(), Value::Float64(2.0));
        assert_eq!(eval("round(3.5)", &r).unwrap(), Value::Float64(4.0));
        assert_eq!(eval("round(-2.5)", &r).unwrap(), Value::Float64(-2.0));
        assert_eq!(eval("round(0.125, 2)", &r).unwrap(), Value::Float64(0.12));
        assert_eq!(eval("round(1234.5, -2)", &r).unwrap(), Value::Float64(1200.0));
        assert_eq!(eval("round(7)", &r).unwrap(), Value::Int64(7));
        assert_eq!(eval("round(25, -1)", &r).unwrap(), Value::Int64(20));
        assert_eq!(eval("round(35, -1)", &r).unwrap(), Value::Int64(40));
        assert_eq!(eval("round(-25, -1)", &r).unwrap(), Value::Int64(-20));
        assert_eq!(eval("round(1.5, 2.0)", &r).unwrap(), Value::Float64(1.5));
    }

    #[test]
    fn coarse_integer_rounding_widens_past_i64() {
        let r = row(Value::Null, Value::Null, Value::Null);
        assert_eq!(
            eval("round(9000000000000000000, -19)", &r).unwrap(),
            Value::Float64(1e19)
        );
        assert_eq!(eval("round(-9000000000000000000, -19)", &r).unwrap(), Value::Float64(-1e19));
        assert_eq!(eval("round(5000000000000000000, -19)", &r).unwrap(), Value::Int64(0));
        assert_eq!(eval("round(9000000000000000000, -18)", &r).unwrap(), Value::Int64(9_000_000_000_000_000_000));
        assert_eq!(eval("round(9000000000000000000, -20)", &r).unwrap(), Value::Int64(0));
    }

    #[test]
    fn round_rejects_fractional_digits() {
        let r = row(Value::Null, Value::Null, Value::Null);
        assert!(matches!(
            eval("round(1.5, 0.5)", &r),
            Err(EvalError::InvalidArgument { function: "round", .. })
        ));
    }

    #[test]
    fn policy_parses_from_text() {
        assert_eq!("null".parse::<DivisionByZeroPolicy>().unwrap(), DivisionByZeroPolicy::Null);
        assert_eq!(" FAIL ".parse::<DivisionByZeroPolicy>().unwrap(), DivisionByZeroPolicy::Fail);
        assert!("zero".parse::<DivisionByZeroPolicy>().is_err());
    }
}
