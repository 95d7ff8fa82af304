//! Expression tree for rule expressions.

use std::fmt;

use crate::types::{DataType, Value};

/// Arithmetic operators allowed in rule expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    /// Operator symbol as written in rule text.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// The function whitelist. Nothing else can be called from a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Largest non-null argument (variadic).
    Max,
    /// Smallest non-null argument (variadic).
    Min,
    /// Sum of non-null arguments (variadic).
    Sum,
    /// Absolute value.
    Abs,
    /// Round half-to-even, optionally to a number of decimal digits.
    Round,
}

impl Function {
    /// Look up a whitelisted function by name (case-sensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "max" => Some(Self::Max),
            "min" => Some(Self::Min),
            "sum" => Some(Self::Sum),
            "abs" => Some(Self::Abs),
            "round" => Some(Self::Round),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Min => "min",
            Self::Sum => "sum",
            Self::Abs => "abs",
            Self::Round => "round",
        }
    }

    /// Whether `n` arguments is a valid call.
    pub fn accepts_arity(self, n: usize) -> bool {
        match self {
            Self::Max | Self::Min | Self::Sum => n >= 1,
            Self::Abs => n == 1,
            Self::Round => n == 1 || n == 2,
        }
    }

    /// Human-readable arity, used in syntax errors.
    pub fn arity_description(self) -> &'static str {
        match self {
            Self::Max | Self::Min | Self::Sum => "at least 1 argument",
            Self::Abs => "exactly 1 argument",
            Self::Round => "1 or 2 arguments",
        }
    }
}

/// A parsed rule expression.
///
/// Column references carry the slot (row position) they read from. The parser assigns slots
/// from the scope it was given; [`Expr::bind`] re-targets them once the final row layout of a
/// rule set is known.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal (`Int64` or `Float64`).
    Literal(Value),
    /// Column reference.
    Column { name: String, slot: usize },
    /// Unary negation.
    Negate(Box<Expr>),
    /// Binary arithmetic.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Call to a whitelisted function.
    Call { func: Function, args: Vec<Expr> },
}

impl Expr {
    /// Distinct column names referenced by the expression, in order of first appearance.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Column { name, .. } => {
                if !out.contains(&name.as_str()) {
                    out.push(name.as_str());
                }
            }
            Expr::Negate(inner) => inner.collect_columns(out),
            Expr::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Call { args, .. } => {
                for a in args {
                    a.collect_columns(out);
                }
            }
        }
    }

    /// Re-target every column reference using `resolve`.
    ///
    /// Returns the first name that `resolve` does not know, leaving the tree partially bound.
    pub fn bind<F>(&mut self, resolve: &F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<usize>,
    {
        match self {
            Expr::Literal(_) => Ok(()),
            Expr::Column { name, slot } => match resolve(name) {
                Some(s) => {
                    *slot = s;
                    Ok(())
                }
                None => Err(name.clone()),
            },
            Expr::Negate(inner) => inner.bind(resolve),
            Expr::Binary { left, right, .. } => {
                left.bind(resolve)?;
                right.bind(resolve)
            }
            Expr::Call { args, .. } => {
                for a in args {
                    a.bind(resolve)?;
                }
                Ok(())
            }
        }
    }

    /// Static result type, given the type stored in each slot.
    pub fn infer_type<F>(&self, slot_type: &F) -> DataType
    where
        F: Fn(usize) -> DataType,
    {
        match self {
            Expr::Literal(v) => v.data_type().unwrap_or(DataType::Float64),
            Expr::Column { slot, .. } => slot_type(*slot),
            Expr::Negate(inner) => numeric_or_float(inner.infer_type(slot_type)),
            Expr::Binary { op, left, right } => {
                let (l, r) = (left.infer_type(slot_type), right.infer_type(slot_type));
                match op {
                    BinaryOp::Div => DataType::Float64,
                    _ if l == DataType::Int64 && r == DataType::Int64 => DataType::Int64,
                    _ => DataType::Float64,
                }
            }
            Expr::Call { func, args } => match func {
                Function::Abs | Function::Round => args
                    .first()
                    .map(|a| numeric_or_float(a.infer_type(slot_type)))
                    .unwrap_or(DataType::Float64),
                Function::Max | Function::Min | Function::Sum => {
                    if args.iter().all(|a| a.infer_type(slot_type) == DataType::Int64) {
                        DataType::Int64
                    } else {
                        DataType::Float64
                    }
                }
            },
        }
    }
}

fn numeric_or_float(t: DataType) -> DataType {
    if t == DataType::Int64 {
        DataType::Int64
    } else {
        DataType::Float64
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Column { name, .. } => {
                if is_plain_identifier(name) {
                    f.write_str(name)
                } else {
                    write!(f, "`{name}`")
                }
            }
            Expr::Negate(inner) => write!(f, "-({inner})"),
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Call { func, args } => {
                write!(f, "{}(", func.name())?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
        }
    }
}

pub(crate) fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
