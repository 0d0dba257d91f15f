use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{EvaError, EvaResult};

pub type StringAttributes = BTreeMap<String, String>;
pub type NumericAttributes = BTreeMap<String, i64>;

/// Prefix of caller-managed attributes such as `$owner` and `$expiration`.
pub const SYSTEM_ATTRIBUTE_PREFIX: &str = "$";
pub const OWNER_ATTRIBUTE: &str = "$owner";

pub fn is_system_attribute(name: &str) -> bool {
    name.starts_with(SYSTEM_ATTRIBUTE_PREFIX)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    String,
    Numeric,
}

impl AttributeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AttributeKind::String => "string",
            AttributeKind::Numeric => "numeric",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }

    pub fn from_symbol(symbol: &str) -> EvaResult<Self> {
        match symbol {
            "=" | "==" => Ok(CompareOp::Eq),
            "!=" => Ok(CompareOp::Ne),
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::Lte),
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::Gte),
            other => Err(EvaError::invalid_query(format!(
                "unknown comparison operator '{other}'"
            ))),
        }
    }

    pub fn evaluate(self, left: i64, right: i64) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Lt => left < right,
            CompareOp::Lte => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Gte => left >= right,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Numeric clause: a plain number means equality, an operator means a range.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericPredicate {
    Equals(i64),
    Compare(CompareOp, i64),
}

impl NumericPredicate {
    pub fn op(self) -> CompareOp {
        match self {
            NumericPredicate::Equals(_) => CompareOp::Eq,
            NumericPredicate::Compare(op, _) => op,
        }
    }

    pub fn operand(self) -> i64 {
        match self {
            NumericPredicate::Equals(value) | NumericPredicate::Compare(_, value) => value,
        }
    }

    pub fn matches(self, value: i64) -> bool {
        self.op().evaluate(value, self.operand())
    }

    /// Parses `">=8"`, `"< 64"`, `"!=0"` or a bare `"16"`.
    pub fn parse(raw: &str) -> EvaResult<Self> {
        let trimmed = raw.trim();
        let split = trimmed
            .find(|c: char| c.is_ascii_digit() || c == '-' || c == '+')
            .ok_or_else(|| EvaError::invalid_query(format!("missing operand in '{raw}'")))?;
        let (symbol, operand) = trimmed.split_at(split);
        let value: i64 = operand
            .trim()
            .parse()
            .map_err(|err| EvaError::invalid_query(format!("operand '{operand}': {err}")))?;
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Ok(NumericPredicate::Equals(value));
        }
        match CompareOp::from_symbol(symbol)? {
            CompareOp::Eq => Ok(NumericPredicate::Equals(value)),
            op => Ok(NumericPredicate::Compare(op, value)),
        }
    }

    /// Wire values are either JSON numbers or operator-prefixed strings.
    pub fn from_json(value: &serde_json::Value) -> EvaResult<Self> {
        match value {
            serde_json::Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    return Ok(NumericPredicate::Equals(int));
                }
                match number.as_f64() {
                    Some(float)
                        if float.fract() == 0.0
                            && float >= i64::MIN as f64
                            && float < i64::MAX as f64 =>
                    {
                        Ok(NumericPredicate::Equals(float as i64))
                    }
                    _ => Err(EvaError::invalid_query(format!(
                        "numeric value {number} is not an integer"
                    ))),
                }
            }
            serde_json::Value::String(raw) => NumericPredicate::parse(raw),
            other => Err(EvaError::invalid_query(format!(
                "numeric predicate must be a number or string, got {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringPredicate {
    Equals(String),
}

impl StringPredicate {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            StringPredicate::Equals(expected) => expected == value,
        }
    }
}
