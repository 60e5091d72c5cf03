//! Query descriptors restricting which documents a subscription watches.
//!
//! A query is data, not code: it travels over the wire to a remote backend
//! and is evaluated there against the stored documents. Evaluation follows
//! hosted document-database semantics:
//!
//! - a document missing a filtered or ordered field never matches
//! - range comparisons only match values of the same JSON type
//! - ordering across types follows null < bool < number < string < array < object
//! - ties keep arrival (insertion) order

use std::cmp::Ordering;
use std::collections::BTreeSet;

use folio_core::RawRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Filter or order field must not be empty")]
    EmptyField,
    #[error("Limit must be greater than zero")]
    ZeroLimit,
    #[error("Operator '{op}' on field '{field}' needs a non-empty array operand")]
    InvalidOperand { field: String, op: FilterOp },
    #[error("Inequality filters on more than one field: '{0}' and '{1}'")]
    MultipleInequalityFields(String, String),
}

/// Comparison operator of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "in")]
    In,
}

impl FilterOp {
    fn is_inequality(&self) -> bool {
        matches!(self, Self::NotEq | Self::Lt | Self::Lte | Self::Gt | Self::Gte)
    }
}

impl std::fmt::Display for FilterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::ArrayContains => "array-contains",
            Self::In => "in",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    fn matches(&self, record: &RawRecord) -> bool {
        let Some(actual) = record.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::NotEq => !values_equal(actual, &self.value),
            FilterOp::Lt => same_type_cmp(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                same_type_cmp(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => same_type_cmp(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                same_type_cmp(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::ArrayContains => match actual {
                Value::Array(items) => items.iter().any(|v| values_equal(v, &self.value)),
                _ => false,
            },
            FilterOp::In => match &self.value {
                Value::Array(options) => options.iter().any(|v| values_equal(actual, v)),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

/// Filter, order and limit applied to a collection.
///
/// ```
/// use folio_sync::query::{Direction, FilterOp, Query};
/// use serde_json::json;
///
/// let featured = Query::new()
///     .filter("featured", FilterOp::Eq, json!(true))
///     .order_by("order", Direction::Asc)
///     .limit(6);
/// assert!(featured.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value,
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check the query is well-formed before it is sent anywhere.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.limit == Some(0) {
            return Err(QueryError::ZeroLimit);
        }

        let mut inequality_fields = BTreeSet::new();
        for filter in &self.filters {
            if filter.field.is_empty() {
                return Err(QueryError::EmptyField);
            }
            if filter.op == FilterOp::In {
                let ok = matches!(&filter.value, Value::Array(options) if !options.is_empty());
                if !ok {
                    return Err(QueryError::InvalidOperand {
                        field: filter.field.clone(),
                        op: filter.op,
                    });
                }
            }
            if filter.op.is_inequality() {
                inequality_fields.insert(filter.field.as_str());
            }
        }

        if inequality_fields.len() > 1 {
            let mut fields = inequality_fields.into_iter();
            let first = fields.next().unwrap_or_default().to_string();
            let second = fields.next().unwrap_or_default().to_string();
            return Err(QueryError::MultipleInequalityFields(first, second));
        }

        if self.order_by.iter().any(|o| o.field.is_empty()) {
            return Err(QueryError::EmptyField);
        }

        Ok(())
    }

    /// Evaluate against a document set in arrival order.
    pub fn apply(&self, records: &[RawRecord]) -> Vec<RawRecord> {
        let mut matched: Vec<RawRecord> = records
            .iter()
            .filter(|r| self.filters.iter().all(|f| f.matches(r)))
            .filter(|r| self.order_by.iter().all(|o| r.get(&o.field).is_some()))
            .cloned()
            .collect();

        if !self.order_by.is_empty() {
            // `sort_by` is stable, so ties keep arrival order.
            matched.sort_by(|a, b| {
                for order in &self.order_by {
                    let (Some(left), Some(right)) = (a.get(&order.field), b.get(&order.field))
                    else {
                        continue;
                    };
                    let ord = total_cmp(left, right);
                    let ord = match order.direction {
                        Direction::Asc => ord,
                        Direction::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Compare two values of the same scalar type; `None` otherwise.
fn same_type_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match same_type_cmp(a, b) {
        Some(ord) => ord == Ordering::Equal,
        None => a == b,
    }
}

fn total_cmp(a: &Value, b: &Value) -> Ordering {
    same_type_cmp(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}
