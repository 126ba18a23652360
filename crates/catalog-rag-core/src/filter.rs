//! Allow-listed search filters.
//!
//! Filters arrive from two untrusted places: the rewriter's tool-call
//! arguments and the caller's overrides. Both are parsed into
//! [`SearchFilter`], whose column and operator are closed enums. Stores
//! turn those enums into static SQL fragments and bind the value as a
//! parameter; no filter text ever reaches a statement.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::Item;

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("column '{0}' cannot be filtered on")]
    UnknownColumn(String),

    #[error("operator '{0}' is not allowed")]
    UnknownOperator(String),

    #[error("value {value} does not fit column '{column}'")]
    BadValue { column: &'static str, value: String },

    #[error("cannot parse filter expression '{0}'")]
    Malformed(String),
}

/// Scalar item columns that may appear in a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterColumn {
    Id,
    Type,
    Brand,
    Name,
    Description,
    Price,
}

impl FilterColumn {
    pub fn parse(s: &str) -> Result<Self, FilterError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(FilterColumn::Id),
            "type" => Ok(FilterColumn::Type),
            "brand" => Ok(FilterColumn::Brand),
            "name" => Ok(FilterColumn::Name),
            "description" => Ok(FilterColumn::Description),
            "price" => Ok(FilterColumn::Price),
            _ => Err(FilterError::UnknownColumn(s.to_string())),
        }
    }

    /// Column name as it appears in the `items` table.
    pub fn as_sql(self) -> &'static str {
        match self {
            FilterColumn::Id => "id",
            FilterColumn::Type => "type",
            FilterColumn::Brand => "brand",
            FilterColumn::Name => "name",
            FilterColumn::Description => "description",
            FilterColumn::Price => "price",
        }
    }
}

/// Comparison operators accepted in filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Gt,
    Lt,
    Ge,
    Le,
}

impl FilterOperator {
    pub fn parse(s: &str) -> Result<Self, FilterError> {
        match s.trim() {
            "=" | "==" => Ok(FilterOperator::Eq),
            ">" => Ok(FilterOperator::Gt),
            "<" => Ok(FilterOperator::Lt),
            ">=" => Ok(FilterOperator::Ge),
            "<=" => Ok(FilterOperator::Le),
            other => Err(FilterError::UnknownOperator(other.to_string())),
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Gt => ">",
            FilterOperator::Lt => "<",
            FilterOperator::Ge => ">=",
            FilterOperator::Le => "<=",
        }
    }

    fn holds(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            FilterOperator::Eq => ord == Equal,
            FilterOperator::Gt => ord == Greater,
            FilterOperator::Lt => ord == Less,
            FilterOperator::Ge => ord != Less,
            FilterOperator::Le => ord != Greater,
        }
    }
}

impl Serialize for FilterOperator {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_sql())
    }
}

/// A filter value, typed by the column it applies to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Integer(i64),
    Number(f64),
    Text(String),
}

/// One `{column, comparison_operator, value}` predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchFilter {
    pub column: FilterColumn,
    #[serde(rename = "comparison_operator")]
    pub operator: FilterOperator,
    pub value: FilterValue,
}

/// Filter as it appears on the wire, before validation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RawFilter {
    pub column: String,
    pub comparison_operator: String,
    pub value: Value,
}

impl SearchFilter {
    pub fn new(
        column: FilterColumn,
        operator: FilterOperator,
        value: Value,
    ) -> Result<Self, FilterError> {
        let value = coerce_value(column, &value)?;
        Ok(Self {
            column,
            operator,
            value,
        })
    }

    /// Validate a wire filter against the allow-lists.
    pub fn from_raw(raw: &RawFilter) -> Result<Self, FilterError> {
        let column = FilterColumn::parse(&raw.column)?;
        let operator = FilterOperator::parse(&raw.comparison_operator)?;
        Self::new(column, operator, raw.value.clone())
    }

    /// Evaluate the predicate against an item (used by in-memory stores).
    pub fn matches(&self, item: &Item) -> bool {
        let ord = match (self.column, &self.value) {
            (FilterColumn::Id, FilterValue::Integer(v)) => item.id.cmp(v),
            (FilterColumn::Price, FilterValue::Number(v)) => match item.price.partial_cmp(v) {
                Some(o) => o,
                None => return false,
            },
            (FilterColumn::Type, FilterValue::Text(v)) => item.item_type.as_str().cmp(v.as_str()),
            (FilterColumn::Brand, FilterValue::Text(v)) => item.brand.as_str().cmp(v.as_str()),
            (FilterColumn::Name, FilterValue::Text(v)) => item.name.as_str().cmp(v.as_str()),
            (FilterColumn::Description, FilterValue::Text(v)) => {
                item.description.as_str().cmp(v.as_str())
            }
            _ => return false,
        };
        self.operator.holds(ord)
    }
}

/// Parses CLI-style expressions such as `price<30` or `brand=Daybird`.
impl std::str::FromStr for SearchFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pos = s
            .find(['<', '>', '='])
            .ok_or_else(|| FilterError::Malformed(s.to_string()))?;
        let rest = &s[pos..];
        let op_len = if [">=", "<=", "=="].iter().any(|op| rest.starts_with(op)) {
            2
        } else {
            1
        };
        let column = FilterColumn::parse(&s[..pos])?;
        let operator = FilterOperator::parse(&rest[..op_len])?;
        let value = rest[op_len..].trim();
        if value.is_empty() {
            return Err(FilterError::Malformed(s.to_string()));
        }
        Self::new(column, operator, Value::String(value.to_string()))
    }
}

/// Validate a list of wire filters, keeping the valid ones.
///
/// Invalid filters are dropped with a warning rather than failing the
/// request: a model-suggested filter on a column that does not exist
/// should not cost the user an answer.
pub fn parse_filters(raw: &[RawFilter]) -> Vec<SearchFilter> {
    raw.iter()
        .filter_map(|r| match SearchFilter::from_raw(r) {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::warn!(
                    column = %r.column,
                    operator = %r.comparison_operator,
                    "dropping filter: {}",
                    e
                );
                None
            }
        })
        .collect()
}

fn coerce_value(column: FilterColumn, value: &Value) -> Result<FilterValue, FilterError> {
    let bad = || FilterError::BadValue {
        column: column.as_sql(),
        value: value.to_string(),
    };
    match column {
        FilterColumn::Id => match value {
            Value::Number(n) => n.as_i64().map(FilterValue::Integer).ok_or_else(bad),
            Value::String(s) => s
                .trim()
                .parse()
                .map(FilterValue::Integer)
                .map_err(|_| bad()),
            _ => Err(bad()),
        },
        FilterColumn::Price => match value {
            Value::Number(n) => n.as_f64().map(FilterValue::Number).ok_or_else(bad),
            Value::String(s) => s
                .trim()
                .trim_start_matches('$')
                .parse()
                .map(FilterValue::Number)
                .map_err(|_| bad()),
            _ => Err(bad()),
        },
        _ => match value {
            Value::String(s) => Ok(FilterValue::Text(s.clone())),
            Value::Number(n) => Ok(FilterValue::Text(n.to_string())),
            _ => Err(bad()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(price: f64, brand: &str) -> Item {
        Item {
            id: 1,
            item_type: "Footwear".into(),
            brand: brand.into(),
            name: "Shoe".into(),
            description: "A shoe".into(),
            price,
            embedding: None,
        }
    }

    fn raw(column: &str, op: &str, value: Value) -> RawFilter {
        RawFilter {
            column: column.into(),
            comparison_operator: op.into(),
            value,
        }
    }

    #[test]
    fn test_rejects_unknown_column() {
        let err = SearchFilter::from_raw(&raw("embedding", "=", json!(1))).unwrap_err();
        assert_eq!(err, FilterError::UnknownColumn("embedding".into()));
        let err =
            SearchFilter::from_raw(&raw("price; DROP TABLE items", "=", json!(1))).unwrap_err();
        assert!(matches!(err, FilterError::UnknownColumn(_)));
    }

    #[test]
    fn test_rejects_unknown_operator() {
        let err = SearchFilter::from_raw(&raw("price", "LIKE", json!(1))).unwrap_err();
        assert_eq!(err, FilterError::UnknownOperator("LIKE".into()));
    }

    #[test]
    fn test_price_accepts_numeric_strings() {
        let f = SearchFilter::from_raw(&raw("price", "<", json!("$30"))).unwrap();
        assert_eq!(f.value, FilterValue::Number(30.0));
        assert!(f.matches(&item(29.99, "A")));
        assert!(!f.matches(&item(30.0, "A")));
    }

    #[test]
    fn test_price_rejects_text() {
        assert!(SearchFilter::from_raw(&raw("price", ">", json!("cheap"))).is_err());
    }

    #[test]
    fn test_text_equality() {
        let f = SearchFilter::from_raw(&raw("brand", "=", json!("Daybird"))).unwrap();
        assert!(f.matches(&item(10.0, "Daybird")));
        assert!(!f.matches(&item(10.0, "Gravitas")));
    }

    #[test]
    fn test_from_str_expressions() {
        let f: SearchFilter = "price<=50".parse().unwrap();
        assert_eq!(f.column, FilterColumn::Price);
        assert_eq!(f.operator, FilterOperator::Le);
        let f: SearchFilter = "brand=Daybird".parse().unwrap();
        assert_eq!(f.value, FilterValue::Text("Daybird".into()));
        assert!("price".parse::<SearchFilter>().is_err());
        assert!("price>".parse::<SearchFilter>().is_err());
    }

    #[test]
    fn test_parse_filters_drops_invalid() {
        let filters = parse_filters(&[
            raw("price", "<", json!(30)),
            raw("color", "=", json!("red")),
        ]);
        assert_eq!(filters.len(), 1);
    }

    #[test]
    fn test_serializes_wire_shape() {
        let f = SearchFilter::from_raw(&raw("price", ">=", json!(5))).unwrap();
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(
            v,
            json!({"column": "price", "comparison_operator": ">=", "value": 5.0})
        );
    }
}
