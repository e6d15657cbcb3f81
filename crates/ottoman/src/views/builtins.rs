//! Native `_sum`, `_count` and `_stats` reductions.

use serde_json::{Map, Number, Value, json};

use crate::error::QueryError;

/// A reduction implemented without the script host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// Sum of numbers, element-wise for arrays of numbers.
    Sum,
    /// Number of rows; sum of partial counts when rereducing.
    Count,
    /// `sum`, `count`, `min`, `max` and `sumsqr` of numbers.
    Stats,
}

impl Builtin {
    /// Builtin named by a reduce source, if any.
    #[must_use]
    pub fn parse(source: &str) -> Option<Self> {
        match source.trim() {
            "_sum" => Some(Self::Sum),
            "_count" => Some(Self::Count),
            "_stats" => Some(Self::Stats),
            _ => None,
        }
    }

    /// Reduces `values`.
    ///
    /// # Errors
    ///
    /// Returns `builtin_reduce_error` when a value has the wrong shape.
    pub fn apply(self, values: &[Value], rereduce: bool) -> Result<Value, QueryError> {
        match self {
            Self::Sum => sum(values),
            Self::Count if rereduce => sum(values),
            Self::Count => Ok(Value::from(values.len())),
            Self::Stats => stats(values),
        }
    }
}

fn builtin_error(message: String) -> QueryError {
    QueryError::error("builtin_reduce_error", message)
}

/// Running total that stays integral until a float or an overflow shows up.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Total {
    Int(i64),
    Float(f64),
}

impl Total {
    fn of(number: &Number) -> Self {
        number.as_i64().map_or_else(
            || Self::Float(number.as_f64().unwrap_or(f64::NAN)),
            Self::Int,
        )
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "sums past the i64 range fall back to floating point"
    )]
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(value) => value as f64,
            Self::Float(value) => value,
        }
    }

    fn add(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(left), Self::Int(right)) => left
                .checked_add(right)
                .map_or_else(|| Self::Float(self.as_f64() + other.as_f64()), Self::Int),
            _ => Self::Float(self.as_f64() + other.as_f64()),
        }
    }

    fn mul(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(left), Self::Int(right)) => left
                .checked_mul(right)
                .map_or_else(|| Self::Float(self.as_f64() * other.as_f64()), Self::Int),
            _ => Self::Float(self.as_f64() * other.as_f64()),
        }
    }

    fn min(self, other: Self) -> Self {
        if other.as_f64() < self.as_f64() { other } else { self }
    }

    fn max(self, other: Self) -> Self {
        if other.as_f64() > self.as_f64() { other } else { self }
    }

    fn into_value(self) -> Value {
        match self {
            Self::Int(value) => Value::from(value),
            Self::Float(value) => Number::from_f64(value).map_or(Value::Null, Value::Number),
        }
    }
}

fn sum(values: &[Value]) -> Result<Value, QueryError> {
    let mut scalar = Total::Int(0);
    let mut vector: Option<Vec<Total>> = None;
    for value in values {
        match value {
            Value::Number(number) => scalar = scalar.add(Total::of(number)),
            Value::Array(items) => {
                let totals = vector.get_or_insert_with(Vec::new);
                for (index, item) in items.iter().enumerate() {
                    let Value::Number(number) = item else {
                        return Err(builtin_error(format!(
                            "_sum expects arrays of numbers, got {item}"
                        )));
                    };
                    match totals.get_mut(index) {
                        Some(total) => *total = total.add(Total::of(number)),
                        None => totals.push(Total::of(number)),
                    }
                }
            }
            other => {
                return Err(builtin_error(format!(
                    "_sum expects numbers or arrays of numbers, got {other}"
                )));
            }
        }
    }

    match vector {
        None => Ok(scalar.into_value()),
        Some(mut totals) => {
            if scalar != Total::Int(0) {
                match totals.first_mut() {
                    Some(first) => *first = first.add(scalar),
                    None => totals.push(scalar),
                }
            }
            Ok(Value::Array(totals.into_iter().map(Total::into_value).collect()))
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Stats {
    sum: Total,
    count: Total,
    min: Total,
    max: Total,
    sumsqr: Total,
}

impl Stats {
    fn of(number: &Number) -> Self {
        let value = Total::of(number);
        Self {
            sum: value,
            count: Total::Int(1),
            min: value,
            max: value,
            sumsqr: value.mul(value),
        }
    }

    fn from_partial(fields: &Map<String, Value>) -> Option<Self> {
        let field = |name: &str| match fields.get(name) {
            Some(Value::Number(number)) => Some(Total::of(number)),
            _ => None,
        };
        Some(Self {
            sum: field("sum")?,
            count: field("count")?,
            min: field("min")?,
            max: field("max")?,
            sumsqr: field("sumsqr")?,
        })
    }

    fn merge(self, other: Self) -> Self {
        Self {
            sum: self.sum.add(other.sum),
            count: self.count.add(other.count),
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sumsqr: self.sumsqr.add(other.sumsqr),
        }
    }

    fn into_value(self) -> Value {
        json!({
            "sum": self.sum.into_value(),
            "count": self.count.into_value(),
            "min": self.min.into_value(),
            "max": self.max.into_value(),
            "sumsqr": self.sumsqr.into_value(),
        })
    }
}

fn stats(values: &[Value]) -> Result<Value, QueryError> {
    let mut combined: Option<Stats> = None;
    for value in values {
        let next = match value {
            Value::Number(number) => Stats::of(number),
            Value::Object(fields) => Stats::from_partial(fields).ok_or_else(|| {
                builtin_error(format!("_stats cannot combine {value}"))
            })?,
            other => {
                return Err(builtin_error(format!(
                    "_stats expects numbers, got {other}"
                )));
            }
        };
        combined = Some(combined.map_or(next, |stats| stats.merge(next)));
    }
    Ok(combined.map_or_else(
        || json!({"sum": 0, "count": 0, "min": 0, "max": 0, "sumsqr": 0}),
        Stats::into_value,
    ))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case::count(Builtin::Count, json!([1, 1, 1]), false, json!(3))]
    #[case::recount(Builtin::Count, json!([3, 3]), true, json!(6))]
    #[case::integers(Builtin::Sum, json!([1, 2, 3]), false, json!(6))]
    #[case::floats(Builtin::Sum, json!([1, 2.5]), false, json!(3.5))]
    #[case::arrays(Builtin::Sum, json!([[1, 2], [3], 4]), false, json!([8, 2]))]
    #[case::empty(Builtin::Sum, json!([]), false, json!(0))]
    fn reduces(
        #[case] builtin: Builtin,
        #[case] values: Value,
        #[case] rereduce: bool,
        #[case] expected: Value,
    ) {
        let items = values.as_array().cloned().unwrap_or_default();
        assert_eq!(builtin.apply(&items, rereduce).expect("reduces"), expected);
    }

    #[rstest]
    fn stats_combine_partials() {
        let first = Builtin::Stats.apply(&[json!(2), json!(4)], false).expect("stats");
        assert_eq!(first, json!({"sum": 6, "count": 2, "min": 2, "max": 4, "sumsqr": 20}));

        let second = Builtin::Stats.apply(&[json!(1)], false).expect("stats");
        let merged = Builtin::Stats.apply(&[first, second], true).expect("rereduce");
        assert_eq!(merged, json!({"sum": 7, "count": 3, "min": 1, "max": 4, "sumsqr": 21}));
    }

    #[rstest]
    #[case::sum_of_text(Builtin::Sum, json!("x"))]
    #[case::stats_of_text(Builtin::Stats, json!("x"))]
    fn rejects_non_numbers(#[case] builtin: Builtin, #[case] value: Value) {
        let error = builtin.apply(&[value], false).expect_err("not numeric");
        assert_eq!(error.kind(), "builtin_reduce_error");
    }

    #[rstest]
    #[case::sum("_sum", Some(Builtin::Sum))]
    #[case::padded(" _count ", Some(Builtin::Count))]
    #[case::script("function(k, v) return 1 end", None)]
    fn recognises_names(#[case] source: &str, #[case] expected: Option<Builtin>) {
        assert_eq!(Builtin::parse(source), expected);
    }
}
