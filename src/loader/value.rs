//! JavaScript-flavoured views over `serde_json::Value`.

use serde_json::{Number, Value};

/// JavaScript truthiness.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `String(n)` for a JSON number: integral floats print without a fraction.
pub fn number_to_string(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// JSON number for `f`, integral values without a fraction (`2`, not `2.0`).
/// Non-finite values become `null`.
pub fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        return Value::from(f as i64);
    }
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// String form of a scalar, as used for property keys and concatenation.
///
/// Returns `None` for arrays and objects.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(number_to_string(n)),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Rendering used by `console.*` calls.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => number_to_string(n),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_value() {
        assert_eq!(number_value(2.0), json!(2));
        assert_eq!(number_value(-0.0), json!(0));
        assert_eq!(number_value(51.5), json!(51.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!(12345)));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!([])));
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(&Number::from(123)), "123");
        assert_eq!(number_to_string(&Number::from_f64(123.0).unwrap()), "123");
        assert_eq!(number_to_string(&Number::from_f64(12.5).unwrap()), "12.5");
        assert_eq!(number_to_string(&Number::from(-7)), "-7");
    }
}
