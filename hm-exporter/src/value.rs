//! Decoding of raw datapoint values.
//!
//! The statelist stores every value as a string and carries the logical type
//! in a separate `valuetype` attribute. Decoding dispatches on that code only;
//! the literal itself is never inspected to guess a type.

use thiserror::Error;

/// Literal the CCU uses for a true boolean.
pub const TRUE_LITERAL: &str = "true";

/// Value reported for every non-empty percentage datapoint.
///
/// The upstream decoder parsed the literal and then exported this constant
/// instead of the parsed value. Kept until the intended behaviour is confirmed.
pub const PERCENTAGE_VALUE: f64 = 100.0;

/// The `valuetype` codes the exporter knows how to decode.
///
/// Unknown codes exist in the wild and are ignored rather than guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Boolean,
    Float,
    Integer,
    Percentage,
}

impl ValueType {
    /// Parse a `valuetype` attribute.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().parse::<u16>().ok()? {
            2 => Some(ValueType::Boolean),
            4 => Some(ValueType::Float),
            8 => Some(ValueType::Integer),
            16 => Some(ValueType::Percentage),
            _ => None,
        }
    }

    /// The numeric code used in the statelist.
    pub fn code(self) -> u16 {
        match self {
            ValueType::Boolean => 2,
            ValueType::Float => 4,
            ValueType::Integer => 8,
            ValueType::Percentage => 16,
        }
    }
}

/// A literal that does not decode under its declared type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    #[error("invalid float literal {0:?}")]
    Float(String),
    #[error("invalid integer literal {0:?}")]
    Integer(String),
}

/// Decode a raw value.
///
/// Returns `Ok(None)` when there is nothing to record: the value is missing
/// or empty, or the type code is not one of [`ValueType`].
pub fn coerce(
    raw: Option<&str>,
    value_type: Option<ValueType>,
) -> Result<Option<f64>, CoercionError> {
    let (Some(raw), Some(value_type)) = (raw, value_type) else {
        return Ok(None);
    };
    if raw.is_empty() {
        return Ok(None);
    }

    let value = match value_type {
        ValueType::Float => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| CoercionError::Float(raw.to_string()))?,
        ValueType::Boolean => {
            if raw == TRUE_LITERAL {
                1.0
            } else {
                0.0
            }
        }
        ValueType::Percentage => PERCENTAGE_VALUE,
        ValueType::Integer => parse_integer(raw)?,
    };

    Ok(Some(value))
}

fn parse_integer(raw: &str) -> Result<f64, CoercionError> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(value as f64);
    }

    // Some firmwares report integer datapoints with a fractional part.
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value.trunc()),
        _ => Err(CoercionError::Integer(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(value: &str, code: &str) -> Result<Option<f64>, CoercionError> {
        coerce(Some(value), ValueType::from_code(code))
    }

    #[test]
    fn test_value_type_codes() {
        assert_eq!(ValueType::from_code("2"), Some(ValueType::Boolean));
        assert_eq!(ValueType::from_code("4"), Some(ValueType::Float));
        assert_eq!(ValueType::from_code("8"), Some(ValueType::Integer));
        assert_eq!(ValueType::from_code("16"), Some(ValueType::Percentage));
        assert_eq!(ValueType::from_code("20"), None);
        assert_eq!(ValueType::from_code("99"), None);
        assert_eq!(ValueType::from_code("float"), None);
        assert_eq!(ValueType::from_code(""), None);

        for vt in [
            ValueType::Boolean,
            ValueType::Float,
            ValueType::Integer,
            ValueType::Percentage,
        ] {
            assert_eq!(ValueType::from_code(&vt.code().to_string()), Some(vt));
        }
    }

    #[test]
    fn test_float() {
        assert_eq!(decode("21.5", "4"), Ok(Some(21.5)));
        assert_eq!(decode("-3", "4"), Ok(Some(-3.0)));
        assert_eq!(
            decode("warm", "4"),
            Err(CoercionError::Float("warm".to_string()))
        );
    }

    #[test]
    fn test_boolean() {
        assert_eq!(decode("true", "2"), Ok(Some(1.0)));
        assert_eq!(decode("false", "2"), Ok(Some(0.0)));
        assert_eq!(decode("TRUE", "2"), Ok(Some(0.0)));
    }

    #[test]
    fn test_percentage_is_constant() {
        assert_eq!(decode("37", "16"), Ok(Some(100.0)));
        assert_eq!(decode("0", "16"), Ok(Some(100.0)));
    }

    #[test]
    fn test_integer() {
        assert_eq!(decode("42", "8"), Ok(Some(42.0)));
        assert_eq!(decode("-65", "8"), Ok(Some(-65.0)));
        assert_eq!(decode("42.7", "8"), Ok(Some(42.0)));
        assert_eq!(
            decode("n/a", "8"),
            Err(CoercionError::Integer("n/a".to_string()))
        );
    }

    #[test]
    fn test_no_value() {
        assert_eq!(decode("", "4"), Ok(None));
        assert_eq!(decode("", "2"), Ok(None));
        assert_eq!(decode("5", "99"), Ok(None));
        assert_eq!(coerce(None, Some(ValueType::Float)), Ok(None));
        assert_eq!(coerce(Some("1.0"), None), Ok(None));
    }

    #[test]
    fn test_type_wins_over_shape() {
        // "true" declared as a float is a decode error, not a boolean.
        assert!(decode("true", "4").is_err());
        // A numeric literal declared as boolean is simply not the true literal.
        assert_eq!(decode("1", "2"), Ok(Some(0.0)));
    }
}
