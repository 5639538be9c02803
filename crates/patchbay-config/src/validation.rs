//! Validation of settings and topology declarations.
//!
//! Validation collects every problem it finds instead of stopping at the
//! first one, so a broken topology file is reported in one pass.

use thiserror::Error;

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// A name that does not denote any known value.
    #[error("unknown {kind} '{name}'")]
    UnknownName {
        /// What kind of name (device type, format, flag, ...).
        kind: &'static str,
        /// The offending name.
        name: String,
    },

    /// A name declared twice where it must be unique.
    #[error("duplicate {kind} '{name}' in module '{module}'")]
    Duplicate {
        /// What kind of entity.
        kind: &'static str,
        /// The repeated name.
        name: String,
        /// Module the duplicate was found in ("" for module names).
        module: String,
    },

    /// A numeric setting outside its allowed range.
    #[error("'{field}' value {value} out of range [{min}, {max}]")]
    OutOfRange {
        /// Name of the setting.
        field: &'static str,
        /// The value that was out of range.
        value: u64,
        /// Minimum allowed value.
        min: u64,
        /// Maximum allowed value.
        max: u64,
    },

    /// A value that is well-formed but unusable.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Where the value was found.
        field: String,
        /// Description of the problem.
        reason: String,
    },

    /// Multiple validation errors.
    #[error("multiple validation errors: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Checks that `value` lies in `[min, max]`.
pub fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> ValidationResult<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

/// Folds collected errors: none is success, one is returned as is.
pub fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

/// Parses a named value, recording an [`ValidationError::UnknownName`] on failure.
pub(crate) fn parse_named<T: core::str::FromStr>(
    kind: &'static str,
    name: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<T> {
    match name.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.push(ValidationError::UnknownName {
                kind,
                name: name.to_string(),
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_bounds_are_inclusive() {
        assert!(check_range("registry_capacity", 1, 1, 4096).is_ok());
        assert!(check_range("registry_capacity", 4096, 1, 4096).is_ok());
        assert_eq!(
            check_range("registry_capacity", 0, 1, 4096),
            Err(ValidationError::OutOfRange {
                field: "registry_capacity",
                value: 0,
                min: 1,
                max: 4096
            })
        );
    }

    #[test]
    fn collect_folds_errors() {
        assert!(collect(Vec::new()).is_ok());
        let one = ValidationError::UnknownName {
            kind: "format",
            name: "pcm_12_bit".into(),
        };
        assert_eq!(collect(vec![one.clone()]), Err(one.clone()));
        let many = collect(vec![one.clone(), one]).unwrap_err();
        assert!(matches!(many, ValidationError::Multiple(ref v) if v.len() == 2));
        assert!(many.to_string().starts_with("multiple validation errors: unknown format"));
    }

    #[test]
    fn parse_named_records_failures() {
        let mut errors = Vec::new();
        let ok: Option<u32> = parse_named("number", "42", &mut errors);
        let bad: Option<u32> = parse_named("number", "forty-two", &mut errors);
        assert_eq!(ok, Some(42));
        assert_eq!(bad, None);
        assert_eq!(errors.len(), 1);
    }
}
