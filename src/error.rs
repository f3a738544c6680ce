use thiserror::Error;

/// Errors surfaced by the decision core.
///
/// Degenerate numeric states (zero variance, empty bootstrap tails) are not
/// errors; components resolve them to neutral defaults.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {field} = {value}")]
    InvalidInput { field: String, value: f64 },

    #[error("unknown arm: {0}")]
    UnknownArm(String),

    #[error("no arm available for selection")]
    NoArmAvailable,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Reject NaN and infinite values at the boundary.
pub fn ensure_finite(field: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(CoreError::InvalidInput {
            field: field.to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite("x", 1.5).is_ok());
        assert!(matches!(
            ensure_finite("x", f64::NAN),
            Err(CoreError::InvalidInput { .. })
        ));
        assert!(ensure_finite("x", f64::INFINITY).is_err());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(CoreError::UnknownArm("trend".into()).to_string(), "unknown arm: trend");
        assert_eq!(CoreError::NoArmAvailable.to_string(), "no arm available for selection");
    }
}
