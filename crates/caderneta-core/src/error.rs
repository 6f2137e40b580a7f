//! # Error Types
//!
//! Domain-specific error types for caderneta-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                 │
//! │                                                                     │
//! │  caderneta-core errors (this file)                                  │
//! │  ├── CoreError        - Business rule violations                    │
//! │  └── ValidationError  - Input validation failures                   │
//! │                                                                     │
//! │  caderneta-db errors (separate crate)                               │
//! │  └── DbError          - Connection/transaction/query failures       │
//! │                                                                     │
//! │  Flow: ValidationError → CoreError → DbError → consumer             │
//! │                                                                     │
//! │  Consumers map ValidationError to inline form feedback and          │
//! │  everything else to a generic retry prompt.                         │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (field, amounts, ids)
//! 3. Errors are enum variants, never String

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Client cannot be found.
    #[error("Client not found: {0}")]
    ClientNotFound(i64),

    /// A payment would be applied against a client with nothing owed,
    /// or other ledger-shaped nonsense.
    #[error("Invalid payment: {reason}")]
    InvalidPayment { reason: String },

    /// A partial payment was recorded without scheduling the next visit.
    ///
    /// ## When This Occurs
    /// `add_payment` leaves the client still owing money and the caller
    /// did not supply a next charge date. The collector must always know
    /// when to come back.
    #[error("Partial payment requires a next charge date")]
    MissingNextChargeDate,

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These occur when caller input doesn't meet requirements. Raised before
/// any write is attempted.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (phone, date, status).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::MissingNextChargeDate;
        assert_eq!(err.to_string(), "Partial payment requires a next charge date");

        let err = ValidationError::Required {
            field: "name".to_string(),
        };
        assert_eq!(err.to_string(), "name is required");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "amount".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
