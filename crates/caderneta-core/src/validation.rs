//! # Validation Module
//!
//! Input validation and defensive normalization for the caderneta engine.
//!
//! ## Two Flavors, On Purpose
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Validation vs Normalization                     │
//! │                                                                     │
//! │  validate_* (Result)        normalize_* / sanitize_* (lenient)      │
//! │  ─────────────────────      ──────────────────────────────────      │
//! │  Used on the WRITE path.    Used on the READ path (row mapper).     │
//! │  Bad input is the caller's  Bad stored data is nobody's fault       │
//! │  problem: reject it before  anymore: substitute a safe fallback     │
//! │  anything touches disk.     and keep going. Reads never throw.      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveDate;

use crate::error::ValidationError;
use crate::{MAX_NAME_LEN, MAX_TEXT_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a client name.
///
/// ## Rules
/// - Must not be empty after trimming
/// - Must be at most [`MAX_NAME_LEN`] characters
pub fn validate_client_name(name: &str) -> ValidationResult<String> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(name.to_string())
}

/// Validates a bairro or rua name (same rules as client names).
pub fn validate_place_name(field: &'static str, name: &str) -> ValidationResult<String> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(name.to_string())
}

/// Trims, strips control characters and length-caps a free-text field,
/// collapsing the empty result to `None`.
///
/// Never fails: this is the lenient path shared by writes (sanitize what
/// the caller sent) and reads (sanitize what was stored).
pub fn sanitize_text(text: &str) -> Option<String> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .take(MAX_TEXT_LEN)
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

// =============================================================================
// Phone Normalization
// =============================================================================

/// Normalizes a Brazilian phone number to bare digits, or rejects it.
///
/// ## Rules
/// - Formatting characters (`( ) - + .` and spaces) are stripped
/// - A leading country code 55 is stripped when followed by a full number
/// - Result must be 10 digits (landline) or 11 digits (mobile)
/// - The DDD (area code, first two digits) must be plausible: both digits
///   in 1..=9, which is how real DDDs are allocated
/// - All-repeated-digit numbers ("99999999999") are rejected; they are
///   placeholder junk typed in to get past required-field UIs
///
/// ## Example
/// ```rust
/// use caderneta_core::validation::normalize_phone;
///
/// assert_eq!(normalize_phone("(11) 98765-4321"), Some("11987654321".to_string()));
/// assert_eq!(normalize_phone("+55 21 2345-6789"), Some("2123456789".to_string()));
/// assert_eq!(normalize_phone("99999999999"), None);
/// assert_eq!(normalize_phone("123"), None);
/// ```
pub fn normalize_phone(raw: &str) -> Option<String> {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    // Strip country code if the remainder is still a complete number.
    if digits.len() > 11 && digits.starts_with("55") {
        digits = digits[2..].to_string();
    }

    if digits.len() != 10 && digits.len() != 11 {
        return None;
    }

    let bytes = digits.as_bytes();
    let ddd_ok = (b'1'..=b'9').contains(&bytes[0]) && (b'1'..=b'9').contains(&bytes[1]);
    if !ddd_ok {
        return None;
    }

    let first = bytes[0];
    if bytes.iter().all(|b| *b == first) {
        return None;
    }

    Some(digits)
}

/// Strict variant for the write path: empty input is fine (no phone),
/// but a non-empty input that fails normalization is a caller error.
pub fn validate_phone(raw: &str) -> ValidationResult<Option<String>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    normalize_phone(raw)
        .map(Some)
        .ok_or_else(|| ValidationError::InvalidFormat {
            field: "phone".to_string(),
            reason: "not a plausible Brazilian phone number".to_string(),
        })
}

// =============================================================================
// Date Normalization
// =============================================================================

/// Parses a stored date string into a real calendar date.
///
/// Accepts `YYYY-MM-DD` (canonical) and `DD/MM/YYYY` (legacy rows written
/// before the v2 date normalization). chrono does the calendar check, so
/// impossible dates like `2023-02-31` come back `None`.
pub fn parse_date_lenient(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    // Datetime strings occasionally end up in date columns; take the
    // date part and let the parser judge it.
    let date_part = raw.split(['T', ' ']).next().unwrap_or(raw);

    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%d/%m/%Y"))
        .ok()
}

/// Write-path date check: the date must be a real calendar date.
pub fn validate_date(field: &'static str, raw: &str) -> ValidationResult<NaiveDate> {
    parse_date_lenient(raw).ok_or_else(|| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "not a valid calendar date".to_string(),
    })
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a debt total in centavos (zero allowed: gifts happen).
pub fn validate_value_total(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: "value_total".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a payment amount in centavos (must be strictly positive).
pub fn validate_payment_amount(cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }

    Ok(())
}

/// Validates a visit order (must be >= 1).
pub fn validate_visit_order(order: i64) -> ValidationResult<()> {
    if order < 1 {
        return Err(ValidationError::OutOfRange {
            field: "visit_order".to_string(),
            min: 1,
            max: i64::MAX,
        });
    }

    Ok(())
}

// =============================================================================
// Search Normalization
// =============================================================================

/// Lowercases and strips diacritics from a search term.
///
/// The LIKE fallback search compares accent-folded text on both sides, so
/// a collector typing "joao" finds "João". The fold table covers the
/// Portuguese alphabet; anything else passes through unchanged.
pub fn fold_accents(input: &str) -> String {
    input
        .chars()
        .flat_map(|c| {
            let lower = c.to_lowercase();
            lower.map(|lc| match lc {
                'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
                'é' | 'è' | 'ê' | 'ë' => 'e',
                'í' | 'ì' | 'î' | 'ï' => 'i',
                'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
                'ú' | 'ù' | 'û' | 'ü' => 'u',
                'ç' => 'c',
                'ñ' => 'n',
                other => other,
            })
        })
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_client_name() {
        assert_eq!(validate_client_name("  Maria Silva ").unwrap(), "Maria Silva");
        assert!(validate_client_name("").is_err());
        assert!(validate_client_name("   ").is_err());
        assert!(validate_client_name(&"a".repeat(200)).is_err());
    }

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("  casa azul  "), Some("casa azul".to_string()));
        assert_eq!(sanitize_text(""), None);
        assert_eq!(sanitize_text("   "), None);
        assert_eq!(sanitize_text("a\u{0000}b"), Some("ab".to_string()));

        let long = "x".repeat(2000);
        assert_eq!(sanitize_text(&long).unwrap().len(), MAX_TEXT_LEN);
    }

    #[test]
    fn test_normalize_phone_accepts_real_numbers() {
        assert_eq!(
            normalize_phone("(11) 98765-4321"),
            Some("11987654321".to_string())
        );
        assert_eq!(normalize_phone("2123456789"), Some("2123456789".to_string()));
        assert_eq!(
            normalize_phone("+55 11 98765-4321"),
            Some("11987654321".to_string())
        );
    }

    #[test]
    fn test_normalize_phone_rejects_junk() {
        // Too short / too long
        assert_eq!(normalize_phone("123"), None);
        assert_eq!(normalize_phone("123456789012345"), None);
        // DDD with a zero digit
        assert_eq!(normalize_phone("0187654321"), None);
        assert_eq!(normalize_phone("1087654321"), None);
        // Placeholder junk
        assert_eq!(normalize_phone("99999999999"), None);
        assert_eq!(normalize_phone("1111111111"), None);
        // Empty
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn test_validate_phone_empty_is_none() {
        assert_eq!(validate_phone("").unwrap(), None);
        assert_eq!(validate_phone("  ").unwrap(), None);
        assert!(validate_phone("banana").is_err());
    }

    #[test]
    fn test_parse_date_lenient() {
        assert_eq!(
            parse_date_lenient("2024-03-15"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(
            parse_date_lenient("15/03/2024"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(
            parse_date_lenient("2024-03-15T10:30:00Z"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        // Impossible calendar dates are rejected
        assert_eq!(parse_date_lenient("2023-02-31"), None);
        assert_eq!(parse_date_lenient("2023-04-31"), None);
        // Leap year handling
        assert_eq!(
            parse_date_lenient("2024-02-29"),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(parse_date_lenient("2023-02-29"), None);
        assert_eq!(parse_date_lenient(""), None);
        assert_eq!(parse_date_lenient("garbage"), None);
    }

    #[test]
    fn test_numeric_validators() {
        assert!(validate_value_total(0).is_ok());
        assert!(validate_value_total(10000).is_ok());
        assert!(validate_value_total(-1).is_err());

        assert!(validate_payment_amount(1).is_ok());
        assert!(validate_payment_amount(0).is_err());
        assert!(validate_payment_amount(-500).is_err());

        assert!(validate_visit_order(1).is_ok());
        assert!(validate_visit_order(42).is_ok());
        assert!(validate_visit_order(0).is_err());
    }

    #[test]
    fn test_fold_accents() {
        assert_eq!(fold_accents("João"), "joao");
        assert_eq!(fold_accents("José Conceição"), "jose conceicao");
        assert_eq!(fold_accents("AÇÚCAR"), "acucar");
        assert_eq!(fold_accents("plain"), "plain");
    }
}
