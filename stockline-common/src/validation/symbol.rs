//! Symbol and currency-code validation.
//!
//! Tickers are validated after uppercasing; the accepted alphabet includes
//! `.` and `-` for share classes (`BRK.B`) and exchange suffixes (`RY-T`).

use thiserror::Error;

/// Errors from symbol validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolValidationError {
    /// Symbol is empty
    #[error("symbol cannot be empty")]
    Empty,

    /// Symbol is too long
    #[error("symbol '{symbol}' exceeds maximum length of {max} characters")]
    TooLong { symbol: String, max: usize },

    /// Symbol contains invalid characters
    #[error("symbol '{symbol}' contains invalid characters (allowed: A-Z, 0-9, '.', '-')")]
    InvalidCharacters { symbol: String },
}

impl From<SymbolValidationError> for crate::error::FabricError {
    fn from(err: SymbolValidationError) -> Self {
        crate::error::FabricError::Validation(err.to_string())
    }
}

/// Symbol validator with configurable length bounds.
///
/// # Example
///
/// ```
/// use stockline_common::validation::SymbolValidator;
///
/// let validator = SymbolValidator::new();
/// assert_eq!(validator.normalize("aapl").unwrap(), "AAPL");
/// assert!(validator.validate("BRK.B").is_ok());
/// assert!(validator.validate("TOO_LONG_SYMBOL").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct SymbolValidator {
    max_length: usize,
}

impl SymbolValidator {
    /// Default validator: 1-10 characters of `[A-Z0-9.\-]`.
    pub fn new() -> Self {
        Self { max_length: 10 }
    }

    /// Override the maximum length.
    pub fn with_max_length(mut self, max: usize) -> Self {
        self.max_length = max;
        self
    }

    /// Validate an already-uppercased symbol.
    pub fn validate(&self, symbol: &str) -> Result<(), SymbolValidationError> {
        if symbol.is_empty() {
            return Err(SymbolValidationError::Empty);
        }
        if symbol.len() > self.max_length {
            return Err(SymbolValidationError::TooLong {
                symbol: symbol.to_string(),
                max: self.max_length,
            });
        }
        let valid = symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-');
        if !valid {
            return Err(SymbolValidationError::InvalidCharacters {
                symbol: symbol.to_string(),
            });
        }
        Ok(())
    }

    /// Uppercase and trim, then validate. Returns the canonical form.
    pub fn normalize(&self, symbol: &str) -> Result<String, SymbolValidationError> {
        let normalized = crate::keys::normalize_symbol(symbol);
        self.validate(&normalized)?;
        Ok(normalized)
    }
}

impl Default for SymbolValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a three-letter ISO currency code, returning the uppercase form.
pub fn validate_currency_code(code: &str) -> Result<String, SymbolValidationError> {
    let normalized = crate::keys::normalize_symbol(code);
    if normalized.len() != 3 || !normalized.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(SymbolValidationError::InvalidCharacters {
            symbol: code.to_string(),
        });
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_uppercases() {
        let validator = SymbolValidator::new();
        assert_eq!(validator.normalize(" aapl ").unwrap(), "AAPL");
        assert_eq!(validator.normalize("brk.b").unwrap(), "BRK.B");
    }

    #[test]
    fn test_rejects_empty_and_long() {
        let validator = SymbolValidator::new();
        assert_eq!(validator.validate(""), Err(SymbolValidationError::Empty));
        assert!(matches!(
            validator.validate("ABCDEFGHIJK"),
            Err(SymbolValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_rejects_invalid_characters() {
        let validator = SymbolValidator::new();
        assert!(matches!(
            validator.validate("AA PL"),
            Err(SymbolValidationError::InvalidCharacters { .. })
        ));
        assert!(matches!(
            validator.validate("AA$"),
            Err(SymbolValidationError::InvalidCharacters { .. })
        ));
    }

    #[test]
    fn test_currency_codes() {
        assert_eq!(validate_currency_code("usd").unwrap(), "USD");
        assert!(validate_currency_code("US").is_err());
        assert!(validate_currency_code("USDT").is_err());
        assert!(validate_currency_code("U$D").is_err());
    }
}
