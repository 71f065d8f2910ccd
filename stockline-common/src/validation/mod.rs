//! Input validation shared across the fabric.

mod symbol;

pub use symbol::{validate_currency_code, SymbolValidationError, SymbolValidator};
