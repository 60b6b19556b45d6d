//! Payer input validation for push initiation

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{AppError, AppResult};

pub const MIN_AMOUNT: f64 = 1.0;
pub const MAX_AMOUNT: f64 = 70_000.0;

pub const MISSING_FIELDS_MESSAGE: &str = "Phone number and amount are required";
pub const INVALID_PHONE_MESSAGE: &str =
    "Invalid phone number. Use a Safaricom number like 0712345678 or 254712345678";
pub const INVALID_AMOUNT_MESSAGE: &str = "Amount must be between KES 1 and KES 70,000";

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(254[17]\d{8}|0[17]\d{8}|[17]\d{8})$").expect("phone pattern is valid")
    })
}

/// Amount as submitted: a JSON number or a numeric string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Number(f64),
    Text(String),
}

impl From<f64> for AmountInput {
    fn from(value: f64) -> Self {
        AmountInput::Number(value)
    }
}

impl From<&str> for AmountInput {
    fn from(value: &str) -> Self {
        AmountInput::Text(value.to_string())
    }
}

/// Strip spaces and an international prefix, then rewrite to `254XXXXXXXXX`
pub fn normalize_phone(raw: &str) -> AppResult<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = compact
        .strip_prefix('+')
        .or_else(|| compact.strip_prefix("00"))
        .unwrap_or(&compact);

    if !phone_pattern().is_match(digits) {
        return Err(AppError::validation(INVALID_PHONE_MESSAGE));
    }

    let subscriber = if let Some(rest) = digits.strip_prefix("254") {
        rest
    } else if let Some(rest) = digits.strip_prefix('0') {
        rest
    } else {
        digits
    };

    Ok(format!("254{}", subscriber))
}

pub fn parse_amount(input: &AmountInput) -> AppResult<f64> {
    let amount = match input {
        AmountInput::Number(n) => *n,
        AmountInput::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| AppError::validation(INVALID_AMOUNT_MESSAGE))?,
    };

    if !amount.is_finite() || !(MIN_AMOUNT..=MAX_AMOUNT).contains(&amount) {
        return Err(AppError::validation(INVALID_AMOUNT_MESSAGE));
    }
    Ok(amount)
}

/// Whole units sent to the gateway
pub fn gateway_amount(amount: f64) -> u64 {
    amount.floor() as u64
}
