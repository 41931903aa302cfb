//! Card number checks: Luhn checksum, brand classification, masking.

use std::sync::LazyLock;

use regex::Regex;

use crate::{
    Error, Result,
    types::{BatchCardUpdate, CardBrand, CardRequest},
};

const MASK_CHAR: char = '*';
const VISIBLE_DIGITS: usize = 4;
const MAX_NAME_CHARS: usize = 100;

/// Brand patterns in match priority order.
const BRAND_SOURCES: [(CardBrand, &str); 4] = [
    (CardBrand::Visa, r"^4[0-9]{12}(?:[0-9]{3})?$"),
    (
        CardBrand::Mastercard,
        r"^5[1-5][0-9]{14}$|^2(?:2(?:2[1-9]|[3-9][0-9])|[3-6][0-9][0-9]|7(?:[01][0-9]|20))[0-9]{12}$",
    ),
    (CardBrand::Amex, r"^3[47][0-9]{13}$"),
    (CardBrand::Discover, r"^6(?:011|5[0-9]{2})[0-9]{12}$"),
];

static BRAND_PATTERNS: LazyLock<Vec<(CardBrand, Regex)>> = LazyLock::new(|| {
    compile_brand_patterns().unwrap_or_else(|e| {
        tracing::error!(error = %e, "card brand pattern failed to compile");
        Vec::new()
    })
});

fn compile_brand_patterns() -> std::result::Result<Vec<(CardBrand, Regex)>, regex::Error> {
    BRAND_SOURCES
        .iter()
        .map(|(brand, pattern)| Regex::new(pattern).map(|re| (*brand, re)))
        .collect()
}

/// Strip the spaces and dashes people type between digit groups.
#[must_use]
pub fn clean_card_number(raw: &str) -> String {
    raw.chars().filter(|c| !matches!(c, ' ' | '-')).collect()
}

/// Luhn checksum over a digit string. Any non-digit fails.
#[must_use]
pub fn luhn_valid(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }
    let mut sum = 0u32;
    for (i, c) in number.chars().rev().enumerate() {
        let Some(mut digit) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }
    sum % 10 == 0
}

/// First matching brand wins; no match is [`CardBrand::Unknown`].
#[must_use]
pub fn detect_brand(number: &str) -> CardBrand {
    BRAND_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(number))
        .map_or(CardBrand::Unknown, |(brand, _)| *brand)
}

/// Replace all but the last four characters with `*`.
///
/// Strings shorter than four characters come back unchanged.
#[must_use]
pub fn mask(number: &str) -> String {
    let len = number.chars().count();
    if len < VISIBLE_DIGITS {
        return number.to_string();
    }
    number
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if i < len - VISIBLE_DIGITS {
                MASK_CHAR
            } else {
                c
            }
        })
        .collect()
}

/// Validate a create/update request and return the cleaned card number.
pub fn validate_request(req: &CardRequest, min_expiry_year: i32) -> Result<String> {
    let mut messages = Vec::new();

    check_name(&req.cardholder_name, &mut messages);
    check_month(req.expiry_month, &mut messages);
    check_year(req.expiry_year, min_expiry_year, &mut messages);

    if req.cvv.len() != 3 || !req.cvv.bytes().all(|b| b.is_ascii_digit()) {
        messages.push("cvv must be exactly 3 digits".to_string());
    }

    let number = clean_card_number(&req.card_number);
    if !luhn_valid(&number) {
        messages.push("invalid card number".to_string());
    }

    if messages.is_empty() {
        Ok(number)
    } else {
        Err(Error::Validation { messages })
    }
}

/// Validate the optional fields of one batch item.
pub fn validate_batch_item(update: &BatchCardUpdate, min_expiry_year: i32) -> Result<()> {
    let mut messages = Vec::new();
    if let Some(name) = &update.cardholder_name {
        check_name(name, &mut messages);
    }
    if let Some(month) = update.expiry_month {
        check_month(month, &mut messages);
    }
    if let Some(year) = update.expiry_year {
        check_year(year, min_expiry_year, &mut messages);
    }
    if messages.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation { messages })
    }
}

fn check_name(name: &str, messages: &mut Vec<String>) {
    let chars = name.trim().chars().count();
    if chars == 0 || name.chars().count() > MAX_NAME_CHARS {
        messages.push(format!(
            "cardholder_name must be 1 to {MAX_NAME_CHARS} characters"
        ));
    }
}

fn check_month(month: u8, messages: &mut Vec<String>) {
    if !(1..=12).contains(&month) {
        messages.push("expiry_month must be between 1 and 12".to_string());
    }
}

fn check_year(year: i32, min: i32, messages: &mut Vec<String>) {
    if year < min {
        messages.push(format!("expiry_year must be {min} or later"));
    }
}
