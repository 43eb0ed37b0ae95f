//! Validation and sanitization of untrusted strings.
//!
//! Everything here is pure: no I/O, no shared state. Callers hand in a
//! string and a [`Kind`] and get a [`ValidationResult`] back; nothing in
//! this module panics or returns an error type past its boundary.
//!
//! Phone numbers follow the Pakistani mobile plan: country code `92`,
//! then a ten-digit group starting with `3`. The canonical form is
//! `+92-3XX-XXXXXXX`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::Validation;

/// What the input is supposed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Phone,
    Price,
    Freetext,
}

/// Why an input was rejected. The `code` of each variant is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Reason {
    #[error("input is empty")]
    Empty,

    #[error("contains characters other than digits and separators")]
    InvalidCharacter,

    #[error("missing country code 92")]
    MissingCountryCode,

    #[error("wrong number of digits")]
    WrongLength,

    #[error("not a mobile number")]
    NotMobile,

    #[error("separators in unexpected positions")]
    Malformed,

    #[error("not a number")]
    NotANumber,

    #[error("price must be positive")]
    NonPositive,

    #[error("price below minimum")]
    BelowMinimum,

    #[error("price above maximum")]
    AboveMaximum,
}

impl Reason {
    pub fn code(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::InvalidCharacter => "invalid-character",
            Self::MissingCountryCode => "missing-country-code",
            Self::WrongLength => "wrong-length",
            Self::NotMobile => "not-mobile",
            Self::Malformed => "malformed",
            Self::NotANumber => "not-a-number",
            Self::NonPositive => "non-positive",
            Self::BelowMinimum => "below-minimum",
            Self::AboveMaximum => "above-maximum",
        }
    }
}

/// Outcome of one validation call. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub normalized: Option<String>,
    pub reason: Option<Reason>,
}

impl ValidationResult {
    fn ok(normalized: String) -> Self {
        Self {
            valid: true,
            normalized: Some(normalized),
            reason: None,
        }
    }

    fn rejected(reason: Reason) -> Self {
        Self {
            valid: false,
            normalized: None,
            reason: Some(reason),
        }
    }
}

impl ValidationResult {
    /// The normalized value, or why there is none.
    pub fn into_result(self) -> Result<String, Reason> {
        match self {
            Self {
                valid: true,
                normalized: Some(value),
                ..
            } => Ok(value),
            Self { reason, .. } => Err(reason.unwrap_or(Reason::Malformed)),
        }
    }
}

impl<T: fmt::Display> From<Result<T, Reason>> for ValidationResult {
    fn from(result: Result<T, Reason>) -> Self {
        match result {
            Ok(v) => Self::ok(v.to_string()),
            Err(r) => Self::rejected(r),
        }
    }
}

/// Optional `+`, country code, then `3XX` and seven digits, each group
/// separated by at most one `-` or space.
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?92[- ]?(3[0-9]{2})[- ]?([0-9]{7})$").expect("phone pattern is valid")
});

/// Currency markers accepted around a price.
static CURRENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:rs\.?|pkr)\s*|\s*(?:rs\.?|pkr|/-)$").expect("currency pattern is valid")
});

/// ASCII digits with optional thousands separators and a fraction.
static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(?:[0-9]{1,3}(?:,[0-9]{3})+|[0-9]+)(?:\.[0-9]+)?$").expect("amount pattern is valid")
});

/// Validates untrusted strings against the configured bounds.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    bounds: Validation,
}

impl Validator {
    pub fn new(bounds: Validation) -> Self {
        Self { bounds }
    }

    pub fn validate(&self, kind: Kind, input: &str) -> ValidationResult {
        match kind {
            Kind::Phone => phone(input).into(),
            Kind::Price => self.price(input).into(),
            Kind::Freetext => ValidationResult::ok(self.freetext(input)),
        }
    }

    /// Parse a price and check it against `[min_price, max_price]`, inclusive.
    /// Accepted values are rounded to two decimals.
    pub fn price(&self, input: &str) -> Result<f64, Reason> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Reason::Empty);
        }

        let amount = CURRENCY.replace_all(trimmed, "");
        let amount = amount.trim();
        if !AMOUNT.is_match(amount) {
            return Err(Reason::NotANumber);
        }

        let value: f64 = amount
            .replace(',', "")
            .parse()
            .map_err(|_| Reason::NotANumber)?;
        if value <= 0.0 {
            return Err(Reason::NonPositive);
        }
        if value < self.bounds.min_price {
            return Err(Reason::BelowMinimum);
        }
        if value > self.bounds.max_price {
            return Err(Reason::AboveMaximum);
        }
        Ok((value * 100.0).round() / 100.0)
    }

    /// Strip control characters and cap the length. Never rejects.
    pub fn freetext(&self, input: &str) -> String {
        sanitize(input, self.bounds.freetext_max_len)
    }
}

/// Normalize a mobile number to `+92-3XX-XXXXXXX`.
pub fn phone(input: &str) -> Result<String, Reason> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Reason::Empty);
    }

    if let Some(caps) = PHONE.captures(trimmed) {
        return Ok(format!("+92-{}-{}", &caps[1], &caps[2]));
    }

    // No match: work out the most specific reason.
    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if !body.chars().all(|c| c.is_ascii_digit() || c == '-' || c == ' ') {
        return Err(Reason::InvalidCharacter);
    }
    let digits: String = body.chars().filter(char::is_ascii_digit).collect();
    if !digits.starts_with("92") {
        return Err(Reason::MissingCountryCode);
    }
    if digits.len() != 12 {
        return Err(Reason::WrongLength);
    }
    if !digits[2..].starts_with('3') {
        return Err(Reason::NotMobile);
    }
    Err(Reason::Malformed)
}

/// Whitespace controls become a space, other controls are dropped, and the
/// result is trimmed and cut to `max_len` code points.
pub fn sanitize(input: &str, max_len: usize) -> String {
    let cleaned: String = input
        .chars()
        .filter_map(|c| match c {
            '\t' | '\n' | '\r' => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();
    cleaned.trim().chars().take(max_len).collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new(Validation::default())
    }

    // ── Phone ──

    #[test]
    fn phone_formats_normalize_to_one_canonical_form() {
        for input in [
            "+923001234567",
            "923001234567",
            "+92-300-1234567",
            "+92 300 1234567",
            "92-300 1234567",
            "  +92300-1234567 ",
        ] {
            assert_eq!(phone(input).unwrap(), "+92-300-1234567", "input {input:?}");
        }
    }

    #[test]
    fn phone_with_letters_is_invalid_character() {
        assert_eq!(phone("+92300abc4567"), Err(Reason::InvalidCharacter));
        assert_eq!(phone("+92(300)1234567"), Err(Reason::InvalidCharacter));
    }

    #[test]
    fn phone_with_non_ascii_digits_is_invalid_character() {
        assert_eq!(phone("+92300۱۲۳۴۵۶۷"), Err(Reason::InvalidCharacter));
        assert_eq!(phone("+92٣٠٠1234567"), Err(Reason::InvalidCharacter));
        assert_eq!(phone("۹۲۳۰۰۱۲۳۴۵۶۷"), Err(Reason::InvalidCharacter));
    }

    #[test]
    fn phone_without_country_code_is_rejected() {
        assert_eq!(phone("03001234567"), Err(Reason::MissingCountryCode));
        assert_eq!(phone("3001234567"), Err(Reason::MissingCountryCode));
    }

    #[test]
    fn phone_with_wrong_length_is_rejected() {
        assert_eq!(phone("+9230012345"), Err(Reason::WrongLength));
        assert_eq!(phone("+9230012345678"), Err(Reason::WrongLength));
    }

    #[test]
    fn landline_is_not_mobile() {
        assert_eq!(phone("+924235761234"), Err(Reason::NotMobile));
    }

    #[test]
    fn doubled_separators_are_malformed() {
        assert_eq!(phone("+92--300-1234567"), Err(Reason::Malformed));
        assert_eq!(phone("+92 3001 234567"), Err(Reason::Malformed));
    }

    #[test]
    fn empty_phone_is_rejected() {
        assert_eq!(phone("   "), Err(Reason::Empty));
    }

    #[test]
    fn reason_codes_are_stable() {
        let result = validator().validate(Kind::Phone, "0300-1234567");
        assert!(!result.valid);
        assert_eq!(result.normalized, None);
        assert_eq!(result.reason.map(Reason::code), Some("missing-country-code"));
    }

    // ── Price ──

    #[test]
    fn price_bounds_are_inclusive() {
        let v = validator();
        assert_eq!(v.price("100"), Ok(100.0));
        assert_eq!(v.price("999999999"), Ok(999_999_999.0));
        assert_eq!(v.price("99"), Err(Reason::BelowMinimum));
        assert_eq!(v.price("1000000000"), Err(Reason::AboveMaximum));
    }

    #[test]
    fn price_accepts_currency_and_thousands_separators() {
        let v = validator();
        assert_eq!(v.price("Rs 65,000"), Ok(65_000.0));
        assert_eq!(v.price("rs.65000"), Ok(65_000.0));
        assert_eq!(v.price("65,000 PKR"), Ok(65_000.0));
        assert_eq!(v.price("1,250.50"), Ok(1_250.5));
        assert_eq!(v.price("4500/-"), Ok(4_500.0));
    }

    #[test]
    fn non_positive_prices_are_rejected() {
        let v = validator();
        assert_eq!(v.price("0"), Err(Reason::NonPositive));
        assert_eq!(v.price("-500"), Err(Reason::NonPositive));
    }

    #[test]
    fn non_numeric_prices_are_rejected() {
        let v = validator();
        assert_eq!(v.price("call for price"), Err(Reason::NotANumber));
        assert_eq!(v.price("NaN"), Err(Reason::NotANumber));
        assert_eq!(v.price("inf"), Err(Reason::NotANumber));
        assert_eq!(v.price("65,00"), Err(Reason::NotANumber));
        assert_eq!(v.price(""), Err(Reason::Empty));
    }

    #[test]
    fn long_fractions_reach_the_bound_checks() {
        let v = validator();
        assert_eq!(v.price("0.001"), Err(Reason::BelowMinimum));
        assert_eq!(v.price("99.999"), Err(Reason::BelowMinimum));
        assert_eq!(v.price("0.000"), Err(Reason::NonPositive));
        assert_eq!(v.price("1,250.506"), Ok(1_250.51));
    }

    #[test]
    fn non_ascii_digit_prices_are_not_numbers() {
        assert_eq!(validator().price("۶۵۰۰۰"), Err(Reason::NotANumber));
    }

    #[test]
    fn configured_bounds_apply() {
        let v = Validator::new(Validation {
            min_price: 1_000.0,
            max_price: 2_000.0,
            freetext_max_len: 10,
        });
        assert_eq!(v.price("999"), Err(Reason::BelowMinimum));
        assert_eq!(v.price("2,000"), Ok(2_000.0));
        assert_eq!(v.price("2001"), Err(Reason::AboveMaximum));
    }

    #[test]
    fn price_result_normalizes_number() {
        let result = validator().validate(Kind::Price, "Rs 65,000");
        assert!(result.valid);
        assert_eq!(result.normalized.as_deref(), Some("65000"));
    }

    // ── Freetext ──

    #[test]
    fn freetext_strips_controls_and_null_bytes() {
        let cleaned = sanitize("Growatt\0 5kW\x07\ninverter", 1000);
        assert_eq!(cleaned, "Growatt 5kW inverter");
    }

    #[test]
    fn freetext_truncates_by_code_point() {
        let input = "ü".repeat(1500);
        let cleaned = sanitize(&input, 1000);
        assert_eq!(cleaned.chars().count(), 1000);
    }

    #[test]
    fn freetext_is_always_valid() {
        let result = validator().validate(Kind::Freetext, "\0\0\0");
        assert!(result.valid);
        assert_eq!(result.normalized.as_deref(), Some(""));
    }
}
