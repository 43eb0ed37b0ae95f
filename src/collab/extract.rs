//! Keyword-based price extraction from message bodies.
//!
//! Each line of a message is scanned for a price in one of the shapes
//! vendors write: `Rs 65,000`, `65,000 PKR`, `price: 65000`, `65000 per`.
//! What remains of the line becomes the product text. The extracted strings
//! are still untrusted; the validator decides what survives.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::{PriceCandidate, RawMessage};

use super::{Extractor, Result};

static PRICE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:rs\.?|rupees?|pkr)\s*([0-9]+(?:,[0-9]{3})*(?:\.[0-9]{1,2})?)",
        r"(?i)([0-9]+(?:,[0-9]{3})*(?:\.[0-9]{1,2})?)\s*(?:rs\.?|rupees?|pkr)\b",
        r"(?i)\bprice\s*[:=]?\s*([0-9]+(?:,[0-9]{3})*)",
        r"(?i)([0-9]+(?:,[0-9]{3})*)\s*(?:/-|per\b)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("price pattern is valid"))
    .collect()
});

/// Characters trimmed from both ends of the product text.
const PRODUCT_TRIM: &[char] = &[' ', '-', ':', '@', '=', ',', '|', '.'];

/// Extracts one candidate per priced line.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordExtractor;

impl KeywordExtractor {
    fn extract_line(line: &str) -> Option<(String, String)> {
        PRICE_PATTERNS.iter().find_map(|re| {
            let caps = re.captures(line)?;
            let whole = caps.get(0)?;
            let price = caps.get(1)?.as_str().to_string();

            let mut product = String::with_capacity(line.len());
            product.push_str(&line[..whole.start()]);
            product.push(' ');
            product.push_str(&line[whole.end()..]);
            let product = product
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .trim_matches(PRODUCT_TRIM)
                .to_string();

            Some((product, price))
        })
    }
}

impl Extractor for KeywordExtractor {
    fn extract(&self, messages: &[RawMessage]) -> Result<Vec<PriceCandidate>> {
        let mut candidates = Vec::new();
        for message in messages {
            for line in message.body.lines() {
                if let Some((product_text, price_text)) = Self::extract_line(line) {
                    candidates.push(PriceCandidate {
                        product_text,
                        price_text,
                        source_sender: message.sender.clone(),
                        received_at: message.received_at,
                    });
                }
            }
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::Timestamp;

    fn message(body: &str) -> RawMessage {
        RawMessage {
            sender: "+923001234567".into(),
            body: body.into(),
            media_ref: None,
            received_at: Timestamp::from_second(1_700_000_000).unwrap(),
        }
    }

    #[test]
    fn extracts_common_price_shapes() {
        let cases = [
            ("Growatt 5kW inverter Rs 185,000", "Growatt 5kW inverter", "185,000"),
            ("Longi 550W panel - 32,500 PKR", "Longi 550W panel", "32,500"),
            ("Tubular battery price: 45000", "Tubular battery", "45000"),
            ("Jinko 580W 28000/- per piece", "Jinko 580W per piece", "28000"),
        ];
        for (line, product, price) in cases {
            assert_eq!(
                KeywordExtractor::extract_line(line),
                Some((product.to_string(), price.to_string())),
                "line {line:?}"
            );
        }
    }

    #[test]
    fn currency_marker_inside_a_word_is_ignored() {
        assert_eq!(
            KeywordExtractor::extract_line("Inverters 5kW Rs 185,000"),
            Some(("Inverters 5kW".to_string(), "185,000".to_string()))
        );
        assert_eq!(
            KeywordExtractor::extract_line("Offers 3 Rs 7,500"),
            Some(("Offers 3".to_string(), "7,500".to_string()))
        );
    }

    #[test]
    fn non_ascii_digits_are_not_prices() {
        assert_eq!(KeywordExtractor::extract_line("Longi panel Rs ۳۲۵۰۰"), None);
    }

    #[test]
    fn one_candidate_per_priced_line() {
        let body = "Good morning!\nGrowatt 5kW Rs 185,000\nLongi 550W Rs 32,500\nThanks";
        let candidates = KeywordExtractor.extract(&[message(body)]).unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].product_text, "Growatt 5kW");
        assert_eq!(candidates[1].price_text, "32,500");
        assert_eq!(candidates[1].source_sender, "+923001234567");
    }

    #[test]
    fn no_messages_no_candidates() {
        assert!(KeywordExtractor.extract(&[]).unwrap().is_empty());
        assert!(KeywordExtractor.extract(&[message("hello")]).unwrap().is_empty());
    }
}
