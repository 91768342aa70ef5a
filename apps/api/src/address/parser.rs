//! Address string parser — heuristic decomposition of a flat provider
//! suggestion string (e.g. `"4 MILBURN CCT, BOOLAROO NSW 2284"`) into
//! structured components.
//!
//! Best effort by design: anything unparseable lands in an empty string,
//! never an error. Provider-structured fields are always preferred when
//! available; this parser only fills the gaps.

use crate::models::address::CanonicalAddress;

/// Components recovered from a flat suggestion string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedAddressText {
    pub street_number: String,
    pub street_name: String,
    pub street_type: String,
    pub suburb: String,
    pub state: String,
    pub postcode: String,
}

impl ParsedAddressText {
    pub fn into_canonical(self, country: &str) -> CanonicalAddress {
        CanonicalAddress {
            street_number: self.street_number,
            street_name: self.street_name,
            street_type: self.street_type,
            unit_number: None,
            unit_type: None,
            suburb: self.suburb,
            state: self.state,
            postcode: self.postcode,
            country: country.to_string(),
        }
    }
}

/// Splits a suggestion string into street and locality halves on the first
/// `", "`, then tokenizes each half positionally.
///
/// Known limits: street names with embedded commas or multi-word street
/// types (e.g. "GREAT WESTERN HWY" parses the type correctly but
/// "AVENUE OF THE ALLIES" does not) can mis-parse. Callers should prefer
/// provider-structured fields where the payload carries them.
pub fn parse_suggestion_text(text: &str) -> ParsedAddressText {
    let mut parsed = ParsedAddressText::default();

    let (street_part, locality_part) = match text.split_once(", ") {
        Some((s, l)) => (s.trim(), Some(l.trim())),
        None => (text.trim(), None),
    };

    let tokens: Vec<&str> = street_part.split_whitespace().collect();
    match tokens.len() {
        0 => {}
        1 => parsed.street_name = tokens[0].to_string(),
        2 => {
            parsed.street_number = tokens[0].to_string();
            parsed.street_name = tokens[1].to_string();
        }
        n => {
            parsed.street_number = tokens[0].to_string();
            parsed.street_type = tokens[n - 1].to_string();
            parsed.street_name = tokens[1..n - 1].join(" ");
        }
    }

    if let Some(locality) = locality_part {
        let tokens: Vec<&str> = locality.split_whitespace().collect();
        match tokens.len() {
            0 => {}
            1 => parsed.suburb = tokens[0].to_string(),
            2 => {
                parsed.suburb = tokens[0].to_string();
                parsed.state = tokens[1].to_string();
            }
            n => {
                parsed.postcode = tokens[n - 1].to_string();
                parsed.state = tokens[n - 2].to_string();
                parsed.suburb = tokens[..n - 2].join(" ");
            }
        }
    }

    parsed
}
