//! MRZ key-input arithmetic: check digits and synthetic candidate
//! composition for document-number-only reads.
//!
//! When only the document number is known, BAC can still succeed by brute
//! forcing the birth date. Candidates reuse the document number's embedded
//! birth-year digits and derive a plausible expiry date from the holder's
//! age bracket, so only month and day need to be searched.

use crate::error::Error;
use std::ops::RangeInclusive;

/// Check-digit weights, repeated over the field.
const WEIGHTS: [u32; 3] = [7, 3, 1];

/// Numeric value of an MRZ character: digits, uppercase letters, `<`.
fn char_value(c: u8) -> Result<u32, Error> {
    match c {
        b'0'..=b'9' => Ok((c - b'0') as u32),
        b'A'..=b'Z' => Ok((c - b'A' + 10) as u32),
        b'<' => Ok(0),
        _ => Err(Error::DataGroupParse("character outside MRZ alphabet")),
    }
}

/// ICAO 9303 check digit over an MRZ field, as an ASCII digit.
pub fn check_digit(field: &[u8]) -> Result<u8, Error> {
    let mut sum = 0;
    for (i, &c) in field.iter().enumerate() {
        sum += char_value(c)? * WEIGHTS[i % 3];
    }
    Ok(b'0' + (sum % 10) as u8)
}

/// Candidate birth month/day ranges for scan mode.
#[derive(Clone, Debug)]
pub struct BirthdateSearch {
    pub months: RangeInclusive<u8>,
    pub days: RangeInclusive<u8>,
}

impl BirthdateSearch {
    /// Every day of the year.
    pub fn full_year() -> Self {
        Self {
            months: 1..=12,
            days: 1..=31,
        }
    }

    /// All (month, day) candidates in order.
    pub fn candidates(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.months
            .clone()
            .flat_map(|month| self.days.clone().map(move |day| (month, day)))
    }
}

/// Compose the 24-byte MRZ key input for one birth-date candidate.
///
/// The two birth-year digits come from document-number characters 1..3; the
/// expiry date reuses the candidate month and day with a year picked by the
/// holder-age bracket. `Ok(None)` means the bracket has no plausible expiry
/// (holder older than 60), so the candidate is skipped.
pub fn compose_key_input(
    document_number: &[u8; 9],
    month: u8,
    day: u8,
    current_year: u16,
) -> Result<Option<[u8; 24]>, Error> {
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(Error::DataGroupParse("birth date out of range"));
    }

    let year_digits = [document_number[1], document_number[2]];
    let birth_year = resolve_century(&year_digits, current_year)?;
    let Some(expiry_year) = expiry_year(birth_year, i32::from(current_year)) else {
        return Ok(None);
    };

    let mut input = [0u8; 24];
    input[..9].copy_from_slice(document_number);
    input[9] = check_digit(document_number)?;

    let birth = [
        year_digits[0],
        year_digits[1],
        b'0' + month / 10,
        b'0' + month % 10,
        b'0' + day / 10,
        b'0' + day % 10,
    ];
    input[10..16].copy_from_slice(&birth);
    input[16] = check_digit(&birth)?;

    let mut expiry = birth;
    expiry[0] = b'0' + ((expiry_year / 10) % 10) as u8;
    expiry[1] = b'0' + (expiry_year % 10) as u8;
    input[17..23].copy_from_slice(&expiry);
    input[23] = check_digit(&expiry)?;

    Ok(Some(input))
}

/// Resolve two year digits against `current_year`: years not yet reached in
/// this century belong to the previous one.
fn resolve_century(digits: &[u8; 2], current_year: u16) -> Result<i32, Error> {
    let value = (char_value(digits[0])? * 10 + char_value(digits[1])?) as i32;
    if value < i32::from(current_year % 100) {
        Ok(2000 + value)
    } else {
        Ok(1900 + value)
    }
}

/// Documents are issued with 25, 40 or 60 year horizons depending on the
/// holder's age; outside those brackets there is no plausible expiry.
fn expiry_year(birth_year: i32, current_year: i32) -> Option<i32> {
    let age = current_year - birth_year;
    if age <= 25 {
        Some(birth_year + 25)
    } else if age <= 40 {
        Some(birth_year + 40)
    } else if age <= 60 {
        Some(birth_year + 60)
    } else {
        None
    }
}
