// 🔢 ISIN Validator - ISO 6166 check digit
//
// Pure function, never panics, never errors: a malformed value is simply
// invalid. Callers log it, keep the value and flag it in the audit trail.

use serde::{Deserialize, Serialize};

pub const ISIN_LEN: usize = 12;

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsinStatus {
    Valid,
    /// Wrong length or characters outside the ISIN alphabet
    Malformed,
    /// Well-formed but the check digit does not match
    BadCheckDigit,
}

impl IsinStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, IsinStatus::Valid)
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

/// True iff `isin` is a well-formed ISIN with a correct check digit
pub fn validate(isin: &str) -> bool {
    classify(isin).is_valid()
}

/// Like `validate`, but says why a value failed
pub fn classify(isin: &str) -> IsinStatus {
    let upper = isin.to_ascii_uppercase();

    if !is_well_formed(&upper) {
        return IsinStatus::Malformed;
    }

    let (body, declared) = upper.split_at(ISIN_LEN - 1);
    let declared = match declared.chars().next().and_then(|c| c.to_digit(10)) {
        Some(d) => d,
        None => return IsinStatus::Malformed,
    };

    match check_digit(body) {
        Some(expected) if expected == declared => IsinStatus::Valid,
        Some(_) => IsinStatus::BadCheckDigit,
        None => IsinStatus::Malformed,
    }
}

/// Compute the check digit for an 11-character ISIN body.
///
/// Letters expand to two digits (A=10 ... Z=35). Starting from the rightmost
/// digit, every second digit is doubled and doubled values >= 10 are reduced
/// to their digit sum. Result is (10 - sum mod 10) mod 10.
pub fn check_digit(body: &str) -> Option<u32> {
    if body.len() != ISIN_LEN - 1 {
        return None;
    }

    let mut digits: Vec<u32> = Vec::with_capacity(22);
    for c in body.chars() {
        let value = c.to_ascii_uppercase().to_digit(36)?;
        if value >= 10 {
            digits.push(value / 10);
            digits.push(value % 10);
        } else {
            digits.push(value);
        }
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 0 {
                let doubled = d * 2;
                if doubled >= 10 {
                    doubled / 10 + doubled % 10
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();

    Some((10 - sum % 10) % 10)
}

/// 2 letters, 9 alphanumerics, 1 decimal digit
fn is_well_formed(isin: &str) -> bool {
    if isin.len() != ISIN_LEN || !isin.is_ascii() {
        return false;
    }
    let bytes = isin.as_bytes();

    bytes[..2].iter().all(|b| b.is_ascii_uppercase())
        && bytes[2..11].iter().all(|b| b.is_ascii_alphanumeric())
        && bytes[11].is_ascii_digit()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN_VALID: [&str; 7] = [
        "US0378331005",
        "IE00B4L5Y983",
        "DE000A289QR9",
        "FR0013508512",
        "IT0005422768",
        "XS2104129486",
        "XS2104129569",
    ];

    #[test]
    fn test_known_isins_validate() {
        for isin in KNOWN_VALID {
            assert!(validate(isin), "{} should be valid", isin);
        }
    }

    #[test]
    fn test_lowercase_accepted() {
        assert!(validate("us0378331005"));
    }

    #[test]
    fn test_constructed_isins_validate() {
        let bodies = [
            "XS210000000",
            "GB00BH4HKS3",
            "NL000000000",
            "ES030524800",
            "AB1CD2EF3GH",
            "ZZZZZZZZZZZ",
        ];

        for body in bodies {
            let digit = check_digit(body).unwrap();
            let isin = format!("{}{}", body, digit);
            assert!(validate(&isin), "{} built from its own check digit", isin);

            // Any other check digit must fail
            for wrong in (0..10).filter(|d| *d != digit) {
                let bad = format!("{}{}", body, wrong);
                assert_eq!(classify(&bad), IsinStatus::BadCheckDigit, "{}", bad);
            }
        }
    }

    #[test]
    fn test_malformed_inputs() {
        assert_eq!(classify(""), IsinStatus::Malformed);
        assert_eq!(classify("NA"), IsinStatus::Malformed);
        assert_eq!(classify("US037833100"), IsinStatus::Malformed);
        assert_eq!(classify("US03783310055"), IsinStatus::Malformed);
        assert_eq!(classify("1S0378331005"), IsinStatus::Malformed);
        assert_eq!(classify("US037833100X"), IsinStatus::Malformed);
        assert_eq!(classify("US03783-1005"), IsinStatus::Malformed);
        assert_eq!(classify("US03783310é5"), IsinStatus::Malformed);
    }

    #[test]
    fn test_check_digit_rejects_bad_body() {
        assert_eq!(check_digit("US03783310"), None);
        assert_eq!(check_digit("US0378331-0"), None);
    }
}
