//! Human-portable encodings: unpadded base64url and 24-digit rescue codes
//!
//! Both decoders ignore anything outside their alphabet, so text that was
//! line-wrapped, indented, or retyped with spaces and dashes still decodes.

use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use rand::{CryptoRng, Rng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sqrl_core::{SqrlError, SqrlResult};

/// Decoder for hand-carried text: padding optional, and the unused low
/// bits of a final partial group are ignored rather than rejected.
const LENIENT_B64U: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// base64url without `=` padding.
pub fn encode_b64u(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode base64url, skipping every byte outside the alphabet.
pub fn decode_b64u(text: &[u8]) -> SqrlResult<Vec<u8>> {
    let clean = clean_b64u(text);
    if clean.len() % 4 == 1 {
        return Err(SqrlError::Encoding(format!(
            "base64url text has impossible length {}",
            clean.len()
        )));
    }
    LENIENT_B64U
        .decode(clean.as_bytes())
        .map_err(|e| SqrlError::Encoding(format!("base64url decode: {e}")))
}

/// Keep only `[A-Za-z0-9_-]`.
pub fn clean_b64u(text: &[u8]) -> String {
    text.iter()
        .copied()
        .filter(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
        .map(char::from)
        .collect()
}

/// Keep only `[0-9]`.
pub fn only_digits(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

/// An emergency rescue code: 24 decimal digits (~79 bits).
pub struct RescueCode {
    digits: SecretString,
}

impl RescueCode {
    pub const DIGITS: usize = 24;
    const GROUP: usize = 4;

    /// Draw 24 uniformly random digits.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let digits: String = (0..Self::DIGITS)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        Self {
            digits: SecretString::from(digits),
        }
    }

    /// Accept the code as typed: dashes, spaces and line breaks are ignored.
    pub fn parse(input: &str) -> SqrlResult<Self> {
        let digits = only_digits(input);
        if digits.len() != Self::DIGITS {
            return Err(SqrlError::InvalidRescueCode);
        }
        Ok(Self {
            digits: SecretString::from(digits),
        })
    }

    /// The bare 24 digits, which is what gets stretched.
    pub fn expose_digits(&self) -> &str {
        self.digits.expose_secret()
    }

    /// Display form: six dash-separated groups of four digits.
    pub fn grouped(&self) -> String {
        let digits = self.digits.expose_secret().as_bytes();
        digits
            .chunks(Self::GROUP)
            .map(|g| String::from_utf8_lossy(g).into_owned())
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Debug for RescueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RescueCode")
            .field("digits", &"[REDACTED]")
            .finish()
    }
}
