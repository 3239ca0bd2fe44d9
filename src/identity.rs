//! # Identity Codec
//!
//! Sensors, accounts and devices are all addressed by 20-byte identifiers.
//! The backend and the user see them as 40 lowercase hex characters; the
//! device receives the raw 20 bytes over GATT.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IdentityError;

/// Length of an identity on the wire
pub const IDENTITY_LEN: usize = 20;
/// Length of an identity as hex text
pub const IDENTITY_HEX_LEN: usize = IDENTITY_LEN * 2;

/// Parses 40 hex characters (either case) into the 20-byte wire form.
pub fn encode(hex_str: &str) -> Result<[u8; IDENTITY_LEN], IdentityError> {
    let found = hex_str.chars().count();
    if found != IDENTITY_HEX_LEN {
        log::debug!("Rejecting identity of {} characters", found);
        return Err(IdentityError::InvalidLength {
            expected: IDENTITY_HEX_LEN,
            found,
        });
    }

    // 40 chars but a multi-byte one sneaks in: report the digit, not the length
    if let Some((index, found)) = hex_str
        .chars()
        .enumerate()
        .find(|(_, c)| !c.is_ascii_hexdigit())
    {
        return Err(IdentityError::InvalidHexDigit { index, found });
    }

    let mut bytes = [0u8; IDENTITY_LEN];
    hex::decode_to_slice(hex_str, &mut bytes).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, index } => {
            IdentityError::InvalidHexDigit { index, found: c }
        }
        _ => IdentityError::InvalidLength {
            expected: IDENTITY_HEX_LEN,
            found,
        },
    })?;
    Ok(bytes)
}

/// Renders the wire form as 40 lowercase hex characters.
pub fn decode(bytes: &[u8; IDENTITY_LEN]) -> String {
    hex::encode(bytes)
}

/// A 20-byte identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity([u8; IDENTITY_LEN]);

impl Identity {
    pub const fn from_bytes(bytes: [u8; IDENTITY_LEN]) -> Self {
        Self(bytes)
    }

    /// Accepts a GATT payload, which must be exactly 20 bytes.
    pub fn from_wire(payload: &[u8]) -> Result<Self, IdentityError> {
        let bytes: [u8; IDENTITY_LEN] =
            payload
                .try_into()
                .map_err(|_| IdentityError::InvalidWireLength {
                    expected: IDENTITY_LEN,
                    found: payload.len(),
                })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        decode(&self.0)
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        encode(s).map(Self)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_DIGITS: &[u8] = b"0123456789abcdefABCDEF";

    // Deterministic spread of mixed-case inputs
    fn sample_hex(seed: usize) -> String {
        (0..IDENTITY_HEX_LEN)
            .map(|i| HEX_DIGITS[(seed * 7 + i * 13 + i * i) % HEX_DIGITS.len()] as char)
            .collect()
    }

    #[test]
    fn test_decode_encode_is_lowercase_identity() {
        for seed in 0..64 {
            let s = sample_hex(seed);
            let bytes = encode(&s).expect("valid hex");
            assert_eq!(decode(&bytes), s.to_lowercase());
        }
    }

    #[test]
    fn test_encode_known_value() {
        let bytes = encode("00ff10ab00000000000000000000000000000001").unwrap();
        assert_eq!(&bytes[..4], &[0x00, 0xff, 0x10, 0xab]);
        assert_eq!(bytes[19], 0x01);
    }

    #[test]
    fn test_encode_rejects_wrong_length() {
        for len in [0, 39, 41, 80] {
            let s = "a".repeat(len);
            assert_eq!(
                encode(&s),
                Err(IdentityError::InvalidLength {
                    expected: 40,
                    found: len
                })
            );
        }
    }

    #[test]
    fn test_encode_rejects_non_hex() {
        let s = format!("gg{}", "0".repeat(38));
        assert_eq!(
            encode(&s),
            Err(IdentityError::InvalidHexDigit {
                index: 0,
                found: 'g'
            })
        );
    }

    #[test]
    fn test_encode_rejects_multibyte_char_as_digit() {
        let s = format!("{}é", "0".repeat(39));
        assert!(matches!(
            encode(&s),
            Err(IdentityError::InvalidHexDigit { index: 39, found: 'é' })
        ));
    }

    #[test]
    fn test_decode_is_always_forty_lowercase() {
        let text = decode(&[0xAB; IDENTITY_LEN]);
        assert_eq!(text.len(), IDENTITY_HEX_LEN);
        assert_eq!(text, "ab".repeat(20));
    }

    #[test]
    fn test_from_wire_length() {
        assert!(Identity::from_wire(&[0u8; 20]).is_ok());
        assert_eq!(
            Identity::from_wire(&[0u8; 21]),
            Err(IdentityError::InvalidWireLength {
                expected: 20,
                found: 21
            })
        );
    }

    #[test]
    fn test_identity_serde_as_hex() {
        let id: Identity = "1".repeat(40).parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "1".repeat(40)));
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<Identity>("\"abc\"").is_err());
    }
}
