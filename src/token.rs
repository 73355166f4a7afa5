//! # Token Codec
//!
//! Signs an (ad, location) pair into the URL-safe string embedded in each
//! QR code and recovers the pair from it.
//!
//! ## Shape
//!
//! `adId-locationId-<64 hex chars>`
//!
//! The suffix is an HMAC-SHA256 tag over `adId:locationId` keyed by the
//! server secret, so the token is self-verifying: no lookup is needed to
//! tell a minted token from a forged one.
//!
//! ## Parsing
//!
//! Ad ids may contain hyphens (`fight-back`), so the token cannot be parsed
//! by naive splitting. The tag is fixed-width and matched from the **end**
//! of the string, then the remainder is split on its **last** hyphen:
//! everything after it is the location id, everything before it (hyphens
//! included) is the ad id. This is only unambiguous because location ids
//! are hyphen-free, which `encode` enforces.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Hex width of the HMAC-SHA256 authentication tag.
pub const TAG_HEX_LEN: usize = 64;

const SEPARATOR: char = '-';

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    /// An identifier handed to `encode` falls outside its allowed alphabet.
    #[error("identifier outside the allowed character set")]
    BadIdentifier,

    /// Malformed token or signature mismatch. Both collapse into this one
    /// variant so a caller probing the endpoint cannot tell "badly formed"
    /// apart from "right shape, wrong signature".
    #[error("invalid token")]
    Invalid,
}

/// The (ad, location) pair recovered from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub ad_id: String,
    pub location_id: String,
}

/// Stateless codec holding the server-held signing secret.
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl TokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Signs the pair into a token, validating both alphabets first.
    pub fn encode(&self, ad_id: &str, location_id: &str) -> Result<String, TokenError> {
        if !valid_ad_id(ad_id) || !valid_location_id(location_id) {
            return Err(TokenError::BadIdentifier);
        }

        let tag = hex::encode(self.tag(ad_id, location_id));

        Ok(format!("{ad_id}-{location_id}-{tag}"))
    }

    /// Recovers the pair, returning `Invalid` on any malformation or
    /// signature mismatch. The tag comparison is constant time.
    pub fn decode(&self, token: &str) -> Result<TokenPayload, TokenError> {
        // Minimum well-formed token: "a-b-" + tag.
        if !token.is_ascii() || token.len() < TAG_HEX_LEN + 4 {
            return Err(TokenError::Invalid);
        }

        let (rest, tag_hex) = token.split_at(token.len() - TAG_HEX_LEN);

        // Canonical lowercase hex only, otherwise two spellings of the same
        // tag would both verify.
        if !tag_hex
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(TokenError::Invalid);
        }
        let provided = hex::decode(tag_hex).map_err(|_| TokenError::Invalid)?;

        let rest = rest
            .strip_suffix(SEPARATOR)
            .ok_or(TokenError::Invalid)?;
        let split = rest.rfind(SEPARATOR).ok_or(TokenError::Invalid)?;

        let (ad_id, location_id) = (&rest[..split], &rest[split + 1..]);

        if !valid_ad_id(ad_id) || !valid_location_id(location_id) {
            return Err(TokenError::Invalid);
        }

        let expected = self.tag(ad_id, location_id);

        if expected.ct_eq(&provided).into() {
            Ok(TokenPayload {
                ad_id: ad_id.to_string(),
                location_id: location_id.to_string(),
            })
        } else {
            Err(TokenError::Invalid)
        }
    }

    fn tag(&self, ad_id: &str, location_id: &str) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");

        mac.update(ad_id.as_bytes());
        mac.update(b":");
        mac.update(location_id.as_bytes());

        mac.finalize().into_bytes().to_vec()
    }
}

/// Ad ids may carry hyphens.
pub fn valid_ad_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Location ids are hyphen-free so the last-hyphen split stays unambiguous.
pub fn valid_location_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric())
}
