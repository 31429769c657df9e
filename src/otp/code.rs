//! Numeric code generation and keyed digests.

use crate::model::ChallengePurpose;
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, Rng};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const CODE_DIGITS: usize = 6;
const CODE_SPACE: u32 = 1_000_000;

/// Draw a zero-padded six digit code from the OS RNG.
#[must_use]
pub fn generate_code() -> String {
    let value = OsRng.gen_range(0..CODE_SPACE);
    format!("{value:0width$}", width = CODE_DIGITS)
}

/// Accept only six ASCII digits, ignoring surrounding whitespace.
#[must_use]
pub fn normalize_code(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    (trimmed.len() == CODE_DIGITS && trimmed.bytes().all(|b| b.is_ascii_digit())).then_some(trimmed)
}

/// HMAC-SHA256 keyed with the server pepper, bound to principal and purpose.
pub struct CodeHasher {
    pepper: SecretString,
}

impl CodeHasher {
    #[must_use]
    pub const fn new(pepper: SecretString) -> Self {
        Self { pepper }
    }

    fn mac(&self, principal_id: Uuid, purpose: ChallengePurpose, code: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.pepper.expose_secret().as_bytes())
            .map_err(|_| anyhow!("invalid challenge pepper"))?;
        mac.update(principal_id.as_bytes());
        mac.update(b":");
        mac.update(purpose.as_str().as_bytes());
        mac.update(b":");
        mac.update(code.as_bytes());
        Ok(mac)
    }

    /// Digest stored in place of the code.
    ///
    /// # Errors
    /// Returns an error if the pepper cannot key the MAC.
    pub fn digest(
        &self,
        principal_id: Uuid,
        purpose: ChallengePurpose,
        code: &str,
    ) -> Result<String> {
        let mac = self.mac(principal_id, purpose, code)?;
        Ok(STANDARD_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Constant-time comparison against a stored digest.
    #[must_use]
    pub fn matches(
        &self,
        principal_id: Uuid,
        purpose: ChallengePurpose,
        code: &str,
        stored: &str,
    ) -> bool {
        let Ok(expected) = STANDARD_NO_PAD.decode(stored) else {
            return false;
        };
        self.mac(principal_id, purpose, code)
            .is_ok_and(|mac| mac.verify_slice(&expected).is_ok())
    }
}
