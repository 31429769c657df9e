//! Password hashing with Argon2id and a server-side pepper.
//!
//! Digests are PHC strings, so each one carries its own salt and cost
//! parameters. Raising the cost only affects digests produced afterwards.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash, PasswordHasher,
    PasswordVerifier, Version,
};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

/// Argon2 cost settings (memory in KiB, iterations, lanes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl HashCost {
    /// Minimal cost for tests.
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

pub struct CredentialVerifier {
    pepper: SecretString,
    params: Params,
    decoy_hash: String,
}

impl CredentialVerifier {
    /// Build a verifier.
    ///
    /// # Errors
    /// Returns an error if the cost parameters are rejected by Argon2.
    pub fn new(pepper: SecretString, cost: HashCost) -> Result<Self> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
        let mut verifier = Self {
            pepper,
            params,
            decoy_hash: String::new(),
        };
        verifier.decoy_hash = verifier
            .hash("turnstile-decoy-password")
            .context("failed to build decoy hash")?;
        Ok(verifier)
    }

    fn argon2(&self) -> Result<Argon2<'_>> {
        Argon2::new_with_secret(
            self.pepper.expose_secret().as_bytes(),
            Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
        .map_err(|_| anyhow!("failed to initialize Argon2id"))
    }

    /// Hash a plaintext password into a PHC string.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()?
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|_| anyhow!("failed to hash password"))?
            .to_string();
        Ok(hash)
    }

    /// Compare a plaintext against a stored digest.
    ///
    /// A missing digest (externally authenticated principal) or a malformed one
    /// is a plain `false`.
    #[must_use]
    pub fn verify(&self, plaintext: &str, digest: Option<&str>) -> bool {
        let Some(digest) = digest else {
            // Spend the same work as a real comparison.
            self.verify_decoy(plaintext);
            return false;
        };
        let Ok(parsed) = PasswordHash::new(digest) else {
            warn!("stored password digest is not a valid PHC string");
            return false;
        };
        match self.argon2() {
            Ok(argon2) => argon2.verify_password(plaintext.as_bytes(), &parsed).is_ok(),
            Err(err) => {
                warn!("password verification unavailable: {err}");
                false
            }
        }
    }

    /// Burn one verification for unknown accounts so timing matches known ones.
    pub fn verify_decoy(&self, plaintext: &str) {
        if let (Ok(parsed), Ok(argon2)) = (PasswordHash::new(&self.decoy_hash), self.argon2()) {
            let _ = argon2.verify_password(plaintext.as_bytes(), &parsed);
        }
    }
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
