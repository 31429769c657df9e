//! PASETO v4.public session tokens.
//!
//! Flow Overview:
//! 1) Build role-scoped claims with RFC3339 timestamps (second precision, so a
//!    token never outlives the requested ttl).
//! 2) Sign the PASETO pre-auth encoding with an Ed25519 key.
//! 3) Verify by checking header, footer key id, signature, issuer, audience and
//!    expiry, in that order. Any failure is `InvalidToken`.

use crate::{clock::Clock, error::AuthError, model::Role};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SIGNATURE_LENGTH};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const HEADER: &str = "v4.public.";
const TOKEN_ISSUER: &str = "turnstile";
const TOKEN_AUDIENCE: &str = "turnstile:session";

#[derive(Debug, Serialize, Deserialize)]
struct SessionTokenClaims {
    sub: String,
    role: Role,
    iss: String,
    aud: String,
    iat: String,
    exp: String,
    jti: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionTokenFooter {
    kid: String,
}

#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Verified token contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub principal_id: Uuid,
    pub role: Role,
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionTokenIssuer {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    key_id: String,
    clock: Arc<dyn Clock>,
}

impl SessionTokenIssuer {
    /// Build an issuer from a 32-byte Ed25519 seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32], clock: Arc<dyn Clock>) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();
        let key_id = key_id(&verifying_key);
        Self {
            signing_key,
            verifying_key,
            key_id,
            clock,
        }
    }

    /// Build an issuer from a base64 (standard or url-safe) encoded seed.
    ///
    /// # Errors
    /// Returns an error if the seed does not decode to exactly 32 bytes.
    pub fn from_encoded_seed(seed: &SecretString, clock: Arc<dyn Clock>) -> Result<Self> {
        let raw = seed.expose_secret().trim();
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim_end_matches('='))
            .or_else(|_| base64::engine::general_purpose::STANDARD.decode(raw))
            .context("token seed is not valid base64")?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("token seed must decode to 32 bytes"))?;
        Ok(Self::from_seed(&seed, clock))
    }

    /// Build an issuer with a random key. Tokens do not survive a restart.
    #[must_use]
    pub fn ephemeral(clock: Arc<dyn Clock>) -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(&seed, clock)
    }

    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Mint a token for `principal_id` acting as `role`, valid for `ttl`.
    ///
    /// # Errors
    /// `InvalidInput` for a non-positive ttl, `Internal` if encoding fails.
    pub fn issue(
        &self,
        principal_id: Uuid,
        role: Role,
        ttl: Duration,
    ) -> Result<SessionToken, AuthError> {
        if ttl <= Duration::zero() {
            return Err(AuthError::InvalidInput(
                "session ttl must be positive".to_string(),
            ));
        }
        let now = self.clock.now();
        let iat = truncate_to_second(now);
        // Truncating expiry can only shorten the lifetime.
        let exp = truncate_to_second(now + ttl);

        let claims = SessionTokenClaims {
            sub: principal_id.to_string(),
            role,
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
            iat: iat.to_rfc3339_opts(SecondsFormat::Secs, true),
            exp: exp.to_rfc3339_opts(SecondsFormat::Secs, true),
            jti: Uuid::new_v4().to_string(),
        };
        let footer = SessionTokenFooter {
            kid: self.key_id.clone(),
        };

        let payload = serde_json::to_vec(&claims).context("encode session token claims")?;
        let footer_bytes = serde_json::to_vec(&footer).context("encode session token footer")?;
        let pre_auth = pae(&[
            HEADER.as_bytes(),
            payload.as_slice(),
            footer_bytes.as_slice(),
            b"",
        ])?;
        let signature = self.signing_key.sign(&pre_auth);

        let mut body = payload;
        body.extend_from_slice(&signature.to_bytes());
        let token = format!(
            "{HEADER}{}.{}",
            URL_SAFE_NO_PAD.encode(body),
            URL_SAFE_NO_PAD.encode(footer_bytes)
        );

        Ok(SessionToken {
            token,
            expires_at: exp,
        })
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    /// `InvalidToken` on any structural, signature, audience or expiry failure.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        self.verify_inner(token).map_err(|err| {
            debug!("session token rejected: {err}");
            AuthError::InvalidToken
        })
    }

    fn verify_inner(&self, token: &str) -> Result<SessionClaims> {
        let rest = token
            .strip_prefix(HEADER)
            .ok_or_else(|| anyhow!("unexpected token header"))?;
        let (body_b64, footer_b64) = rest
            .split_once('.')
            .ok_or_else(|| anyhow!("missing token footer"))?;

        let footer_bytes = URL_SAFE_NO_PAD.decode(footer_b64).context("decode footer")?;
        let footer: SessionTokenFooter =
            serde_json::from_slice(&footer_bytes).context("parse footer")?;
        if footer.kid != self.key_id {
            return Err(anyhow!("unknown key id"));
        }

        let body = URL_SAFE_NO_PAD.decode(body_b64).context("decode body")?;
        if body.len() <= SIGNATURE_LENGTH {
            return Err(anyhow!("token body too short"));
        }
        let (payload, signature_bytes) = body.split_at(body.len() - SIGNATURE_LENGTH);
        let signature = Signature::from_slice(signature_bytes).context("parse signature")?;
        let pre_auth = pae(&[HEADER.as_bytes(), payload, footer_bytes.as_slice(), b""])?;
        self.verifying_key
            .verify(&pre_auth, &signature)
            .map_err(|_| anyhow!("bad signature"))?;

        let claims: SessionTokenClaims = serde_json::from_slice(payload).context("parse claims")?;
        if claims.iss != TOKEN_ISSUER || claims.aud != TOKEN_AUDIENCE {
            return Err(anyhow!("issuer or audience mismatch"));
        }
        let expires_at = DateTime::parse_from_rfc3339(&claims.exp)
            .context("parse exp")?
            .with_timezone(&Utc);
        if self.clock.now() >= expires_at {
            return Err(anyhow!("token expired"));
        }

        Ok(SessionClaims {
            principal_id: Uuid::parse_str(&claims.sub).context("parse sub")?,
            role: claims.role,
            token_id: Uuid::parse_str(&claims.jti).context("parse jti")?,
            expires_at,
        })
    }
}

fn truncate_to_second(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

fn key_id(verifying_key: &VerifyingKey) -> String {
    let digest = Sha256::digest(verifying_key.as_bytes());
    format!("k4.pid.{}", URL_SAFE_NO_PAD.encode(&digest[..24]))
}

fn pae(pieces: &[&[u8]]) -> Result<Vec<u8>> {
    let count = u64::try_from(pieces.len()).context("invalid PAE count")?;
    let mut out = Vec::new();
    out.extend_from_slice(&le64(count));
    for piece in pieces {
        let len = u64::try_from(piece.len()).context("invalid PAE length")?;
        out.extend_from_slice(&le64(len));
        out.extend_from_slice(piece);
    }
    Ok(out)
}

fn le64(value: u64) -> [u8; 8] {
    // PAE clears the top bit of the length.
    (value & 0x7fff_ffff_ffff_ffff).to_le_bytes()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn issuer() -> (SessionTokenIssuer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 15).unwrap(),
        ));
        (SessionTokenIssuer::from_seed(&[7u8; 32], clock.clone()), clock)
    }

    #[test]
    fn issue_and_verify_round_trip() -> Result<()> {
        let (issuer, clock) = issuer();
        let principal_id = Uuid::new_v4();
        let token = issuer.issue(principal_id, Role::Admin, Duration::minutes(15))?;
        assert!(token.token.starts_with("v4.public."));
        assert_eq!(token.expires_at, clock.now() + Duration::minutes(15));

        let claims = issuer.verify(&token.token)?;
        assert_eq!(claims.principal_id, principal_id);
        assert_eq!(claims.role, Role::Admin);
        Ok(())
    }

    #[test]
    fn expiry_never_exceeds_requested_ttl() -> Result<()> {
        let clock = Arc::new(ManualClock::new(
            Utc.timestamp_opt(1_700_000_000, 900_000_000).unwrap(),
        ));
        let issuer = SessionTokenIssuer::from_seed(&[1u8; 32], clock.clone());
        let token = issuer.issue(Uuid::new_v4(), Role::User, Duration::seconds(60))?;
        assert!(token.expires_at <= clock.now() + Duration::seconds(60));
        Ok(())
    }

    #[test]
    fn rejects_non_positive_ttl() {
        let (issuer, _) = issuer();
        let result = issuer.issue(Uuid::new_v4(), Role::User, Duration::zero());
        assert!(matches!(result, Err(AuthError::InvalidInput(_))));
    }

    #[test]
    fn expired_token_is_invalid() -> Result<()> {
        let (issuer, clock) = issuer();
        let token = issuer.issue(Uuid::new_v4(), Role::Vendor, Duration::minutes(1))?;
        clock.advance(Duration::minutes(1));
        assert!(matches!(issuer.verify(&token.token), Err(AuthError::InvalidToken)));
        Ok(())
    }

    #[test]
    fn tampered_payload_is_invalid() -> Result<()> {
        let (issuer, _) = issuer();
        let token = issuer.issue(Uuid::new_v4(), Role::User, Duration::hours(1))?;
        let rest = token.token.strip_prefix(HEADER).unwrap();
        let (body, footer) = rest.split_once('.').unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(body).unwrap();
        let payload_len = raw.len() - SIGNATURE_LENGTH;
        let payload = String::from_utf8(raw[..payload_len].to_vec()).unwrap();
        // Same length, so the signature still lines up with the payload end.
        let forged_payload = payload.replace("\"role\":\"user\"", "\"role\":\"xxxx\"");
        assert_ne!(payload, forged_payload);
        raw[..payload_len].copy_from_slice(forged_payload.as_bytes());
        let forged_token = format!("{HEADER}{}.{footer}", URL_SAFE_NO_PAD.encode(raw));
        assert!(matches!(issuer.verify(&forged_token), Err(AuthError::InvalidToken)));
        Ok(())
    }

    #[test]
    fn token_from_other_key_is_invalid() -> Result<()> {
        let (issuer, clock) = issuer();
        let other = SessionTokenIssuer::from_seed(&[9u8; 32], clock);
        let token = other.issue(Uuid::new_v4(), Role::Admin, Duration::hours(1))?;
        assert!(matches!(issuer.verify(&token.token), Err(AuthError::InvalidToken)));
        Ok(())
    }

    #[test]
    fn garbage_is_invalid() {
        let (issuer, _) = issuer();
        for token in ["", "v4.public.", "v4.public.abc", "v2.local.abc.def", "v4.public.!!.??"] {
            assert!(matches!(issuer.verify(token), Err(AuthError::InvalidToken)));
        }
    }

    #[test]
    fn encoded_seed_must_be_32_bytes() {
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SystemClock);
        let good = SecretString::from(URL_SAFE_NO_PAD.encode([3u8; 32]));
        assert!(SessionTokenIssuer::from_encoded_seed(&good, clock.clone()).is_ok());
        let short = SecretString::from(URL_SAFE_NO_PAD.encode([3u8; 16]));
        assert!(SessionTokenIssuer::from_encoded_seed(&short, clock).is_err());
    }

    #[test]
    fn le64_matches_reference_vectors() {
        assert_eq!(le64(0), [0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(le64(10), [10, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(le64(u64::MAX)[7], 0x7f);
    }
}
