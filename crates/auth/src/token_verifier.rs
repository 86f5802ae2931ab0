//! Access-token verification with secret-rotation and revocation checks (§4.1).

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::{error::VerifyError, revocation::RevocationRegistry};

pub const ISSUER: &str = "agentim";
pub const AUDIENCE: &str = "agentim";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    Challenge,
}

#[derive(Debug, Clone, Deserialize)]
struct RawClaims {
    sub: String,
    username: String,
    #[serde(rename = "type")]
    token_type: TokenType,
    iat: i64,
    #[allow(dead_code)]
    exp: i64,
}

/// The claims a caller gets back after a token passes verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    pub sub: String,
    pub username: String,
    pub token_type: TokenType,
    pub iat: i64,
}

/// Verifies HMAC-SHA256-signed JWTs against a rotating pair of secrets and
/// consults a [`RevocationRegistry`] (§4.1).
pub struct TokenVerifier {
    current_secret: String,
    previous_secret: Option<String>,
    revocation: Arc<RevocationRegistry>,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(
        current_secret: impl Into<String>,
        previous_secret: Option<String>,
        revocation: Arc<RevocationRegistry>,
    ) -> Self {
        Self {
            current_secret: current_secret.into(),
            previous_secret,
            revocation,
        }
    }

    /// Verifies `token`. When `required_type` is `Some`, a token of a
    /// different type is rejected with [`VerifyError::WrongType`].
    pub async fn verify(
        &self,
        token: &str,
        required_type: Option<TokenType>,
    ) -> Result<VerifiedClaims, VerifyError> {
        let claims = self.decode_with_rotation(token)?;

        if let Some(required) = required_type
            && claims.token_type != required
        {
            return Err(VerifyError::WrongType);
        }

        let iat_ms = u64::try_from(claims.iat.saturating_mul(1000)).unwrap_or(0);
        if self.revocation.is_revoked(&claims.sub, iat_ms).await {
            return Err(VerifyError::Revoked);
        }

        Ok(VerifiedClaims {
            sub: claims.sub,
            username: claims.username,
            token_type: claims.token_type,
            iat: claims.iat,
        })
    }

    /// Tries the current secret first, falling back to the previous secret
    /// so a rotation does not invalidate tokens issued moments before it.
    fn decode_with_rotation(&self, token: &str) -> Result<RawClaims, VerifyError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);

        let try_secret = |secret: &str| {
            decode::<RawClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
                .map(|data| data.claims)
                .map_err(map_jwt_error)
        };

        match try_secret(&self.current_secret) {
            Ok(claims) => Ok(claims),
            Err(first_err) => match &self.previous_secret {
                Some(previous) => try_secret(previous),
                None => Err(first_err),
            },
        }
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> VerifyError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => VerifyError::Expired,
        ErrorKind::InvalidSignature => VerifyError::BadSignature,
        ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => VerifyError::WrongIssuerOrAudience,
        _ => VerifyError::Malformed,
    }
}
