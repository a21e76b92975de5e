//! HS256 bearer-token verification against the platform auth service's secret.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::services::IdentityVerifier;

/// Claims the platform auth service puts in its access tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub exp: i64,
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<String, ServiceError> {
        let data = jsonwebtoken::decode::<AccessClaims>(credential, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(?e, "access token validation failed");
                ServiceError::unauthorized("Invalid or expired token")
            })?;

        let claims = data.claims;
        claims
            .sub
            .or(claims.user_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ServiceError::unauthorized("Token has no subject"))
    }
}
