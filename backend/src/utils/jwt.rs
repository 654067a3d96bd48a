use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{SessionId, WorkspaceId};

/// Purpose tag carried in every access credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenUse {
    EmbeddedAccess,
}

/// Access-credential claims, tagged by schema version under `ver`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ver")]
pub enum AccessClaims {
    #[serde(rename = "1")]
    V1(AccessClaimsV1),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaimsV1 {
    pub sub: SessionId,
    pub workspace_id: WorkspaceId,
    pub token_use: TokenUse,
    pub iat: i64,
    pub exp: i64, // expiration time
    pub jti: String,
}

impl AccessClaims {
    pub fn new(
        session_id: SessionId,
        workspace_id: WorkspaceId,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        AccessClaims::V1(AccessClaimsV1 {
            sub: session_id,
            workspace_id,
            token_use: TokenUse::EmbeddedAccess,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        })
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            AccessClaims::V1(claims) => claims.sub,
        }
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        match self {
            AccessClaims::V1(claims) => claims.workspace_id,
        }
    }

    pub fn token_use(&self) -> TokenUse {
        match self {
            AccessClaims::V1(claims) => claims.token_use,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AccessClaims::V1(claims) => DateTime::from_timestamp(claims.exp, 0),
        }
    }
}

pub fn create_access_token(claims: &AccessClaims, secret: &str) -> anyhow::Result<String> {
    let token = encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;

    Ok(token)
}

/// Checks signature, algorithm and claim shape. Expiry is left to the caller,
/// which compares `exp` against its own clock.
pub fn decode_access_token(token: &str, secret: &str) -> anyhow::Result<AccessClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.leeway = 0;
    let token_data = decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;

    Ok(token_data.claims)
}
