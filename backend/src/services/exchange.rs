//! One-time exchange codes.
//!
//! A host application that cannot hand tokens to an iframe directly asks for
//! a code instead; the iframe redeems it once for the token pair. Only the
//! code's hash is used as the storage key.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;
use crate::services::session::TokenPair;
use crate::services::transient::TransientStore;
use crate::utils::security::{generate_opaque_token, hash_token};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "version")]
enum ExchangePayload {
    #[serde(rename = "1")]
    V1(TokenPair),
}

pub struct ExchangeCodeService {
    store: Arc<dyn TransientStore>,
    ttl: Duration,
}

impl ExchangeCodeService {
    pub fn new(store: Arc<dyn TransientStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(code: &str) -> String {
        format!("exchange:{}", hash_token(code))
    }

    pub async fn issue(&self, tokens: TokenPair) -> Result<String, AppError> {
        let code = generate_opaque_token();
        let payload = serde_json::to_string(&ExchangePayload::V1(tokens))
            .map_err(|e| AppError::InternalServerError(e.into()))?;
        self.store
            .put(&Self::key(&code), &payload, self.ttl)
            .await
            .map_err(AppError::Storage)?;
        Ok(code)
    }

    pub async fn redeem(&self, code: &str) -> Result<TokenPair, AppError> {
        let raw = self
            .store
            .take_once(&Self::key(code))
            .await
            .map_err(AppError::Storage)?
            .ok_or_else(|| AppError::Unauthorized("Exchange code is invalid or expired".into()))?;
        let ExchangePayload::V1(tokens) = serde_json::from_str::<ExchangePayload>(&raw)
            .map_err(|e| AppError::InternalServerError(anyhow::Error::from(e)))?;
        Ok(tokens)
    }
}
