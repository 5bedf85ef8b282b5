//! One-shot flash notices carried in an HMAC-SHA256 signed cookie.
//!
//! Cookie value: `base64url(json).hex(hmac)`. The notice is set by `POST /input`, read
//! by the next `GET /` and cleared in the same response.

use axum::http::{header, HeaderMap, HeaderValue};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;

use crate::types::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

pub const FLASH_COOKIE: &str = "jobalizer_flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

impl Flash {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Error,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct FlashSigner {
    mac: HmacSha256,
}

impl FlashSigner {
    pub fn new(secret_key: &str) -> AppResult<Self> {
        let mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|e| AppError::Config(format!("Invalid SECRET_KEY: {}", e)))?;
        Ok(Self { mac })
    }

    fn signature(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify(&self, payload: &str, signature: &str) -> bool {
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        // Constant-time comparison.
        mac.verify_slice(&signature).is_ok()
    }

    pub fn encode(&self, flash: &Flash) -> AppResult<String> {
        let json = serde_json::to_vec(flash)?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = self.signature(&payload);
        Ok(format!("{}.{}", payload, signature))
    }

    pub fn decode(&self, value: &str) -> Option<Flash> {
        let (payload, signature) = value.split_once('.')?;
        if !self.verify(payload, signature) {
            warn!("Discarding flash cookie with bad signature");
            return None;
        }
        let json = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&json).ok()
    }

    /// `Set-Cookie` value carrying `flash`.
    pub fn cookie(&self, flash: &Flash) -> AppResult<HeaderValue> {
        let value = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            FLASH_COOKIE,
            self.encode(flash)?
        );
        HeaderValue::from_str(&value).map_err(|e| AppError::Internal(e.to_string()))
    }

    /// Read the flash cookie from request headers, if present and authentic.
    pub fn read(&self, headers: &HeaderMap) -> Option<Flash> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == FLASH_COOKIE)
            .and_then(|(_, value)| self.decode(value))
    }
}

/// `Set-Cookie` value that removes the flash cookie.
pub fn clear_cookie() -> HeaderValue {
    HeaderValue::from_static("jobalizer_flash=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
}
