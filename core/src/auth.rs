use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::BridgeError;

type HmacSha256 = Hmac<Sha256>;

/// Claims the gateway relies on. Other claims are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Validates three-segment `header.payload.signature` tokens.
///
/// Without a secret the verifier runs in open mode: signatures are not
/// checked, but structure and expiry still are.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("open_mode", &self.is_open())
            .finish()
    }
}

impl TokenVerifier {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.secret.is_none()
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, BridgeError> {
        let segments: Vec<&str> = token.trim().split('.').collect();
        if segments.len() != 3 {
            return Err(BridgeError::Auth("token must have three segments".to_string()));
        }

        if let Some(secret) = &self.secret {
            let signature = URL_SAFE_NO_PAD
                .decode(segments[2])
                .map_err(|_| BridgeError::Auth("signature is not base64url".to_string()))?;
            let mut mac = HmacSha256::new_from_slice(secret)
                .map_err(|e| BridgeError::Auth(format!("invalid secret: {e}")))?;
            mac.update(segments[0].as_bytes());
            mac.update(b".");
            mac.update(segments[1].as_bytes());
            // verify_slice compares in constant time
            mac.verify_slice(&signature)
                .map_err(|_| BridgeError::Auth("signature mismatch".to_string()))?;
        }

        let claims = decode_claims(segments[1])?;
        check_expiry(&claims, now)?;
        Ok(claims)
    }

    /// Legacy cookie fallback, honoured only in open mode: accepts an
    /// unsigned `header.payload` (or empty-signature) token. Expiry still
    /// applies.
    pub fn extract_unverified_subject(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, BridgeError> {
        if !self.is_open() {
            return Err(BridgeError::Auth(
                "unverified subjects are only accepted in open mode".to_string(),
            ));
        }
        let segments: Vec<&str> = token.trim().split('.').collect();
        if !(2..=3).contains(&segments.len()) {
            return Err(BridgeError::Auth("legacy token is malformed".to_string()));
        }
        let claims = decode_claims(segments[1])?;
        check_expiry(&claims, now)?;
        Ok(claims)
    }
}

fn decode_claims(payload: &str) -> Result<TokenClaims, BridgeError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| BridgeError::Auth("payload is not base64url".to_string()))?;
    let claims: TokenClaims = serde_json::from_slice(&bytes)
        .map_err(|_| BridgeError::Auth("payload is not a claims object".to_string()))?;
    if claims.sub.trim().is_empty() {
        return Err(BridgeError::Auth("subject is empty".to_string()));
    }
    Ok(claims)
}

fn check_expiry(claims: &TokenClaims, now: DateTime<Utc>) -> Result<(), BridgeError> {
    if let Some(exp) = claims.exp {
        if now.timestamp() >= exp {
            return Err(BridgeError::Auth("token has expired".to_string()));
        }
    }
    Ok(())
}

/// Sign claims into an HS256 token. Used for development tokens.
pub fn sign_token(secret: &str, claims: &TokenClaims) -> Result<String, BridgeError> {
    let header = URL_SAFE_NO_PAD.encode(json!({ "alg": "HS256", "typ": "JWT" }).to_string());
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(claims)
            .map_err(|e| BridgeError::Configuration(format!("unserializable claims: {e}")))?,
    );
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BridgeError::Configuration(format!("invalid secret: {e}")))?;
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{header}.{payload}.{signature}"))
}

/// Short SHA-256 fingerprint for correlating a credential in logs without
/// logging the credential itself.
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(&hasher.finalize()[..6])
}
