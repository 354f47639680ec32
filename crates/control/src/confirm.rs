//! Confirmation tokens: HMAC-SHA256 over a base64url payload binding a plan
//! hash to a wall-clock expiry. Verification checks structure and signature
//! first, then plan binding, then expiry, and compares signatures in
//! constant time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    /// Malformed token or bad signature.
    Invalid,
    /// Signature fine, bound to a different plan hash.
    Mismatch,
    /// Signature and binding fine, expiry passed.
    Expired,
}

#[derive(Serialize, Deserialize)]
struct TokenPayload {
    plan_hash: String,
    exp: i64,
}

pub struct ConfirmationService {
    secret: Vec<u8>,
}

impl ConfirmationService {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self, payload_b64: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(payload_b64.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Emit `b64url(payload) + "." + b64url(hmac(secret, b64url(payload)))`.
    pub fn issue(&self, plan_hash: &str, expires_unix: i64) -> String {
        let payload = TokenPayload {
            plan_hash: plan_hash.to_string(),
            exp: expires_unix,
        };
        // The payload is two plain fields; serialization cannot fail.
        let payload_json = serde_json::to_string(&payload).unwrap_or_default();
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json);
        let signature_b64 = URL_SAFE_NO_PAD.encode(self.mac(&payload_b64));
        format!("{payload_b64}.{signature_b64}")
    }

    pub fn verify(&self, token: &str, expected_plan_hash: &str, now_unix: i64) -> VerifyOutcome {
        let Some((payload_b64, signature_b64)) = token.split_once('.') else {
            return VerifyOutcome::Invalid;
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature_b64) else {
            return VerifyOutcome::Invalid;
        };
        let expected_mac = self.mac(payload_b64);
        if expected_mac.ct_eq(&signature).unwrap_u8() != 1 {
            return VerifyOutcome::Invalid;
        }
        let Ok(payload_json) = URL_SAFE_NO_PAD.decode(payload_b64) else {
            return VerifyOutcome::Invalid;
        };
        let Ok(payload) = serde_json::from_slice::<TokenPayload>(&payload_json) else {
            return VerifyOutcome::Invalid;
        };
        if payload.plan_hash != expected_plan_hash {
            return VerifyOutcome::Mismatch;
        }
        if now_unix >= payload.exp {
            return VerifyOutcome::Expired;
        }
        VerifyOutcome::Ok
    }
}
