//! Vault unlock
//!
//! A combined-factor signature check that, when valid, releases the vault
//! encryption key sealed under a counter-bound transport key. A successful
//! unlock consumes two counter positions: the matched signature and the
//! release key.

use std::collections::BTreeMap;
use std::sync::Arc;

use keyward_core::{
    SignatureFormat, SignatureType, AUDIT_INFO_VAULT_UNLOCK_REASON, REASON_NOT_SPECIFIED,
};
use serde::Serialize;

use crate::error::ServiceError;
use crate::signature::{
    ApplicationBinding, Attempt, PostMatch, SignatureVerifier, VerificationResponse,
};

/// Longest accepted unlock reason.
pub const MAX_VAULT_UNLOCK_REASON_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct VaultUnlockRequest {
    pub activation_id: String,
    pub application_key: String,
    pub data: Vec<u8>,
    pub signature: String,
    pub signature_type: SignatureType,
    pub signature_format: SignatureFormat,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultUnlockResponse {
    #[serde(flatten)]
    pub verification: VerificationResponse,
    /// Base64 `nonce || ciphertext`; only present when the signature was valid
    pub encrypted_vault_encryption_key: Option<String>,
}

pub struct VaultService {
    verifier: Arc<SignatureVerifier>,
}

impl VaultService {
    pub fn new(verifier: Arc<SignatureVerifier>) -> Self {
        Self { verifier }
    }

    pub async fn unlock_vault(
        &self,
        request: &VaultUnlockRequest,
    ) -> Result<VaultUnlockResponse, ServiceError> {
        if !request.signature_type.is_combined() {
            return Err(ServiceError::invalid_request(format!(
                "vault unlock requires a combined factor, got {}",
                request.signature_type
            )));
        }
        let reason = request.reason.as_deref().unwrap_or(REASON_NOT_SPECIFIED);
        if reason.chars().count() > MAX_VAULT_UNLOCK_REASON_LEN {
            return Err(ServiceError::invalid_request(format!(
                "vault unlock reason exceeds {} characters",
                MAX_VAULT_UNLOCK_REASON_LEN
            )));
        }

        let mut additional_info = BTreeMap::new();
        additional_info.insert(AUDIT_INFO_VAULT_UNLOCK_REASON.to_string(), reason.to_string());

        let outcome = self
            .verifier
            .verify_attempt(Attempt {
                activation_id: &request.activation_id,
                binding: ApplicationBinding::Online {
                    application_key: &request.application_key,
                },
                data: &request.data,
                signature: &request.signature,
                candidates: std::slice::from_ref(&request.signature_type),
                format: request.signature_format,
                additional_info,
                post_match: PostMatch::VaultUnlock,
            })
            .await?;

        if outcome.response.signature_valid {
            tracing::info!(
                activation_id = %request.activation_id,
                reason = %reason,
                "Vault unlocked"
            );
        }

        Ok(VaultUnlockResponse {
            verification: outcome.response,
            encrypted_vault_encryption_key: outcome.sealed_vault_key,
        })
    }
}
