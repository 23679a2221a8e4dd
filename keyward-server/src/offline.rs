//! Offline signatures
//!
//! The server issues a signed payload (usually rendered as a QR code), the
//! client signs it offline and the user retypes the decimal signature. There is
//! no application key in this flow, so the data is salted with the fixed
//! offline secret and only combined factors are accepted.

use std::collections::BTreeMap;
use std::sync::Arc;

use keyward_core::{
    create_offline_payload, ActivationStatus, AtRestEncryption, OfflineKeyIndicator,
    OfflinePayload, ProximityOtp, SignatureFormat, SignatureType, AUDIT_INFO_BIOMETRY_ALLOWED,
};

use crate::error::ServiceError;
use crate::signature::{
    ApplicationBinding, Attempt, PostMatch, SignatureVerifier, VerificationResponse,
};
use crate::storage::{ActivationStore, ApplicationStore};

/// Time-based code proving the signer was near the issuing device.
#[derive(Debug, Clone)]
pub struct ProximityCheck {
    pub seed: Vec<u8>,
    pub otp: String,
}

#[derive(Debug, Clone)]
pub struct OfflineSignatureRequest {
    pub activation_id: String,
    pub data: Vec<u8>,
    /// Decimal signature as typed by the user
    pub signature: String,
    pub allow_biometry: bool,
    pub proximity_check: Option<ProximityCheck>,
}

pub struct OfflineSignatureService {
    verifier: Arc<SignatureVerifier>,
    activations: Arc<dyn ActivationStore>,
    applications: Arc<dyn ApplicationStore>,
    encryption: Arc<AtRestEncryption>,
    proximity_otp: ProximityOtp,
}

impl OfflineSignatureService {
    pub fn new(
        verifier: Arc<SignatureVerifier>,
        activations: Arc<dyn ActivationStore>,
        applications: Arc<dyn ApplicationStore>,
        encryption: Arc<AtRestEncryption>,
        proximity_otp: ProximityOtp,
    ) -> Self {
        Self {
            verifier,
            activations,
            applications,
            encryption,
            proximity_otp,
        }
    }

    pub async fn verify_offline_signature(
        &self,
        request: &OfflineSignatureRequest,
    ) -> Result<VerificationResponse, ServiceError> {
        let candidates: &[SignatureType] = if request.allow_biometry {
            &[
                SignatureType::PossessionKnowledge,
                SignatureType::PossessionBiometry,
            ]
        } else {
            &[SignatureType::PossessionKnowledge]
        };

        let mut additional_info = BTreeMap::new();
        additional_info.insert(
            AUDIT_INFO_BIOMETRY_ALLOWED.to_string(),
            request.allow_biometry.to_string(),
        );

        let post_match = match &request.proximity_check {
            Some(check) => PostMatch::Proximity {
                otp: &self.proximity_otp,
                seed: &check.seed,
                code: &check.otp,
            },
            None => PostMatch::None,
        };

        let outcome = self
            .verifier
            .verify_attempt(Attempt {
                activation_id: &request.activation_id,
                binding: ApplicationBinding::Offline,
                data: &request.data,
                signature: &request.signature,
                candidates,
                format: SignatureFormat::Decimal,
                additional_info,
                post_match,
            })
            .await?;
        Ok(outcome.response)
    }

    /// Payload signed by the activation's server key (indicator `1`).
    pub async fn create_personalized_offline_payload(
        &self,
        activation_id: &str,
        data: &str,
    ) -> Result<OfflinePayload, ServiceError> {
        let record = self
            .activations
            .find_activation(activation_id)
            .await?
            .ok_or_else(|| ServiceError::ActivationNotFound(activation_id.to_string()))?;
        if record.status != ActivationStatus::Active {
            return Err(ServiceError::InvalidActivationState {
                activation_id: record.activation_id,
                status: record.status,
            });
        }

        let private_key = self
            .encryption
            .decrypt(&record.server_private_key, &record.encryption_context())?;
        Ok(create_offline_payload(
            data,
            &private_key,
            OfflineKeyIndicator::ActivationServer,
        )?)
    }

    /// Payload signed by the application master key (indicator `0`).
    pub async fn create_non_personalized_offline_payload(
        &self,
        application_id: &str,
        data: &str,
    ) -> Result<OfflinePayload, ServiceError> {
        let application = self
            .applications
            .find_application(application_id)
            .await?
            .ok_or_else(|| ServiceError::ApplicationNotFound(application_id.to_string()))?;

        let private_key = self
            .encryption
            .decrypt(&application.master_private_key, &application.encryption_context())?;
        Ok(create_offline_payload(
            data,
            &private_key,
            OfflineKeyIndicator::ApplicationMaster,
        )?)
    }
}
