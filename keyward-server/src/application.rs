//! Applications and application versions
//!
//! An application owns a master P-256 keypair (the private half sealed at rest
//! under context `[application_id]`). Clients identify themselves with the key
//! of an application version; unsupporting a version makes every signature
//! made with its key fail the application check.

use std::sync::Arc;

use chrono::Utc;
use keyward_core::{generate_credential, Application, ApplicationVersion, AtRestEncryption, KeyPair};

use crate::error::ServiceError;
use crate::storage::ApplicationStore;

/// Name of the version created together with an application.
pub const DEFAULT_VERSION_NAME: &str = "default";

pub struct ApplicationService {
    applications: Arc<dyn ApplicationStore>,
    encryption: Arc<AtRestEncryption>,
}

impl ApplicationService {
    pub fn new(applications: Arc<dyn ApplicationStore>, encryption: Arc<AtRestEncryption>) -> Self {
        Self {
            applications,
            encryption,
        }
    }

    /// Create an application with a fresh master keypair and its `default` version.
    pub async fn create_application(
        &self,
        name: &str,
    ) -> Result<(Application, ApplicationVersion), ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::invalid_request("application name must not be empty"));
        }

        let application_id = uuid::Uuid::new_v4().to_string();
        let master = KeyPair::generate();
        let master_private_key = self
            .encryption
            .encrypt(master.private_key(), &[application_id.as_str()])?;

        let application = Application {
            application_id,
            name: name.to_string(),
            master_private_key,
            master_public_key: master.public_key().to_vec(),
            created_at: Utc::now(),
        };
        self.applications.insert_application(&application).await?;
        tracing::info!(
            application_id = %application.application_id,
            name = %name,
            "Application created"
        );

        let version = self
            .create_application_version(&application.application_id, DEFAULT_VERSION_NAME)
            .await?;
        Ok((application, version))
    }

    pub async fn create_application_version(
        &self,
        application_id: &str,
        name: &str,
    ) -> Result<ApplicationVersion, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::invalid_request("version name must not be empty"));
        }
        self.get_application(application_id).await?;

        let version = ApplicationVersion {
            version_id: uuid::Uuid::new_v4().to_string(),
            application_id: application_id.to_string(),
            name: name.to_string(),
            application_key: generate_credential(),
            application_secret: generate_credential(),
            supported: true,
            created_at: Utc::now(),
        };
        self.applications.insert_application_version(&version).await?;
        tracing::info!(
            application_id = %application_id,
            version_id = %version.version_id,
            name = %name,
            "Application version created"
        );
        Ok(version)
    }

    pub async fn get_application(&self, application_id: &str) -> Result<Application, ServiceError> {
        self.applications
            .find_application(application_id)
            .await?
            .ok_or_else(|| ServiceError::ApplicationNotFound(application_id.to_string()))
    }

    pub async fn list_application_versions(
        &self,
        application_id: &str,
    ) -> Result<Vec<ApplicationVersion>, ServiceError> {
        self.get_application(application_id).await?;
        Ok(self.applications.list_application_versions(application_id).await?)
    }

    pub async fn support_application_version(&self, version_id: &str) -> Result<(), ServiceError> {
        self.set_supported(version_id, true).await
    }

    pub async fn unsupport_application_version(
        &self,
        version_id: &str,
    ) -> Result<(), ServiceError> {
        self.set_supported(version_id, false).await
    }

    /// Base64 SDK configuration blob for the version holding `application_key`.
    pub async fn sdk_configuration(&self, application_key: &str) -> Result<String, ServiceError> {
        let version = self
            .applications
            .find_version_by_key(application_key)
            .await?
            .ok_or_else(|| ServiceError::ApplicationVersionNotFound(application_key.to_string()))?;
        let application = self.get_application(&version.application_id).await?;

        Ok(version
            .sdk_configuration(&application.master_public_key)?
            .serialize()?)
    }

    async fn set_supported(&self, version_id: &str, supported: bool) -> Result<(), ServiceError> {
        if !self
            .applications
            .set_version_supported(version_id, supported)
            .await?
        {
            return Err(ServiceError::ApplicationVersionNotFound(version_id.to_string()));
        }
        tracing::info!(version_id = %version_id, supported, "Application version support changed");
        Ok(())
    }
}
