//! Instance creation helpers for the Scaleway backend.
//!
//! Scaleway instances must receive cloud-init user-data before first boot.
//! The creation request sets `stopped: true` so the payload is available when
//! the instance is powered on.

use serde::{Deserialize, Serialize};

use crate::bootstrap;

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::InstanceSnapshot;

/// Tags attached to every instance so stray hosts can be found by hand.
pub(in crate::scaleway) const INSTANCE_TAGS: [&str; 2] = ["skiff", "ephemeral"];

#[derive(Serialize)]
struct CreateServerRequest {
    name: String,
    commercial_type: String,
    image: String,
    project: String,
    routed_ip_enabled: bool,
    dynamic_ip_required: bool,
    tags: Vec<String>,
    stopped: bool,
    cloud_init: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<String>,
}

#[derive(Deserialize)]
struct CreateServerResponse {
    server: scaleway_rs::ScalewayInstance,
}

impl ScalewayBackend {
    fn is_instance_type_error(&self, api_err: &scaleway_rs::ScalewayApiError) -> bool {
        matches!(api_err.resource.as_deref(), Some("commercial_type"))
            || api_err
                .resource_id
                .as_deref()
                .is_some_and(|id| id == self.config.default_instance_type)
            || (api_err.etype == "invalid_arguments"
                && api_err
                    .message
                    .to_ascii_lowercase()
                    .contains("commercial_type"))
    }

    pub(in crate::scaleway) async fn power_on_if_needed(
        &self,
        snapshot: &InstanceSnapshot,
    ) -> Result<(), ScalewayBackendError> {
        if snapshot.state.is_running() {
            return Ok(());
        }

        if snapshot.allows("poweron") {
            self.api
                .perform_instance_action_async(self.zone(), snapshot.id.as_str(), "poweron")
                .await?;
            return Ok(());
        }

        Err(ScalewayBackendError::PowerOnNotAllowed {
            instance_id: snapshot.id.as_str().to_owned(),
            state: snapshot.state.as_str().to_owned(),
        })
    }

    /// Creates a stopped instance carrying the daemon bootstrap user-data.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError`] when the Scaleway API request fails or
    /// the provider rejects the configured instance type.
    pub(in crate::scaleway) async fn create_instance_stopped(
        &self,
        name: &str,
        image_id: &str,
    ) -> Result<InstanceSnapshot, ScalewayBackendError> {
        let url = format!("{}/zones/{}/servers", super::SCALEWAY_INSTANCE_API_BASE, self.zone());
        let payload = CreateServerRequest {
            name: name.to_owned(),
            commercial_type: self.config.default_instance_type.clone(),
            image: image_id.to_owned(),
            project: self.config.default_project_id.clone(),
            routed_ip_enabled: true,
            dynamic_ip_required: true,
            tags: INSTANCE_TAGS.iter().map(|tag| (*tag).to_owned()).collect(),
            stopped: true,
            cloud_init: bootstrap::cloud_config(self.runtime_port),
            organization: self.config.default_organization_id.clone(),
        };

        let response = super::HTTP_CLIENT
            .post(&url)
            .header("X-Auth-Token", &self.config.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ScalewayBackendError::Provider {
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ScalewayBackendError::Provider {
                message: err.to_string(),
            })?;

        if status.is_success() {
            let parsed: CreateServerResponse =
                serde_json::from_slice(&body).map_err(|err| ScalewayBackendError::Provider {
                    message: err.to_string(),
                })?;
            return Ok(InstanceSnapshot::from_instance(parsed.server));
        }

        if let Ok(api_err) = serde_json::from_slice::<scaleway_rs::ScalewayApiError>(&body)
            && self.is_instance_type_error(&api_err)
        {
            return Err(ScalewayBackendError::InstanceTypeUnavailable {
                instance_type: self.config.default_instance_type.clone(),
                zone: self.zone().to_owned(),
            });
        }

        Err(ScalewayBackendError::Provider {
            message: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}
