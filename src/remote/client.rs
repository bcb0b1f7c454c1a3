//! HTTP Remote Authority
//!
//! reqwest-based client for the remote signing service's rotation and
//! snapshot endpoints.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::error::RemoteError;
use crate::remote::{ReconciliationSnapshot, RemoteAuthority, RotationResponse};

pub struct HttpRemoteAuthority {
    base_url: String,
    http_client: Client,
}

#[derive(Serialize)]
struct RotationRequest<'a> {
    current_key_id: Option<&'a str>,
    reason: &'a str,
}

impl HttpRemoteAuthority {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: Client::new(),
        }
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn request_rotation(
        &self,
        current_key_id: Option<&str>,
        reason: &str,
    ) -> Result<RotationResponse, RemoteError> {
        let url = format!("{}/v1/rotations", self.base_url);
        debug!(%url, "requesting key rotation");

        let response = self
            .http_client
            .post(&url)
            .json(&RotationRequest {
                current_key_id,
                reason,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status().as_u16()));
        }

        response
            .json::<RotationResponse>()
            .await
            .map_err(|err| RemoteError::Decode(err.to_string()))
    }

    async fn fetch_snapshot(&self) -> Result<ReconciliationSnapshot, RemoteError> {
        let url = format!("{}/v1/snapshot", self.base_url);
        debug!(%url, "fetching reconciliation snapshot");

        let response = self.http_client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status().as_u16()));
        }

        response
            .json::<ReconciliationSnapshot>()
            .await
            .map_err(|err| RemoteError::Decode(err.to_string()))
    }
}
