// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Asks the orchestrator to (re)send this process's configuration.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, info};

use crate::config::DefPiParams;
use crate::error::{Result, ServiceError};

const AUTH_HEADER: &str = "X-Auth-Token";

/// HTTP client for the orchestrator's process trigger endpoint.
#[derive(Debug, Clone)]
pub struct ConfigTrigger {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl ConfigTrigger {
    pub fn new(params: &DefPiParams) -> Result<Self> {
        if params.orchestrator_host.is_empty() {
            return Err(ServiceError::Trigger("ORCHESTRATOR_HOST is not set".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let url = format!(
            "http://{}:{}/process/trigger/{}",
            params.orchestrator_host, params.orchestrator_port, params.process_id
        );

        Ok(Self {
            client,
            url,
            token: params.orchestrator_token.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// PUT the trigger; anything but `204 No Content` is an error.
    pub async fn request_config(&self) -> Result<()> {
        debug!(url = %self.url, "Requesting configuration from orchestrator");
        let response = self
            .client
            .put(&self.url)
            .header(AUTH_HEADER, &self.token)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Trigger(format!(
                "orchestrator answered {} to config request: {}",
                status, body
            )));
        }

        info!("Orchestrator acknowledged config request");
        Ok(())
    }
}
