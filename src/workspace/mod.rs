//! Workspace provisioning for newly linked accounts.
//!
//! A workspace reference is obtained once, the first time an external identity is
//! linked, and then embedded in every session credential for that user.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Provisioning failures. Any of these aborts account linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceError {
    /// Request never completed
    Transport(String),
    /// Service answered with a non-200 status
    Rejected(u16),
    /// Response body did not carry a workspace id
    InvalidResponse(String),
}

impl std::fmt::Display for WorkspaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkspaceError::Transport(msg) => write!(f, "Workspace request failed: {}", msg),
            WorkspaceError::Rejected(status) => {
                write!(f, "Failed to create workspace: status {}", status)
            }
            WorkspaceError::InvalidResponse(msg) => {
                write!(f, "Invalid workspace response: {}", msg)
            }
        }
    }
}

impl std::error::Error for WorkspaceError {}

/// Creates a workspace for an external identity and returns its reference.
#[async_trait]
pub trait WorkspaceProvisioner: Send + Sync {
    async fn provision(&self, external_id: &str) -> Result<String, WorkspaceError>;
}

#[derive(Deserialize)]
struct ProvisionResponse {
    data: Option<ProvisionedWorkspace>,
}

#[derive(Deserialize)]
struct ProvisionedWorkspace {
    id: Option<String>,
}

/// Provisions workspaces through the storage service's folder API.
///
/// `POST {url}` with `{"title": external_id}`; expects `200 {"data": {"id": "..."}}`.
#[derive(Clone, Debug)]
pub struct HttpWorkspaceProvisioner {
    url: String,
    http: reqwest::Client,
}

impl HttpWorkspaceProvisioner {
    pub fn new(url: impl Into<String>, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }
}

#[async_trait]
impl WorkspaceProvisioner for HttpWorkspaceProvisioner {
    async fn provision(&self, external_id: &str) -> Result<String, WorkspaceError> {
        debug!(url = %self.url, "Provisioning workspace");

        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "title": external_id }))
            .send()
            .await
            .map_err(|e| WorkspaceError::Transport(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(WorkspaceError::Rejected(response.status().as_u16()));
        }

        let body: ProvisionResponse = response
            .json()
            .await
            .map_err(|e| WorkspaceError::InvalidResponse(e.to_string()))?;

        body.data
            .and_then(|data| data.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WorkspaceError::InvalidResponse("workspace id is empty".to_string()))
    }
}
