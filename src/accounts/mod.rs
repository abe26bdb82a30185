//! Linked accounts: the local user behind an external identity.
//!
//! Linking happens once per login callback. It makes sure the account exists,
//! that it has a workspace, and that the freshly granted provider tokens are
//! stored encrypted for later delegated use.

use crate::credentials::{encrypt, CryptoError, EncryptionKey, StoreError, TokenRecord, TokenRecordStore};
use crate::oauth::{TokenGrant, UserProfile};
use crate::workspace::{WorkspaceError, WorkspaceProvisioner};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// A local user linked to exactly one external identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub external_id: String,
    pub email: String,
    pub name: String,
    /// `None` only for rows created before provisioning succeeded
    pub workspace_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields required to insert an account. A workspace must exist first.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub external_id: String,
    pub email: String,
    pub name: String,
    pub workspace_ref: String,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account(&self, external_id: &str) -> Result<Option<Account>, StoreError>;

    /// Fails if an account for the same external identity already exists.
    async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError>;

    async fn update_account(&self, account: &Account) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    Workspace(WorkspaceError),
    Store(StoreError),
    Crypto(CryptoError),
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::Workspace(e) => write!(f, "Workspace provisioning failed: {}", e),
            LinkError::Store(e) => write!(f, "Account storage failed: {}", e),
            LinkError::Crypto(e) => write!(f, "Token encryption failed: {}", e),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<WorkspaceError> for LinkError {
    fn from(err: WorkspaceError) -> Self {
        LinkError::Workspace(err)
    }
}

impl From<StoreError> for LinkError {
    fn from(err: StoreError) -> Self {
        LinkError::Store(err)
    }
}

impl From<CryptoError> for LinkError {
    fn from(err: CryptoError) -> Self {
        LinkError::Crypto(err)
    }
}

/// Creates or updates the account for a provider profile and stores its tokens.
pub struct AccountLinker {
    accounts: Arc<dyn AccountStore>,
    tokens: Arc<dyn TokenRecordStore>,
    provisioner: Arc<dyn WorkspaceProvisioner>,
    encryption_key: EncryptionKey,
}

impl AccountLinker {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        tokens: Arc<dyn TokenRecordStore>,
        provisioner: Arc<dyn WorkspaceProvisioner>,
        encryption_key: EncryptionKey,
    ) -> Self {
        Self {
            accounts,
            tokens,
            provisioner,
            encryption_key,
        }
    }

    /// Links `profile` and returns the account with its workspace reference set.
    pub async fn link(&self, profile: &UserProfile, grant: &TokenGrant) -> Result<Account, LinkError> {
        let account = match self.accounts.find_account(&profile.id).await? {
            Some(mut existing) => {
                existing.email = profile.email.clone();
                existing.name = profile.name.clone();

                if existing.workspace_ref.is_none() {
                    let workspace_ref = self.provisioner.provision(&profile.id).await?;
                    info!(account_id = existing.id, workspace_ref = %workspace_ref, "Provisioned missing workspace");
                    existing.workspace_ref = Some(workspace_ref);
                }

                self.accounts.update_account(&existing).await?;
                existing
            }
            None => {
                let workspace_ref = self.provisioner.provision(&profile.id).await?;
                let created = self
                    .accounts
                    .create_account(&NewAccount {
                        external_id: profile.id.clone(),
                        email: profile.email.clone(),
                        name: profile.name.clone(),
                        workspace_ref,
                    })
                    .await?;
                info!(account_id = created.id, external_id = %created.external_id, "Created account");
                created
            }
        };

        self.store_grant(&profile.id, grant).await?;

        Ok(account)
    }

    async fn store_grant(&self, external_id: &str, grant: &TokenGrant) -> Result<(), LinkError> {
        let key = self.encryption_key.as_bytes();

        // No refresh token on re-consent: keep whatever was stored before
        let refresh_token = match &grant.refresh_token {
            Some(token) => Some(encrypt(token, key)?),
            None => self
                .tokens
                .get_by_external_id(external_id)
                .await?
                .and_then(|record| record.refresh_token),
        };

        let record = TokenRecord {
            external_id: external_id.to_string(),
            access_token: encrypt(&grant.access_token, key)?,
            refresh_token,
            expires_at: grant.expires_at,
        };

        self.tokens.upsert(&record).await?;
        Ok(())
    }
}
