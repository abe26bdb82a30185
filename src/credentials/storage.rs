//! SQLite-backed token records and linked accounts.
//!
//! Holds ciphertext only; encryption happens in the credential manager and the
//! account linker before a record gets here.

use super::{StoreError, TokenRecord, TokenRecordStore};
use crate::accounts::{Account, AccountStore, NewAccount};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Token record and account storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE accounts (
///     id INTEGER PRIMARY KEY,
///     external_id TEXT NOT NULL UNIQUE,
///     email TEXT NOT NULL,
///     name TEXT NOT NULL,
///     workspace_ref TEXT,               -- NULL until provisioned
///     created_at TEXT NOT NULL,         -- ISO 8601 timestamp
///     updated_at TEXT NOT NULL          -- ISO 8601 timestamp
/// );
///
/// CREATE TABLE token_records (
///     external_id TEXT PRIMARY KEY,
///     access_token TEXT NOT NULL,       -- Encrypted, nonce embedded
///     refresh_token TEXT,               -- Encrypted, nonce embedded (optional)
///     expires_at TEXT NOT NULL,         -- ISO 8601 timestamp
///     updated_at TEXT NOT NULL          -- ISO 8601 timestamp
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in a Mutex
/// - Each upsert is a single statement, so SQLite never exposes a half-written row
pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    /// Creates or opens a store at `db_path` (`":memory:"` for an in-memory database).
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                external_id TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL,
                name TEXT NOT NULL,
                workspace_ref TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS token_records (
                external_id TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl TokenRecordStore for CredentialStore {
    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<TokenRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r#"
                SELECT external_id, access_token, refresh_token, expires_at
                FROM token_records
                WHERE external_id = ?1
                "#,
                params![external_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(external_id, access_token, refresh_token, expires_at)| {
            Ok(TokenRecord {
                external_id,
                access_token,
                refresh_token,
                expires_at: parse_timestamp(&expires_at)?,
            })
        })
        .transpose()
    }

    async fn upsert(&self, record: &TokenRecord) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();

        self.lock()?.execute(
            r#"
            INSERT INTO token_records (
                external_id, access_token, refresh_token, expires_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(external_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
            params![
                record.external_id,
                record.access_token,
                record.refresh_token,
                record.expires_at.to_rfc3339(),
                now,
            ],
        )?;

        Ok(())
    }
}

#[async_trait]
impl AccountStore for CredentialStore {
    async fn find_account(&self, external_id: &str) -> Result<Option<Account>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r#"
                SELECT id, external_id, email, name, workspace_ref, created_at
                FROM accounts
                WHERE external_id = ?1
                "#,
                params![external_id],
                AccountRow::read,
            )
            .optional()?;

        row.map(AccountRow::into_account).transpose()
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        let now = Utc::now();
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO accounts (external_id, email, name, workspace_ref, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
            params![
                account.external_id,
                account.email,
                account.name,
                account.workspace_ref,
                now.to_rfc3339(),
            ],
        )?;

        Ok(Account {
            id: conn.last_insert_rowid(),
            external_id: account.external_id.clone(),
            email: account.email.clone(),
            name: account.name.clone(),
            workspace_ref: Some(account.workspace_ref.clone()),
            created_at: now,
        })
    }

    async fn update_account(&self, account: &Account) -> Result<(), StoreError> {
        let rows_affected = self.lock()?.execute(
            r#"
            UPDATE accounts
            SET email = ?2, name = ?3, workspace_ref = ?4, updated_at = ?5
            WHERE id = ?1
            "#,
            params![
                account.id,
                account.email,
                account.name,
                account.workspace_ref,
                Utc::now().to_rfc3339(),
            ],
        )?;

        if rows_affected == 0 {
            return Err(StoreError::Database(format!(
                "No account with id {}",
                account.id
            )));
        }

        Ok(())
    }
}

/// Raw `accounts` row, before timestamp parsing.
struct AccountRow {
    id: i64,
    external_id: String,
    email: String,
    name: String,
    workspace_ref: Option<String>,
    created_at: String,
}

impl AccountRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            external_id: row.get(1)?,
            email: row.get(2)?,
            name: row.get(3)?,
            workspace_ref: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_account(self) -> Result<Account, StoreError> {
        Ok(Account {
            id: self.id,
            external_id: self.external_id,
            email: self.email,
            name: self.name,
            workspace_ref: self.workspace_ref,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRow(format!("bad timestamp '{}': {}", value, e)))
}
