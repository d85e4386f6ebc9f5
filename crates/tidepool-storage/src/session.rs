//! Sessions gating access to partitioned stores
//!
//! Stores are opened on behalf of a [`Session`]. A [`SessionProvider`]
//! performs whatever authentication the deployment needs before any
//! partition is opened and ends the session on shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StorageError;

/// Email/password credentials for an application
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub app_id: String,
    pub email: String,
    pub password: String,
}

impl Credentials {
    /// Create email/password credentials
    pub fn email_password(
        app_id: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated (or anonymous) session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Session {
    /// Stable user identifier, also used to namespace on-disk data
    pub user_id: String,
    /// Application the session belongs to
    pub app_id: Option<String>,
}

impl Session {
    /// The anonymous session used when no credentials are configured
    pub fn anonymous() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            app_id: None,
        }
    }
}

/// Authentication step performed before partitions are opened
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Establish a session; `None` requests an anonymous session
    async fn login(&self, credentials: Option<&Credentials>) -> Result<Session, StorageError>;

    /// Terminate a session
    async fn logout(&self, session: &Session) -> Result<(), StorageError>;
}

/// Session provider for local, single-host deployments
///
/// Without registered accounts any non-empty email/password pair is
/// accepted. Once accounts are registered only those are.
#[derive(Debug, Default)]
pub struct LocalSessionProvider {
    accounts: HashMap<String, String>,
    active: AtomicUsize,
}

impl LocalSessionProvider {
    /// Create a provider accepting any credentials
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict logins to a known account
    pub fn with_account(mut self, email: impl Into<String>, password: impl Into<String>) -> Self {
        self.accounts.insert(email.into(), password.into());
        self
    }

    /// Number of sessions logged in and not yet logged out
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn user_id_for(credentials: &Credentials) -> String {
        let key = format!("{}:{}", credentials.app_id, credentials.email);
        let digest = blake3::hash(key.as_bytes());
        hex::encode(&digest.as_bytes()[..8])
    }
}

#[async_trait]
impl SessionProvider for LocalSessionProvider {
    async fn login(&self, credentials: Option<&Credentials>) -> Result<Session, StorageError> {
        let session = match credentials {
            None => Session::anonymous(),
            Some(creds) => {
                if creds.email.is_empty() || creds.password.is_empty() {
                    return Err(StorageError::auth("email and password are required"));
                }
                if !self.accounts.is_empty()
                    && self.accounts.get(&creds.email) != Some(&creds.password)
                {
                    return Err(StorageError::auth(format!(
                        "invalid credentials for {}",
                        creds.email
                    )));
                }
                Session {
                    user_id: Self::user_id_for(creds),
                    app_id: Some(creds.app_id.clone()),
                }
            }
        };

        self.active.fetch_add(1, Ordering::SeqCst);
        info!(user_id = %session.user_id, "Session established");
        Ok(session)
    }

    async fn logout(&self, session: &Session) -> Result<(), StorageError> {
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        debug!(user_id = %session.user_id, "Session terminated");
        Ok(())
    }
}
