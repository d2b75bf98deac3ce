//! Signed-in identity and bearer credential, mirrored to durable storage.

use std::sync::Arc;

use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use crate::error::{AppError, Result};
use crate::http::json_error_message;
use crate::models::{Credential, Identity};
use crate::storage::Storage;

pub const TOKEN_KEY: &str = "authToken";
pub const USER_KEY: &str = "userData";

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
    user: Identity,
}

struct SessionState {
    identity: Option<Identity>,
    credential: Option<Credential>,
    loading: bool,
}

/// Process-wide session, constructed once and handed to the view-models
/// that need it.
pub struct SessionStore {
    http: Client,
    api_url: String,
    storage: Arc<dyn Storage>,
    state: RwLock<SessionState>,
    identity_tx: watch::Sender<Option<Identity>>,
}

impl SessionStore {
    /// Build the store and restore whatever was persisted. The restored
    /// identity is trusted as-is; nothing is revalidated with the server.
    pub async fn open(http: Client, api_url: impl Into<String>, storage: Arc<dyn Storage>) -> Result<Self> {
        let (identity_tx, _) = watch::channel(None);
        let store = SessionStore {
            http,
            api_url: api_url.into(),
            storage,
            state: RwLock::new(SessionState {
                identity: None,
                credential: None,
                loading: true,
            }),
            identity_tx,
        };
        store.restore().await?;
        Ok(store)
    }

    async fn restore(&self) -> Result<()> {
        let token = self.storage.get(TOKEN_KEY).await?;
        let user = self.storage.get(USER_KEY).await?;

        let restored = match (token, user) {
            (Some(token), Some(user)) => match serde_json::from_str::<Identity>(&user) {
                Ok(identity) => Some((identity, Credential::new(token))),
                Err(e) => {
                    warn!("Ignoring unreadable persisted identity: {}", e);
                    None
                }
            },
            _ => None,
        };

        let mut state = self.state.write().await;
        if let Some((identity, credential)) = restored {
            info!("Restored session for {}", identity.username);
            self.identity_tx.send_replace(Some(identity.clone()));
            state.identity = Some(identity);
            state.credential = Some(credential);
        }
        state.loading = false;
        Ok(())
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.state.read().await.identity.clone()
    }

    pub async fn credential(&self) -> Option<Credential> {
        self.state.read().await.credential.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.loading
    }

    /// Identity and credential together, or `AuthRequired`.
    pub async fn require(&self) -> Result<(Identity, Credential)> {
        let state = self.state.read().await;
        match (&state.identity, &state.credential) {
            (Some(identity), Some(credential)) => Ok((identity.clone(), credential.clone())),
            _ => Err(AppError::AuthRequired),
        }
    }

    /// Watch identity changes; `None` means signed out.
    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.identity_tx.subscribe()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Identity> {
        let request = AuthRequest {
            username,
            password,
            email: None,
        };
        self.authenticate("login", &request, "Login failed").await
    }

    pub async fn signup(&self, username: &str, password: &str, email: Option<&str>) -> Result<Identity> {
        let request = AuthRequest {
            username,
            password,
            email,
        };
        self.authenticate("signup", &request, "Signup failed").await
    }

    /// Forget the session locally. The server is not told.
    pub async fn logout(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.identity = None;
            state.credential = None;
        }
        self.identity_tx.send_replace(None);

        let token_removed = self.storage.remove(TOKEN_KEY).await;
        let user_removed = self.storage.remove(USER_KEY).await;
        info!("Logged out");
        token_removed.and(user_removed)
    }

    async fn authenticate(&self, endpoint: &str, request: &AuthRequest<'_>, fallback: &str) -> Result<Identity> {
        self.state.write().await.loading = true;
        let result = match self.post_auth(endpoint, request, fallback).await {
            Ok(response) => self.establish(response).await,
            Err(e) => Err(e),
        };
        self.state.write().await.loading = false;
        result
    }

    async fn post_auth(&self, endpoint: &str, request: &AuthRequest<'_>, fallback: &str) -> Result<AuthResponse> {
        let url = format!("{}/auth/{}", self.api_url, endpoint);
        let response = self.http.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = json_error_message(response)
                .await
                .unwrap_or_else(|| fallback.to_string());
            warn!("POST {} failed with {}: {}", url, status, message);
            return Err(AppError::server(status, message));
        }

        response
            .json::<AuthResponse>()
            .await
            .map_err(|e| AppError::Decode(format!("auth response: {e}")))
    }

    async fn establish(&self, response: AuthResponse) -> Result<Identity> {
        let user_json =
            serde_json::to_string(&response.user).map_err(|e| AppError::Decode(e.to_string()))?;
        self.storage.set(TOKEN_KEY, &response.token).await?;
        if let Err(e) = self.storage.set(USER_KEY, &user_json).await {
            // Never leave a token without its identity.
            if let Err(cleanup) = self.storage.remove(TOKEN_KEY).await {
                warn!("Could not roll back stored token: {}", cleanup);
            }
            return Err(e);
        }

        let credential = Credential::new(response.token);
        info!(
            "Signed in as {} ({})",
            response.user.username,
            credential.redacted()
        );

        let mut state = self.state.write().await;
        state.identity = Some(response.user.clone());
        state.credential = Some(credential);
        self.identity_tx.send_replace(Some(response.user.clone()));
        Ok(response.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn identity() -> Identity {
        Identity {
            user_id: "u-1".to_string(),
            username: "ada".to_string(),
            email: None,
        }
    }

    async fn open_with(storage: MemoryStorage) -> SessionStore {
        SessionStore::open(Client::new(), "http://127.0.0.1:9", Arc::new(storage))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn restores_persisted_session_without_validation() {
        let storage = MemoryStorage::new();
        storage.set(TOKEN_KEY, "stored-token").await.unwrap();
        storage
            .set(USER_KEY, &serde_json::to_string(&identity()).unwrap())
            .await
            .unwrap();

        let store = open_with(storage).await;
        assert_eq!(store.identity().await, Some(identity()));
        assert_eq!(store.credential().await, Some(Credential::new("stored-token")));
        assert!(!store.is_loading().await);
        assert_eq!(*store.subscribe().borrow(), Some(identity()));
    }

    #[tokio::test]
    async fn half_persisted_session_is_ignored() {
        let storage = MemoryStorage::new();
        storage.set(TOKEN_KEY, "stored-token").await.unwrap();

        let store = open_with(storage).await;
        assert_eq!(store.identity().await, None);
        assert!(matches!(store.require().await, Err(AppError::AuthRequired)));
    }

    #[tokio::test]
    async fn unreadable_identity_is_ignored() {
        let storage = MemoryStorage::new();
        storage.set(TOKEN_KEY, "stored-token").await.unwrap();
        storage.set(USER_KEY, "not json").await.unwrap();

        let store = open_with(storage).await;
        assert_eq!(store.credential().await, None);
    }

    #[tokio::test]
    async fn logout_clears_memory_and_storage() {
        let storage = MemoryStorage::new();
        storage.set(TOKEN_KEY, "stored-token").await.unwrap();
        storage
            .set(USER_KEY, &serde_json::to_string(&identity()).unwrap())
            .await
            .unwrap();
        let store = open_with(storage.clone()).await;
        let watcher = store.subscribe();

        store.logout().await.unwrap();

        assert_eq!(store.identity().await, None);
        assert_eq!(store.credential().await, None);
        assert_eq!(storage.get(TOKEN_KEY).await.unwrap(), None);
        assert_eq!(storage.get(USER_KEY).await.unwrap(), None);
        assert_eq!(*watcher.borrow(), None);
    }

    #[tokio::test]
    async fn logout_without_session_is_fine() {
        let store = open_with(MemoryStorage::new()).await;
        store.logout().await.unwrap();
        assert_eq!(store.identity().await, None);
    }
}
