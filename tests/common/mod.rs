#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use portfolio_client::session::{TOKEN_KEY, USER_KEY};
use portfolio_client::{ChatState, ChatViewModel, Identity, MemoryStorage, SessionStore, Storage};

pub const TOKEN: &str = "test-token-0123456789";

pub fn ada() -> Identity {
    Identity {
        user_id: "u-1".to_string(),
        username: "ada".to_string(),
        email: Some("ada@example.com".to_string()),
    }
}

/// A session restored from storage, as if the user had signed in earlier.
pub async fn signed_in_session(api_url: &str) -> Arc<SessionStore> {
    let storage = MemoryStorage::new();
    storage.set(TOKEN_KEY, TOKEN).await.unwrap();
    storage
        .set(USER_KEY, &serde_json::to_string(&ada()).unwrap())
        .await
        .unwrap();
    Arc::new(
        SessionStore::open(reqwest::Client::new(), api_url, Arc::new(storage))
            .await
            .unwrap(),
    )
}

pub async fn signed_out_session(api_url: &str) -> Arc<SessionStore> {
    Arc::new(
        SessionStore::open(reqwest::Client::new(), api_url, Arc::new(MemoryStorage::new()))
            .await
            .unwrap(),
    )
}

/// Poll the chat state until `check` holds or two seconds pass.
pub async fn wait_for(chat: &ChatViewModel, what: &str, check: impl Fn(&ChatState) -> bool) {
    for _ in 0..100 {
        if check(&chat.state().await) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
