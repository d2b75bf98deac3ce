use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, error, info};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{AppError, Result};
use crate::http::error_message;
use crate::models::{TodoItem, TodoStatus};
use crate::session::SessionStore;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TodoState {
    pub items: Vec<TodoItem>,
    pub loading: bool,
    pub error: Option<String>,
    /// User the items were fetched for.
    #[serde(skip)]
    owner: Option<String>,
}

impl TodoState {
    pub fn pending(&self) -> impl Iterator<Item = &TodoItem> {
        self.items.iter().filter(|t| t.status == TodoStatus::Pending)
    }

    pub fn completed(&self) -> impl Iterator<Item = &TodoItem> {
        self.items.iter().filter(|t| t.status == TodoStatus::Done)
    }

    pub fn get(&self, id: &str) -> Option<&TodoItem> {
        self.items.iter().find(|t| t.id == id)
    }
}

/// Marks an item id as having a request in flight until dropped.
struct InFlight<'a> {
    ids: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlight<'a> {
    fn acquire(ids: &'a Mutex<HashSet<String>>, id: &str) -> Result<Self> {
        let mut guard = ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.insert(id.to_string()) {
            return Err(AppError::Busy { id: id.to_string() });
        }
        Ok(InFlight {
            ids,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Todo list bound to the `/todos` REST resource. Every call needs the
/// session's credential; the server is the system of record.
///
/// The local list belongs to whoever was signed in when it was fetched, so
/// it is emptied whenever the session identity changes. Must be built
/// inside a Tokio runtime.
pub struct TodoViewModel {
    http: Client,
    api_url: String,
    session: Arc<SessionStore>,
    state: Arc<RwLock<TodoState>>,
    in_flight: Mutex<HashSet<String>>,
    watcher: JoinHandle<()>,
}

impl TodoViewModel {
    pub fn new(http: Client, api_url: impl Into<String>, session: Arc<SessionStore>) -> Self {
        let state = Arc::new(RwLock::new(TodoState::default()));

        let mut identity_rx = session.subscribe();
        let watched = Arc::clone(&state);
        let watcher = tokio::spawn(async move {
            while identity_rx.changed().await.is_ok() {
                let current = identity_rx.borrow_and_update().as_ref().map(|i| i.user_id.clone());
                let mut state = watched.write().await;
                if current.is_none() || state.owner != current {
                    debug!("Session changed, clearing todo list");
                    state.items.clear();
                    state.error = None;
                    state.owner = None;
                }
            }
        });

        TodoViewModel {
            http,
            api_url: api_url.into(),
            session,
            state,
            in_flight: Mutex::new(HashSet::new()),
            watcher,
        }
    }

    pub async fn state(&self) -> TodoState {
        self.state.read().await.clone()
    }

    pub async fn items(&self) -> Vec<TodoItem> {
        self.state.read().await.items.clone()
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    /// Fetch the full list and replace the local copy.
    pub async fn list(&self) -> Result<Vec<TodoItem>> {
        self.state.write().await.loading = true;
        let owner = self.session.identity().await.map(|i| i.user_id);
        let result = self.fetch_all().await;
        let mut state = self.state.write().await;
        state.loading = false;
        match result {
            Ok(items) => {
                info!("Loaded {} todos", items.len());
                state.items.clone_from(&items);
                state.error = None;
                state.owner = owner;
                Ok(items)
            }
            Err(e) => {
                error!("Error fetching todos: {}", e);
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn fetch_all(&self) -> Result<Vec<TodoItem>> {
        let response = self.authorized(Method::GET, self.collection_url()?).await?.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = error_message(response)
                .await
                .unwrap_or_else(|| format!("HTTP error: {}", status.as_u16()));
            return Err(AppError::server(status, message));
        }
        decode(response).await
    }

    /// Create a task from `text`. Blank text is ignored and returns `None`.
    pub async fn create(&self, text: &str) -> Result<Option<TodoItem>> {
        let task = text.trim();
        if task.is_empty() {
            return Ok(None);
        }
        let result: Result<TodoItem> = async {
            let response = self
                .authorized(Method::POST, self.collection_url()?)
                .await?
                .json(&json!({ "task": task }))
                .send()
                .await?;
            let response = check(response, "Failed to add todo")?;
            decode::<TodoItem>(response).await
        }
        .await;

        let item = self.record(result, "adding todo").await?;
        debug!("Created todo {}", item.id);
        self.state.write().await.items.push(item.clone());
        Ok(Some(item))
    }

    /// Flip `id` away from `current`, the status the caller last saw. The
    /// request carries the new status; the local entry is patched only after
    /// the server accepts it.
    pub async fn toggle(&self, id: &str, current: TodoStatus) -> Result<TodoStatus> {
        let next = current.toggled();
        let result: Result<()> = async {
            let _marker = InFlight::acquire(&self.in_flight, id)?;
            let response = self
                .authorized(Method::PUT, self.item_url(id)?)
                .await?
                .json(&json!({ "status": next }))
                .send()
                .await?;
            check(response, "Failed to update todo").map(drop)
        }
        .await;

        self.record(result, "updating todo").await?;
        let mut state = self.state.write().await;
        if let Some(item) = state.items.iter_mut().find(|t| t.id == id) {
            item.status = next;
        }
        Ok(next)
    }

    /// Delete `id` on the server, then drop it from the local list if it
    /// is there.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let result: Result<()> = async {
            let _marker = InFlight::acquire(&self.in_flight, id)?;
            let response = self
                .authorized(Method::DELETE, self.item_url(id)?)
                .await?
                .send()
                .await?;
            check(response, "Failed to delete todo").map(drop)
        }
        .await;

        self.record(result, "deleting todo").await?;
        self.state.write().await.items.retain(|t| t.id != id);
        Ok(())
    }

    fn collection_url(&self) -> Result<Url> {
        self.todos_url(&[])
    }

    /// `id` is pushed as a single escaped path segment.
    fn item_url(&self, id: &str) -> Result<Url> {
        self.todos_url(&[id])
    }

    fn todos_url(&self, extra: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_url).map_err(|e| AppError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| AppError::InvalidUrl(self.api_url.clone()))?
            .pop_if_empty()
            .push("todos")
            .extend(extra);
        Ok(url)
    }

    async fn authorized(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let credential = self.session.credential().await.ok_or(AppError::AuthRequired)?;
        debug!("{} {} with token {}", method, url, credential.redacted());
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(credential.as_str()))
    }

    /// Mirror the outcome into the screen's error line.
    async fn record<T>(&self, result: Result<T>, action: &str) -> Result<T> {
        let mut state = self.state.write().await;
        match &result {
            Ok(_) => state.error = None,
            Err(e) => {
                error!("Error {}: {}", action, e);
                state.error = Some(e.to_string());
            }
        }
        result
    }
}

impl Drop for TodoViewModel {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

fn check(response: Response, prefix: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(AppError::server(status, format!("{prefix}: {}", status.as_u16())))
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| AppError::Decode(e.to_string()))
}

/// Render a server timestamp like `Jan 5, 02:30 PM` (UTC). Unparseable
/// input is returned unchanged.
pub fn format_created_at(raw: &str) -> String {
    const DISPLAY: &str = "%b %-d, %I:%M %p";
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return at.with_timezone(&Utc).format(DISPLAY).to_string();
    }
    match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(at) => at.format(DISPLAY).to_string(),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, status: TodoStatus) -> TodoItem {
        TodoItem {
            id: id.to_string(),
            owner_id: "u1".to_string(),
            text: format!("task {id}"),
            status,
            created_at: "2024-01-05T14:30:00Z".to_string(),
        }
    }

    #[test]
    fn partitions_by_status() {
        let state = TodoState {
            items: vec![
                item("a", TodoStatus::Pending),
                item("b", TodoStatus::Done),
                item("c", TodoStatus::Pending),
            ],
            ..TodoState::default()
        };
        let pending: Vec<_> = state.pending().map(|t| t.id.as_str()).collect();
        let done: Vec<_> = state.completed().map(|t| t.id.as_str()).collect();
        assert_eq!(pending, ["a", "c"]);
        assert_eq!(done, ["b"]);
    }

    #[test]
    fn in_flight_marker_rejects_second_holder_until_dropped() {
        let ids = Mutex::new(HashSet::new());
        let first = InFlight::acquire(&ids, "t1").unwrap();
        assert!(matches!(
            InFlight::acquire(&ids, "t1"),
            Err(AppError::Busy { ref id }) if id == "t1"
        ));
        assert!(InFlight::acquire(&ids, "t2").is_ok());
        drop(first);
        assert!(InFlight::acquire(&ids, "t1").is_ok());
    }

    #[test]
    fn formats_timestamps() {
        assert_eq!(format_created_at("2024-01-05T14:30:00Z"), "Jan 5, 02:30 PM");
        assert_eq!(format_created_at("2024-11-20T09:05:12.345678"), "Nov 20, 09:05 AM");
        assert_eq!(format_created_at("yesterday"), "yesterday");
    }
}
