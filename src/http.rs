use reqwest::{Client, Response};
use serde::Deserialize;

use crate::error::Result;

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Shared HTTP client. No request timeout is set; a hung request stays
/// pending until the caller drops the future.
pub fn build_client() -> Result<Client> {
    let client = Client::builder()
        .user_agent(format!("portfolio-client/{}", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Pull a human-readable message out of a failed response. A JSON body
/// yields its `error` field (or nothing); any other body yields its text.
pub(crate) async fn error_message(response: Response) -> Option<String> {
    let text = response.text().await.ok()?;
    if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
        return body.error.filter(|e| !e.is_empty());
    }
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Like [`error_message`] but only trusts a JSON `error` field.
pub(crate) async fn json_error_message(response: Response) -> Option<String> {
    let body: ErrorBody = response.json().await.ok()?;
    body.error.filter(|e| !e.is_empty())
}
