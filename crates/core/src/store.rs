// Durable notification store
//
// The history cache reads its initial contents from, and confirms
// mutations against, a server-side store:
//   GET    /notifications        full record list
//   PATCH  /notifications/{id}   mark one record read
//   DELETE /notifications        clear all records

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::error::{NotifyError, Result};
use crate::model::NotificationRecord;
use crate::session::SessionProvider;

/// Trait for the durable notification store
///
/// Implementations can:
/// - Talk to the notification API over HTTP (HttpNotificationStore)
/// - Keep records in memory for tests and offline use (memory::InMemoryNotificationStore)
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Fetch the full current record set
    async fn list(&self) -> Result<Vec<NotificationRecord>>;

    /// Confirm that a record was read
    async fn mark_read(&self, id: &str) -> Result<()>;

    /// Remove every record
    async fn clear(&self) -> Result<()>;
}

/// Notification store reached over HTTP
pub struct HttpNotificationStore {
    base_url: String,
    http: reqwest::Client,
    session: Option<Arc<dyn SessionProvider>>,
}

impl HttpNotificationStore {
    /// `base_url` is the API root, e.g. `http://localhost:3000/api`
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            session: None,
        }
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Attach the signed-in user's bearer token to every request
    pub fn with_session(mut self, session: Arc<dyn SessionProvider>) -> Self {
        self.session = Some(session);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.session.as_ref().and_then(|s| s.current_user()) {
            Some(user) => request.bearer_auth(user.token),
            None => request,
        }
    }

    async fn expect_success(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(NotifyError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl NotificationStore for HttpNotificationStore {
    async fn list(&self) -> Result<Vec<NotificationRecord>> {
        let response = self
            .authorize(self.http.get(self.url("/notifications")))
            .send()
            .await?;
        let records: Vec<NotificationRecord> = Self::expect_success(response).await?.json().await?;
        debug!(count = records.len(), "Fetched notification history");
        Ok(records)
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        let response = self
            .authorize(self.http.patch(self.url(&format!("/notifications/{}", id))))
            .send()
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let response = self
            .authorize(self.http.delete(self.url("/notifications")))
            .send()
            .await?;

        // Clearing an already empty history is fine
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::expect_success(response).await?;
        Ok(())
    }
}

impl std::fmt::Debug for HttpNotificationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpNotificationStore")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.session.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AuthUser, StaticSession};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_list_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/notifications"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "1", "title": "a", "message": "m", "url": "/x", "timestamp": "2024-01-01T00:00:00Z"},
                {"id": "2", "title": "b", "message": "n", "url": "/", "timestamp": "2024-01-02T00:00:00Z", "read": true}
            ])))
            .mount(&server)
            .await;

        let store = HttpNotificationStore::new(&format!("{}/api/", server.uri()));
        let records = store.list().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].target_url, "/x");
        assert!(records[1].read);
    }

    #[tokio::test]
    async fn test_mark_read_sends_patch_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/notifications/abc"))
            .and(header("authorization", "Bearer t0k"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let session = Arc::new(StaticSession::signed_in(AuthUser::new("u", "t0k")));
        let store =
            HttpNotificationStore::new(&format!("{}/api", server.uri())).with_session(session);
        store.mark_read("abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_mark_read_failure_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/notifications/abc"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let store = HttpNotificationStore::new(&format!("{}/api", server.uri()));
        let err = store.mark_read("abc").await.unwrap_err();
        match err {
            NotifyError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_clear_sends_delete() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/notifications"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpNotificationStore::new(&format!("{}/api", server.uri()));
        store.clear().await.unwrap();
    }
}
