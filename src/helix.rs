//! Authenticated Twitch Helix API client
//!
//! Every request carries the `Client-Id` header and the current bearer
//! token. A 401 response triggers one on-demand credential refresh and a
//! single retry with the new token; a second 401 is returned to the caller.

use std::sync::Arc;

use reqwest::{Method, Response, StatusCode};

use crate::credentials::AccessTokens;
use crate::error::{Result, StreamTagsError};

#[derive(Clone)]
pub struct HelixClient {
    http: reqwest::Client,
    api_base: String,
    client_id: String,
    tokens: Arc<dyn AccessTokens>,
}

impl HelixClient {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        client_id: impl Into<String>,
        tokens: Arc<dyn AccessTokens>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            tokens,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Sends `method {api_base}/{path}?{query}` with credentials attached.
    ///
    /// # Errors
    ///
    /// Transport failures are [`StreamTagsError::Lookup`]. HTTP error
    /// statuses are returned as responses for the caller to interpret.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Response> {
        let response = self.send_once(method.clone(), path, query).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::warn!(path = %path, "Helix returned 401 Unauthorized; refreshing credentials and retrying");
        self.tokens.handle_auth_failure().await;
        self.send_once(method, path, query).await
    }

    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        self.send(Method::GET, path, query).await
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Response> {
        let url = format!("{}/{}", self.api_base, path.trim_start_matches('/'));
        self.http
            .request(method, &url)
            .query(query)
            .header("Client-Id", &self.client_id)
            .header(
                "Authorization",
                format!("Bearer {}", self.tokens.access_token()),
            )
            .send()
            .await
            .map_err(|e| {
                tracing::error!(url = %url, error = %e, "Helix request failed");
                StreamTagsError::Lookup(e.to_string()).into()
            })
    }
}

/// Turns a non-2xx response into [`StreamTagsError::Lookup`] carrying the
/// status and body.
pub async fn error_for_status(response: Response, what: &str) -> anyhow::Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = %status, body = %body, "Helix {} failed", what);
    StreamTagsError::Lookup(format!("{what} returned {status}: {body}")).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RotatingTokens;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_attaches_client_id_and_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("login", "alice"))
            .and(header("Client-Id", "cid"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = HelixClient::new(
            reqwest::Client::new(),
            format!("{}/", server.uri()),
            "cid",
            RotatingTokens::new("tok"),
        );
        let response = client.get("/users", &[("login", "alice")]).await.unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let tokens = RotatingTokens::new("stale");
        let client = HelixClient::new(reqwest::Client::new(), server.uri(), "cid", tokens.clone());
        let response = client.get("users", &[]).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(tokens.failures(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_lookup_error() {
        let client = HelixClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            "cid",
            RotatingTokens::new("tok"),
        );
        let err = client.get("users", &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StreamTagsError>(),
            Some(StreamTagsError::Lookup(_))
        ));
    }
}
