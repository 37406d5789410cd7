//! Channel VIP management

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;

use crate::error::{Result, StreamTagsError};
use crate::helix::{error_for_status, HelixClient};

/// Grants and revokes VIP status in the broadcaster's channel.
#[async_trait]
pub trait ChannelModerator: Send + Sync {
    async fn add_vip(&self, login: &str) -> Result<()>;
    async fn remove_vip(&self, login: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    data: Vec<UserData>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
}

/// [`ChannelModerator`] backed by the Helix `channels/vips` endpoint.
pub struct HelixChannelModerator {
    client: HelixClient,
    broadcaster_id: String,
}

impl HelixChannelModerator {
    pub fn new(client: HelixClient, broadcaster_id: impl Into<String>) -> Self {
        Self {
            client,
            broadcaster_id: broadcaster_id.into(),
        }
    }

    async fn user_id(&self, login: &str) -> Result<String> {
        let response = self.client.get("users", &[("login", login)]).await?;
        if !response.status().is_success() {
            return Err(error_for_status(response, "user lookup").await);
        }
        let users: UsersResponse = response
            .json()
            .await
            .map_err(|e| StreamTagsError::Lookup(format!("invalid users response: {e}")))?;
        users
            .data
            .into_iter()
            .next()
            .map(|u| u.id)
            .ok_or_else(|| StreamTagsError::Lookup(format!("user {login} not found")).into())
    }

    async fn change_vip(&self, method: Method, login: &str) -> Result<()> {
        let user_id = self.user_id(login).await?;
        let response = self
            .client
            .send(
                method.clone(),
                "channels/vips",
                &[
                    ("broadcaster_id", self.broadcaster_id.as_str()),
                    ("user_id", user_id.as_str()),
                ],
            )
            .await?;
        if !response.status().is_success() {
            return Err(error_for_status(response, "VIP change").await);
        }
        tracing::info!(login = %login, method = %method, "Changed VIP status");
        Ok(())
    }
}

#[async_trait]
impl ChannelModerator for HelixChannelModerator {
    async fn add_vip(&self, login: &str) -> Result<()> {
        self.change_vip(Method::POST, login).await
    }

    async fn remove_vip(&self, login: &str) -> Result<()> {
        self.change_vip(Method::DELETE, login).await
    }
}
