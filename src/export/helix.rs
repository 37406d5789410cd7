//! Recording lookup via the Twitch Helix videos endpoint

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{Result, StreamTagsError};
use crate::export::{VodInfo, VodResolver};
use crate::helix::{error_for_status, HelixClient};

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    data: Vec<VideoData>,
}

#[derive(Debug, Deserialize)]
struct VideoData {
    id: String,
    url: String,
    #[serde(default)]
    stream_id: Option<String>,
}

/// [`VodResolver`] that queries `GET {api_base}/videos?id=...`.
pub struct HelixVodResolver {
    client: HelixClient,
}

impl HelixVodResolver {
    pub fn new(client: HelixClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VodResolver for HelixVodResolver {
    async fn resolve(&self, vod_id: &str) -> Result<Option<VodInfo>> {
        let response = self.client.get("videos", &[("id", vod_id)]).await?;

        let status = response.status();
        // Helix answers 400 for ids that are not numeric and 404 for ids
        // that do not exist; both mean there is no such recording.
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            tracing::debug!(vod_id = %vod_id, status = %status, "Recording not found");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(error_for_status(response, "videos lookup").await);
        }

        let parsed: VideosResponse = response
            .json()
            .await
            .map_err(|e| StreamTagsError::Lookup(format!("invalid videos response: {e}")))?;

        Ok(parsed.data.into_iter().next().map(|video| VodInfo {
            id: video.id,
            url: video.url,
            stream_id: video.stream_id.filter(|id| !id.is_empty()),
        }))
    }
}
