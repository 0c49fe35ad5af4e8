use crate::controller::{FeedController, FeedLoad};
use crate::error::FeedError;
use crate::media::MediaElement;
use crate::model::{UploadReceipt, VideoDescriptor};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::{info, instrument};
use url::Url;

/// Source of the video listing
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn list_videos(&self) -> Result<Vec<VideoDescriptor>, FeedError>;
}

/// HTTP client for the media store API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(api_base: &str) -> Result<Self, FeedError> {
        // Without the trailing slash `join` would replace the last segment
        let base = if api_base.ends_with('/') {
            api_base.to_string()
        } else {
            format!("{}/", api_base)
        };
        let base = Url::parse(&base)
            .map_err(|e| FeedError::Config(format!("invalid api base {}: {}", api_base, e)))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { http, base })
    }

    pub fn endpoint(&self, name: &str) -> Result<Url, FeedError> {
        self.base
            .join(name)
            .map_err(|e| FeedError::Config(format!("invalid endpoint {}: {}", name, e)))
    }

    /// Upload one video as the multipart `video` field
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upload_video(
        &self,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<UploadReceipt, FeedError> {
        let part = Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str("video/mp4")?;
        let form = Form::new().part("video", part);

        let response = self
            .http
            .post(self.endpoint("uploadVideo")?)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::NetworkFailure(format!("{}: {}", status, body)));
        }

        let receipt: UploadReceipt = response.json().await?;
        info!(file_name = %receipt.file_name, "Upload accepted");
        Ok(receipt)
    }
}

#[async_trait]
impl VideoSource for ApiClient {
    #[instrument(skip(self))]
    async fn list_videos(&self) -> Result<Vec<VideoDescriptor>, FeedError> {
        let response = self.http.get(self.endpoint("listVideos")?).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::NetworkFailure(format!(
                "listVideos returned {}",
                status
            )));
        }

        Ok(response.json().await?)
    }
}

/// Fetch the listing and apply it to the controller
pub async fn load_feed<M, S>(controller: &mut FeedController<M>, source: &S) -> FeedLoad
where
    M: MediaElement + Default,
    S: VideoSource + ?Sized,
{
    let ticket = controller.begin_fetch();
    let result = source.list_videos().await;
    controller.finish_fetch(ticket, result)
}
