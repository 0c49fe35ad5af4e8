use crate::config::{StorageBackend, StorageConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument, warn};

/// Errors surfaced by blob backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage connection not configured")]
    NotConfigured,

    #[error("Object not found: {container}/{name}")]
    NotFound { container: String, name: String },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Headers and metadata attached to a stored object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutOptions {
    pub content_type: String,
    pub content_disposition: Option<String>,
    pub metadata: Vec<(String, String)>,
}

impl PutOptions {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            ..Default::default()
        }
    }

    pub fn disposition(mut self, disposition: impl Into<String>) -> Self {
        self.content_disposition = Some(disposition.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Object body as read back from the store
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    /// User metadata, sorted by key
    pub metadata: Vec<(String, String)>,
}

/// Blob storage organised as named collections of objects.
///
/// A collection maps to a key prefix inside a single bucket, so `videos/x.mp4`
/// is the object `x.mp4` of the `videos` collection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Names of every object in `container`, in lexicographic order
    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError>;

    /// Persist `data` and return the public URL of the new object
    async fn put(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<String, StoreError>;

    async fn get(&self, container: &str, name: &str) -> Result<StoredObject, StoreError>;

    /// Public URL of an object, whether or not it exists
    fn url(&self, container: &str, name: &str) -> String;
}

/// Build the configured backend.
///
/// Returns `Ok(None)` when the S3 backend has no bucket configured; handlers
/// report that as a configuration error instead of failing startup.
pub async fn connect(config: &StorageConfig) -> Result<Option<Arc<dyn BlobStore>>> {
    match config.backend {
        StorageBackend::Memory => {
            let base = config
                .public_base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:7072/blobs".to_string());
            info!(base_url = %base, "Using in-memory blob store");
            Ok(Some(Arc::new(MemoryBlobStore::new(base))))
        }
        StorageBackend::S3 => {
            if config.bucket.is_none() {
                warn!("No storage bucket configured, storage-backed endpoints will fail");
                return Ok(None);
            }
            let store = S3BlobStore::new(config)
                .await
                .context("Failed to initialize S3 blob store")?;
            Ok(Some(Arc::new(store)))
        }
    }
}

/// S3-backed blob store
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    config: StorageConfig,
}

impl S3BlobStore {
    /// Create a new S3 store
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .context("storage.bucket is required for the S3 backend")?;

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Ok(Self {
            client,
            bucket,
            config: config.clone(),
        })
    }

    /// Simple single-part upload for small objects
    async fn simple_upload(
        &self,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(&options.content_type)
            .set_content_disposition(options.content_disposition.clone());

        for (k, v) in &options.metadata {
            request = request.metadata(k, v);
        }

        request
            .send()
            .await
            .map_err(|e| backend_error("Failed to upload object", e))?;

        Ok(())
    }

    /// Multipart upload for large objects
    async fn multipart_upload(
        &self,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<(), StoreError> {
        let mut create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(&options.content_type)
            .set_content_disposition(options.content_disposition.clone());

        for (k, v) in &options.metadata {
            create = create.metadata(k, v);
        }

        let create_response = create
            .send()
            .await
            .map_err(|e| backend_error("Failed to create multipart upload", e))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| StoreError::Backend("No upload ID in response".to_string()))?;

        let mut completed_parts = Vec::new();
        let mut part_number = 1;

        for chunk in data.chunks(self.config.part_size_bytes.max(1)) {
            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(Bytes::copy_from_slice(chunk)))
                .send()
                .await
                .map_err(|e| backend_error("Failed to upload part", e))?;

            completed_parts.push(
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
            part_number += 1;
        }

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| backend_error("Failed to complete multipart upload", e))?;

        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self))]
    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{}/", sanitize_path_component(container));
        let mut names = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| backend_error("Failed to list objects", e))?;

            names.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .filter_map(|key| key.strip_prefix(prefix.as_str()))
                    .filter(|name| !name.is_empty())
                    .map(String::from),
            );

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        debug!(count = names.len(), "Listed objects");
        Ok(names)
    }

    #[instrument(skip(self, data, options), fields(size_bytes = data.len()))]
    async fn put(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<String, StoreError> {
        let key = object_key(container, name);

        if data.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(&key, data, options).await?;
        } else {
            self.simple_upload(&key, data, options).await?;
        }

        info!(key = %key, "Object uploaded");
        Ok(self.url(container, name))
    }

    #[instrument(skip(self))]
    async fn get(&self, container: &str, name: &str) -> Result<StoredObject, StoreError> {
        let key = object_key(container, name);

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Err(StoreError::NotFound {
                        container: container.to_string(),
                        name: name.to_string(),
                    });
                }
                return Err(backend_error("Failed to fetch object", e));
            }
        };

        let content_type = output.content_type().map(String::from);
        let content_disposition = output.content_disposition().map(String::from);
        let mut metadata: Vec<(String, String)> = output
            .metadata()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        metadata.sort();
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to read object body: {}", e)))?
            .into_bytes();

        Ok(StoredObject {
            data,
            content_type,
            content_disposition,
            metadata,
        })
    }

    fn url(&self, container: &str, name: &str) -> String {
        object_url(&self.config, &self.bucket, container, name)
    }
}

/// Process-local blob store
pub struct MemoryBlobStore {
    base_url: String,
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))?;

        Ok(objects
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn put(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<String, StoreError> {
        let mut metadata = options.metadata.clone();
        metadata.sort();

        let mut objects = self
            .objects
            .write()
            .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))?;

        objects.insert(
            (container.to_string(), name.to_string()),
            StoredObject {
                data,
                content_type: Some(options.content_type.clone()),
                content_disposition: options.content_disposition.clone(),
                metadata,
            },
        );

        Ok(self.url(container, name))
    }

    async fn get(&self, container: &str, name: &str) -> Result<StoredObject, StoreError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))?;

        objects
            .get(&(container.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            })
    }

    fn url(&self, container: &str, name: &str) -> String {
        format!("{}/{}/{}", self.base_url, container, name)
    }
}

fn backend_error<E>(context: &str, err: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::Backend(format!("{}: {}", context, DisplayErrorContext(err)))
}

/// Key of an object inside the bucket
pub fn object_key(container: &str, name: &str) -> String {
    format!("{}/{}", sanitize_path_component(container), name)
}

/// Public URL of an object.
///
/// Precedence: configured public base, then a custom endpoint addressed
/// path-style, then the virtual-hosted AWS URL.
pub fn object_url(config: &StorageConfig, bucket: &str, container: &str, name: &str) -> String {
    let key = object_key(container, name);

    if let Some(ref base) = config.public_base_url {
        return format!("{}/{}", base.trim_end_matches('/'), key);
    }

    if let Some(ref endpoint) = config.endpoint_url {
        return format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key);
    }

    format!("https://{}.s3.{}.amazonaws.com/{}", bucket, config.region, key)
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_config() -> StorageConfig {
        StorageConfig {
            bucket: Some("feed-media".to_string()),
            ..StorageConfig::default()
        }
    }

    #[test]
    fn test_object_url_virtual_hosted() {
        let config = s3_config();
        assert_eq!(
            object_url(&config, "feed-media", "videos", "video-1.mp4"),
            "https://feed-media.s3.us-east-1.amazonaws.com/videos/video-1.mp4"
        );
    }

    #[test]
    fn test_object_url_custom_endpoint() {
        let mut config = s3_config();
        config.endpoint_url = Some("http://localhost:9000/".to_string());
        assert_eq!(
            object_url(&config, "feed-media", "videos", "video-1.mp4"),
            "http://localhost:9000/feed-media/videos/video-1.mp4"
        );

        config.public_base_url = Some("https://cdn.example.com".to_string());
        assert_eq!(
            object_url(&config, "feed-media", "thumbnails", "a.mp4-thumb.png"),
            "https://cdn.example.com/thumbnails/a.mp4-thumb.png"
        );
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("videos"), "videos");
        assert_eq!(sanitize_path_component("../videos"), "___videos");
        assert_eq!(object_key("a/b", "x.mp4"), "a_b/x.mp4");
    }

    #[tokio::test]
    async fn test_memory_store_round_trip_and_listing_order() {
        let store = MemoryBlobStore::new("http://localhost:7072/blobs/");

        let url = store
            .put("videos", "b.mp4", Bytes::from_static(b"bb"), &PutOptions::new("video/mp4"))
            .await
            .unwrap();
        store
            .put("videos", "a.mp4", Bytes::from_static(b"a"), &PutOptions::new("video/mp4"))
            .await
            .unwrap();
        store
            .put("thumbnails", "a.mp4-thumb.png", Bytes::new(), &PutOptions::new("image/png"))
            .await
            .unwrap();

        assert_eq!(url, "http://localhost:7072/blobs/videos/b.mp4");
        assert_eq!(store.list("videos").await.unwrap(), vec!["a.mp4", "b.mp4"]);
        assert_eq!(store.len(), 3);

        let object = store.get("videos", "b.mp4").await.unwrap();
        assert_eq!(object.data, Bytes::from_static(b"bb"));
        assert_eq!(object.content_type.as_deref(), Some("video/mp4"));
        assert!(object.content_disposition.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_keeps_disposition_and_metadata() {
        let store = MemoryBlobStore::new("http://localhost");
        let options = PutOptions::new("video/mp4")
            .disposition("inline")
            .metadata("uploaded-at", "2024-01-15T10:30:45+00:00");

        store
            .put("videos", "a.mp4", Bytes::from_static(b"a"), &options)
            .await
            .unwrap();

        let object = store.get("videos", "a.mp4").await.unwrap();
        assert_eq!(object.content_disposition.as_deref(), Some("inline"));
        assert_eq!(
            object.metadata,
            vec![(
                "uploaded-at".to_string(),
                "2024-01-15T10:30:45+00:00".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_memory_store_missing_object() {
        let store = MemoryBlobStore::new("http://localhost");
        let err = store.get("videos", "nope.mp4").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
