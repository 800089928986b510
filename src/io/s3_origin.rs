use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use super::OriginStore;
use crate::asset::OriginAssetRef;
use crate::error::IoError;

/// S3-backed implementation of `OriginStore`.
///
/// Originals live in a single bucket under `{folder}/{name}` keys, the same
/// layout the upload flow writes them with.
///
/// # Example
///
/// ```ignore
/// use derivative_cache::io::S3OriginStore;
///
/// let origin = S3OriginStore::connect("my-bucket", "us-east-1", None).await;
///
/// // Fetches s3://my-bucket/marketplace/item.png
/// let asset = OriginAssetRef::parse("marketplace", "item.png")?;
/// let bytes = origin.get(&asset).await?;
/// ```
#[derive(Clone)]
pub struct S3OriginStore {
    client: Client,
    bucket: String,
}

impl S3OriginStore {
    /// Create a new S3OriginStore for the given bucket.
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Build a client from the ambient AWS credentials and wrap it.
    ///
    /// `endpoint` points the store at an S3-compatible service such as
    /// MinIO; those are addressed path-style (`{endpoint}/{bucket}/{key}`).
    pub async fn connect(bucket: impl Into<String>, region: &str, endpoint: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(endpoint.is_some())
            .build();

        Self::new(Client::from_conf(s3_config), bucket.into())
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl OriginStore for S3OriginStore {
    async fn get(&self, asset: &OriginAssetRef) -> Result<Bytes, IoError> {
        let key = asset.object_key();
        let location = format!("s3://{}/{}", self.bucket, key);

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let is_not_found = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);

                // Some S3-compatible services answer a bare 404 without the
                // NoSuchKey error code
                let status_is_404 = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == 404)
                    .unwrap_or(false);

                if is_not_found || status_is_404 {
                    return IoError::NotFound(location.clone());
                }

                match e {
                    SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
                        IoError::Connection(e.to_string())
                    }
                    other => IoError::S3(other.to_string()),
                }
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();

        debug!(location = %location, bytes = data.len(), "Fetched original");

        Ok(data)
    }
}
