use super::ObjectStore;
use crate::error::StoreError;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

/// Import uploads and result logs in a single bucket.
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_text(&self, key: &str, body: String, content_type: &str) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body.into_bytes()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("S3 put_object failed for {}: {}", key, e);
                StoreError::Backend(format!("Failed to upload to S3: {}", e))
            })?;
        Ok(())
    }

    async fn get_text(&self, key: &str) -> Result<String, StoreError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    StoreError::NotFound(key.to_string())
                } else {
                    StoreError::Backend(format!("Failed to read {} from S3: {}", key, service_error))
                }
            })?;

        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to read S3 body: {}", e)))?
            .into_bytes();

        String::from_utf8(bytes.to_vec())
            .map_err(|e| StoreError::Serialization(format!("{} is not UTF-8: {}", key, e)))
    }

    async fn presign_get(&self, key: &str, expires_secs: u64) -> Result<String, StoreError> {
        let config = aws_sdk_s3::presigning::PresigningConfig::expires_in(
            std::time::Duration::from_secs(expires_secs),
        )
        .map_err(|e| StoreError::Backend(format!("Invalid presigning config: {}", e)))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to generate presigned URL: {}", e)))?;

        Ok(presigned.uri().to_string())
    }
}
