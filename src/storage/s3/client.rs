//! S3 client: endpoint resolution and signed requests

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Method, Response, StatusCode, Url};

use crate::config::S3Config;
use crate::storage::s3::signer::{encode_key_path, Credentials, Signer, EMPTY_PAYLOAD_SHA256, UNSIGNED_PAYLOAD};
use crate::storage::{StorageError, StorageResult};

/// Longest validity S3 accepts for a presigned URL (7 days)
pub const MAX_PRESIGN_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    endpoint: Url,
    bucket: String,
    region: String,
    credentials: Credentials,
    path_style: bool,
    prefix: String,
}

impl Client {
    pub fn new(config: &S3Config) -> StorageResult<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::Backend("S3 bucket is not configured".to_string()));
        }

        let access_key_id = config
            .access_key_id()
            .ok_or_else(|| StorageError::Backend("S3 access key ID is not configured".to_string()))?;
        let secret_access_key = config.secret_access_key().ok_or_else(|| {
            StorageError::Backend("S3 secret access key is not configured".to_string())
        })?;

        let endpoint = match config.endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => endpoint.to_string(),
            None => format!("https://s3.{}.amazonaws.com", config.region),
        };
        let endpoint = Url::parse(endpoint.trim_end_matches('/'))
            .map_err(|e| StorageError::Backend(format!("Invalid S3 endpoint: {}", e)))?;

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            credentials: Credentials {
                access_key_id,
                secret_access_key,
            },
            path_style: config.path_style,
            prefix: config.prefix.trim_matches('/').to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key inside the bucket, with the configured prefix applied
    pub fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    /// Full URL of an object, path-style or virtual-hosted
    pub fn object_url(&self, key: &str) -> StorageResult<Url> {
        let path = encode_key_path(&self.object_key(key));
        let base = self.endpoint.as_str().trim_end_matches('/');

        let url = if self.path_style {
            format!("{}/{}/{}", base, self.bucket, path)
        } else {
            let host = self.endpoint.host_str().ok_or_else(|| {
                StorageError::Backend("S3 endpoint has no host".to_string())
            })?;
            let authority = match self.endpoint.port() {
                Some(port) => format!("{}.{}:{}", self.bucket, host, port),
                None => format!("{}.{}", self.bucket, host),
            };
            format!("{}://{}/{}", self.endpoint.scheme(), authority, path)
        };

        Url::parse(&url).map_err(|e| StorageError::InvalidKey(format!("{}: {}", key, e)))
    }

    fn signed_headers(
        &self,
        method: &Method,
        url: &Url,
        extra: &[(&str, &str)],
        payload_hash: &str,
    ) -> StorageResult<HeaderMap> {
        let signer = Signer::new(&self.credentials, &self.region, Utc::now());
        let mut headers = HeaderMap::new();

        for (name, value) in extra.iter().copied() {
            headers.insert(header_name(name)?, header_value(value)?);
        }
        for (name, value) in signer.sign_headers(method.as_str(), url, extra, payload_hash) {
            headers.insert(header_name(&name)?, header_value(&value)?);
        }
        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        headers: HeaderMap,
        body: Option<Body>,
    ) -> StorageResult<Response> {
        let url = self.object_url(key)?;
        let mut request = self.http.request(method.clone(), url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("S3 {} {} failed: {}", method, key, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        Err(StorageError::Backend(format!(
            "S3 {} {} returned {}: {}",
            method,
            key,
            status,
            text.chars().take(512).collect::<String>()
        )))
    }

    /// PUT an object, streaming the body with an unsigned payload
    pub async fn put_object(
        &self,
        key: &str,
        body: Body,
        size: i64,
        content_type: &str,
    ) -> StorageResult<()> {
        let url = self.object_url(key)?;
        let mut headers = self.signed_headers(&Method::PUT, &url, &[], UNSIGNED_PAYLOAD)?;
        headers.insert(CONTENT_LENGTH, header_value(&size.to_string())?);
        headers.insert(CONTENT_TYPE, header_value(content_type)?);

        self.send(Method::PUT, key, headers, Some(body)).await?;
        tracing::debug!("Uploaded {} bytes to s3://{}/{}", size, self.bucket, self.object_key(key));
        Ok(())
    }

    pub async fn get_object(&self, key: &str) -> StorageResult<Response> {
        let url = self.object_url(key)?;
        let headers = self.signed_headers(&Method::GET, &url, &[], EMPTY_PAYLOAD_SHA256)?;
        self.send(Method::GET, key, headers, None).await
    }

    pub async fn head_object(&self, key: &str) -> StorageResult<bool> {
        let url = self.object_url(key)?;
        let headers = self.signed_headers(&Method::HEAD, &url, &[], EMPTY_PAYLOAD_SHA256)?;
        match self.send(Method::HEAD, key, headers, None).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let url = self.object_url(key)?;
        let headers = self.signed_headers(&Method::DELETE, &url, &[], EMPTY_PAYLOAD_SHA256)?;
        self.send(Method::DELETE, key, headers, None).await?;
        tracing::debug!("Deleted s3://{}/{}", self.bucket, self.object_key(key));
        Ok(())
    }

    /// Presigned GET URL valid for `expires_secs`
    pub fn presigned_get_url(&self, key: &str, expires_secs: u64) -> StorageResult<String> {
        if expires_secs == 0 || expires_secs > MAX_PRESIGN_SECS {
            return Err(StorageError::InvalidInput(
                "Expiration must be between 1 second and 7 days".to_string(),
            ));
        }

        let url = self.object_url(key)?;
        let signer = Signer::new(&self.credentials, &self.region, Utc::now());
        Ok(signer.presign("GET", &url, expires_secs).to_string())
    }
}

fn header_name(name: &str) -> StorageResult<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| StorageError::Backend(format!("Invalid header name {}: {}", name, e)))
}

fn header_value(value: &str) -> StorageResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| StorageError::InvalidInput(format!("Invalid header value: {}", e)))
}
