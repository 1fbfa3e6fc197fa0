use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, Method};
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::ObjectStorageSettings;
use crate::models::StoredFile;
use crate::services::file_storage::FileStore;

type HmacSha256 = Hmac<Sha256>;

const AWS_URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Presigned URLs are capped at 7 days by SigV4
const MAX_PRESIGN_SECONDS: u64 = 604800;

/// S3-compatible bucket client signing requests with AWS SigV4
#[derive(Clone, Debug)]
pub struct ObjectStorageClient {
    http: Client,
    bucket: String,
    region: String,
    endpoint: Url,
    access_key: String,
    secret_key: String,
    prefix: String,
    url_ttl: Duration,
}

impl ObjectStorageClient {
    pub fn new(settings: ObjectStorageSettings) -> Result<Self> {
        let endpoint = settings
            .endpoint
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", settings.region));

        let endpoint = Url::parse(&endpoint).context("Invalid object storage endpoint URL")?;
        if endpoint.host_str().is_none() {
            bail!("Object storage endpoint must include a host");
        }

        let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "prod".to_string());
        if app_env == "prod" && endpoint.scheme() != "https" {
            bail!(
                "Object storage endpoint must use HTTPS in production mode. Got: {}",
                endpoint.scheme()
            );
        }

        if endpoint.scheme() != "https" && endpoint.scheme() != "http" {
            bail!(
                "Invalid endpoint scheme: {}. Must be http or https.",
                endpoint.scheme()
            );
        }

        Ok(Self {
            http: Client::new(),
            bucket: settings.bucket,
            region: settings.region,
            access_key: settings.access_key,
            secret_key: settings.secret_key,
            endpoint,
            prefix: sanitize_prefix(&settings.prefix),
            url_ttl: Duration::from_secs(settings.url_ttl_seconds.min(MAX_PRESIGN_SECONDS)),
        })
    }

    pub async fn upload_bytes(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let object_key = self.full_key(key);
        self.send_signed(Method::PUT, &object_key, bytes, Some(content_type))
            .await
            .with_context(|| format!("Failed to upload object {}", object_key))
    }

    pub async fn delete_object(&self, key: &str) -> Result<()> {
        let object_key = self.full_key(key);
        self.send_signed(Method::DELETE, &object_key, Vec::new(), None)
            .await
            .with_context(|| format!("Failed to delete object {}", object_key))
    }

    async fn send_signed(
        &self,
        method: Method,
        object_key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<()> {
        let payload_hash = hex::encode(Sha256::digest(&body));
        let now = Utc::now();
        let authorization = self.authorization_header(
            method.as_str(),
            object_key,
            &payload_hash,
            now,
        )?;

        let mut request = self
            .http
            .request(method, self.object_url(object_key))
            .header("Authorization", authorization)
            .header("x-amz-date", amz_date(now))
            .header("x-amz-content-sha256", payload_hash);
        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }

        request
            .body(body)
            .send()
            .await
            .context("Object storage request failed")?
            .error_for_status()
            .context("Object storage returned error status")?;

        Ok(())
    }

    fn authorization_header(
        &self,
        method: &str,
        object_key: &str,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let amz_date = amz_date(now);
        let date_stamp = now.format("%Y%m%d").to_string();
        let scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);

        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
            self.host()?,
            payload_hash,
            amz_date
        );
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method,
            self.canonical_uri(object_key),
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let signature = self.sign(&date_stamp, &amz_date, &scope, &canonical_request);

        Ok(format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, scope, signed_headers, signature
        ))
    }

    pub fn generate_presigned_download_url(&self, key: &str, ttl: Duration) -> Result<String> {
        self.presign_at(key, ttl, Utc::now())
    }

    fn presign_at(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Result<String> {
        let ttl_secs = ttl.as_secs().min(MAX_PRESIGN_SECONDS);
        let amz_date = amz_date(now);
        let date_stamp = now.format("%Y%m%d").to_string();
        let scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let object_key = self.full_key(key);

        let mut params = BTreeMap::new();
        params.insert("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string());
        params.insert(
            "X-Amz-Credential".to_string(),
            format!("{}/{}", self.access_key, scope),
        );
        params.insert("X-Amz-Date".to_string(), amz_date.clone());
        params.insert("X-Amz-Expires".to_string(), ttl_secs.to_string());
        params.insert("X-Amz-SignedHeaders".to_string(), "host".to_string());

        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            self.canonical_uri(&object_key),
            canonical_query_string(&params),
            self.host()?
        );

        let signature = self.sign(&date_stamp, &amz_date, &scope, &canonical_request);
        params.insert("X-Amz-Signature".to_string(), signature);

        let mut url = self.object_url(&object_key);
        url.set_query(Some(&canonical_query_string(&params)));
        Ok(url.to_string())
    }

    fn sign(&self, date_stamp: &str, amz_date: &str, scope: &str, canonical_request: &str) -> String {
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let signing_key = derive_signing_key(&self.secret_key, date_stamp, &self.region, "s3");
        hex::encode(hmac_sign(&signing_key, string_to_sign.as_bytes()))
    }

    fn host(&self) -> Result<String> {
        let host = self
            .endpoint
            .host_str()
            .ok_or_else(|| anyhow!("Object storage endpoint missing host"))?
            .to_lowercase();
        Ok(match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        })
    }

    fn full_key(&self, key: &str) -> String {
        let cleaned = key.trim_matches('/');
        if self.prefix.is_empty() {
            cleaned.to_string()
        } else if cleaned.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, cleaned)
        }
    }

    fn encoded_key(key: &str) -> String {
        key.split('/')
            .map(|segment| utf8_percent_encode(segment, AWS_URI_ENCODE_SET).to_string())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn canonical_uri(&self, key: &str) -> String {
        format!("/{}/{}", self.bucket, Self::encoded_key(key))
    }

    fn object_url(&self, object_key: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.set_path(&format!("{}/{}", self.bucket, Self::encoded_key(object_key)));
        url
    }
}

#[async_trait]
impl FileStore for ObjectStorageClient {
    fn backend(&self) -> &'static str {
        "object_storage"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        file_name: &str,
    ) -> Result<StoredFile> {
        let size = bytes.len() as i64;
        self.upload_bytes(key, bytes, content_type).await?;

        // Presigned links expire, so only the key is kept
        Ok(StoredFile {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            size,
            key: key.to_string(),
            url: String::new(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.delete_object(key).await
    }

    fn url_for(&self, key: &str) -> Result<String> {
        self.generate_presigned_download_url(key, self.url_ttl)
    }
}

fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

fn canonical_query_string(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, AWS_URI_ENCODE_SET),
                utf8_percent_encode(value, AWS_URI_ENCODE_SET)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn sanitize_prefix(prefix: &str) -> String {
    prefix
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let mut key = format!("AWS4{}", secret).into_bytes();
    key = hmac_sign(&key, date);
    key = hmac_sign(&key, region);
    key = hmac_sign(&key, service);
    hmac_sign(&key, b"aws4_request")
}

fn hmac_sign(key: &[u8], message: impl AsRef<[u8]>) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message.as_ref());
    mac.finalize().into_bytes().to_vec()
}
