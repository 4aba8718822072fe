use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::{check_key, UrlSigner};

/// A disposable, time-limited URL for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl SignedUrl {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Signs URLs with a keyed SHA-256 token over bucket, path and expiry.
pub struct Sha256Signer {
    base_url: String,
    secret: String,
}

impl Sha256Signer {
    pub fn new(base_url: &str, secret: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        }
    }

    fn token(&self, bucket: &str, path: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(bucket.as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Check a token previously issued by [`UrlSigner::sign`].
    pub fn verify(
        &self,
        bucket: &str,
        path: &str,
        token: &str,
        expires: i64,
        now: DateTime<Utc>,
    ) -> bool {
        now.timestamp() < expires && self.token(bucket, path, expires) == token
    }
}

#[async_trait]
impl UrlSigner for Sha256Signer {
    async fn sign(&self, bucket: &str, path: &str, ttl: Duration) -> Option<SignedUrl> {
        if self.secret.is_empty() || check_key(path).is_err() {
            return None;
        }

        let ttl = chrono::Duration::from_std(ttl).ok()?;
        let expires_at = Utc::now().checked_add_signed(ttl)?;
        let expires = expires_at.timestamp();
        let token = self.token(bucket, path, expires);

        Some(SignedUrl {
            url: format!(
                "{}/object/sign/{}/{}?token={}&expires={}",
                self.base_url, bucket, path, token, expires
            ),
            expires_at,
        })
    }
}
