//! `Dragonfly` (Redis-compatible) connection and JSON operations.
//!
//! `Dragonfly` is an optional shared cache in front of derived reads.
//! Nothing durable lives here: losing the instance only costs recomputation.

use fred::prelude::*;
use fred::types::Expiration;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
}

impl DragonflyPool {
    /// Connect to `redis://host:port[/db]`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed.
    /// Returns [`StoreError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly cache");
        Ok(Self { client })
    }

    /// Store `value` as JSON at `key`, expiring after `ttl_ms` milliseconds.
    ///
    /// The server-side TTL only reclaims memory; readers still compare the
    /// envelope's own deadline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if serialization fails.
    /// Returns [`StoreError::Dragonfly`] if the write fails.
    pub async fn set_json_px<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_ms: i64,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        let _: () = self
            .client
            .set(key, json.as_str(), Some(Expiration::PX(ttl_ms)), None, false)
            .await?;
        Ok(())
    }

    /// Read and decode the JSON at `key`, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if deserialization fails.
    /// Returns [`StoreError::Dragonfly`] if the read fails.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let value: Option<String> = self.client.get(key).await?;
        value
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(StoreError::from)
    }

    /// Drop `key`. Missing keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Dragonfly`] if the delete fails.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _: u32 = self.client.del(key).await?;
        Ok(())
    }
}
