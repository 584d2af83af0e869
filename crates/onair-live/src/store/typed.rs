//! Typed (serde) helpers over the untyped document store.

use async_trait::async_trait;
use onair_common::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{SetMode, SignalingStore, Transaction};

#[async_trait]
pub trait StoreExt: SignalingStore {
    async fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        match self.get(path).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Children that fail to decode are skipped, not fatal.
    async fn list_as<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Vec<(String, T)>, StoreError> {
        let docs = self.list(collection).await?;
        Ok(docs
            .into_iter()
            .filter_map(|(id, value)| match serde_json::from_value(value) {
                Ok(doc) => Some((id, doc)),
                Err(e) => {
                    tracing::debug!(collection, id, error = %e, "skipping undecodable document");
                    None
                }
            })
            .collect())
    }

    async fn put<T: Serialize + Sync>(
        &self,
        path: &str,
        doc: &T,
        mode: SetMode,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(doc)?;
        self.set(path, value, mode).await
    }

    async fn append<T: Serialize + Sync>(
        &self,
        collection: &str,
        doc: &T,
    ) -> Result<String, StoreError> {
        let value = serde_json::to_value(doc)?;
        self.add(collection, value).await
    }
}

impl<S: SignalingStore + ?Sized> StoreExt for S {}

/// Typed reads and writes inside a transaction body.
pub trait TxnExt {
    fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError>;
    fn set_as<T: Serialize>(&mut self, path: &str, doc: &T, mode: SetMode)
        -> Result<(), StoreError>;
}

impl TxnExt for dyn Transaction + '_ {
    fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        match self.get(path) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn set_as<T: Serialize>(
        &mut self,
        path: &str,
        doc: &T,
        mode: SetMode,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(doc)?;
        self.set(path, value, mode);
        Ok(())
    }
}
