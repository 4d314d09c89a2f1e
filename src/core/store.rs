use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::Error;
use crate::runtime::ResponseStore;

const TABLE_PREFIX: &str = "ngsw:db:";

/// Named-table persistence façade layered over the same response store
/// used for cache bodies. Each table is addressed internally as
/// `"ngsw:db:<table>"`; JSON is the only serialization format.
#[derive(Clone)]
pub struct Db {
    store: Arc<dyn ResponseStore>,
}

impl Db {
    pub fn new(store: Arc<dyn ResponseStore>) -> Self {
        Self { store }
    }

    /// Opening a table has no side effects — there's nothing to fail or
    /// cache beyond the cheap wrapper itself — so this never returns an
    /// error, unlike the read/write operations on the table it hands
    /// back.
    pub fn open(&self, table: &str) -> Table {
        Table {
            store: Arc::clone(&self.store),
            full_name: format!("{TABLE_PREFIX}{table}"),
        }
    }

    pub async fn delete(&self, table: &str) -> Result<(), Error> {
        self.store
            .delete_store(&format!("{TABLE_PREFIX}{table}"))
            .await
            .map_err(Error::from)
    }

    pub async fn list(&self) -> Result<Vec<String>, Error> {
        let names = self.store.store_names().await.map_err(Error::from)?;
        Ok(names
            .into_iter()
            .filter_map(|n| n.strip_prefix(TABLE_PREFIX).map(|s| s.to_string()))
            .collect())
    }
}

/// One opened table. Reads of a missing key fail with
/// [`Error::NotFound`], per the design doc's tagged-`NotFound` contract.
#[derive(Clone)]
pub struct Table {
    store: Arc<dyn ResponseStore>,
    full_name: String,
}

impl Table {
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<T, Error> {
        let value = self
            .store
            .get_value(&self.full_name, key)
            .await
            .map_err(Error::from)?
            .ok_or_else(|| Error::NotFound(format!("{}/{key}", self.full_name)))?;
        serde_json::from_value(value).map_err(Error::from)
    }

    pub async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), Error> {
        let json = serde_json::to_value(value)?;
        self.store
            .put_value(&self.full_name, key, json)
            .await
            .map_err(Error::from)
    }

    pub async fn delete(&self, key: &str) -> Result<bool, Error> {
        self.store
            .delete_value(&self.full_name, key)
            .await
            .map_err(Error::from)
    }

    pub async fn keys(&self) -> Result<Vec<String>, Error> {
        self.store.value_keys(&self.full_name).await.map_err(Error::from)
    }
}
