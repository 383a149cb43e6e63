//! Deserializable connection settings.
//!
//! ```ignore
//! let config: MongoDbConfig = bson::deserialize_from_document(doc! {
//!     "uri": "mongodb://localhost:27017/?replicaSet=rs0",
//!     "database": "library",
//! })?;
//! let store = MongoDbStoreBuilder::from(config).build().await?;
//! ```

use serde::Deserialize;

use crate::store::MongoDbStoreBuilder;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoDbConfig {
    pub uri: String,
    pub database: String,
    /// Whether writes wait for the server's acknowledgement.
    #[serde(default = "acknowledged_by_default")]
    pub acknowledged_writes: bool,
}

fn acknowledged_by_default() -> bool {
    true
}

impl From<MongoDbConfig> for MongoDbStoreBuilder {
    fn from(config: MongoDbConfig) -> Self {
        MongoDbStoreBuilder::new(&config.uri, &config.database)
            .acknowledged_writes(config.acknowledged_writes)
    }
}
