use super::{Keyed, Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Owner of a cart. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(SyncError::KeyDerivation("empty owner_id".into()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A browsable item of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub collection_id: String,
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl CatalogItem {
    pub fn new(collection_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            item_id: item_id.into(),
            name: None,
            image_url: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// The cart entry created when `owner` adds this item.
    ///
    /// An empty image url counts as absent.
    pub fn to_record(&self, owner: &OwnerId) -> Record {
        Record {
            collection_id: self.collection_id.clone(),
            item_id: self.item_id.clone(),
            owner_id: owner.as_str().to_string(),
            image_url: self.image_url.clone().filter(|url| !url.is_empty()),
        }
    }
}

impl Keyed for CatalogItem {
    fn item_id(&self) -> &str {
        &self.item_id
    }

    fn collection_id(&self) -> &str {
        &self.collection_id
    }
}

/// A cart entry: one catalog item owned by one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub collection_id: String,
    pub item_id: String,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Record {
    pub fn new(
        collection_id: impl Into<String>,
        item_id: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            collection_id: collection_id.into(),
            item_id: item_id.into(),
            owner_id: owner_id.into(),
            image_url: None,
        }
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }
}

impl Keyed for Record {
    fn item_id(&self) -> &str {
        &self.item_id
    }

    fn collection_id(&self) -> &str {
        &self.collection_id
    }
}
