use crate::core::OwnerId;
use std::fmt;

/// A cached collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Catalog,
    Cart(OwnerId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog => write!(f, "catalog"),
            Self::Cart(owner) => write!(f, "cart/{}", owner),
        }
    }
}

/// Which topics an invalidation reaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Catalog,
    /// Every owner's cart
    Carts,
    Cart(OwnerId),
}

impl Scope {
    pub fn covers(&self, topic: &Topic) -> bool {
        match (self, topic) {
            (Self::All, _) => true,
            (Self::Catalog, Topic::Catalog) => true,
            (Self::Carts, Topic::Cart(_)) => true,
            (Self::Cart(wanted), Topic::Cart(owner)) => wanted == owner,
            _ => false,
        }
    }

    pub(crate) fn covers_catalog(&self) -> bool {
        self.covers(&Topic::Catalog)
    }

    pub(crate) fn covers_cart(&self, owner: &OwnerId) -> bool {
        match self {
            Self::All | Self::Carts => true,
            Self::Cart(wanted) => wanted == owner,
            Self::Catalog => false,
        }
    }
}

impl From<Topic> for Scope {
    fn from(topic: Topic) -> Self {
        match topic {
            Topic::Catalog => Self::Catalog,
            Topic::Cart(owner) => Self::Cart(owner),
        }
    }
}

/// Where a topic is in its fetch lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicStatus {
    /// Never fetched, evicted, or first fetch failed
    Absent,
    /// First fetch in flight
    Loading,
    Fresh,
    /// Value is shown but the next read refetches
    Stale,
}
