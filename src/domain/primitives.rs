//! Domain primitives: Region, ItemModelId, identifiers, PriceDirection.

use serde::{Deserialize, Serialize};

pub type ItemId = u64;
pub type ModelId = u64;
pub type ShopId = u64;
pub type MerchantId = u64;
pub type ChannelId = u64;

/// Region code (e.g. "SG", "MY"). Always stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Region(String);

impl Region {
    /// Create a Region, normalizing to upper-case.
    pub fn new(code: impl Into<String>) -> Self {
        Region(code.into().trim().to_ascii_uppercase())
    }

    /// Get the region code as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Region {
    fn from(value: String) -> Self {
        Region::new(value)
    }
}

impl From<&str> for Region {
    fn from(value: &str) -> Self {
        Region::new(value)
    }
}

impl From<Region> for String {
    fn from(value: Region) -> Self {
        value.0
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sellable variant: item plus model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemModelId {
    pub item_id: ItemId,
    pub model_id: ModelId,
}

impl ItemModelId {
    pub fn new(item_id: ItemId, model_id: ModelId) -> Self {
        Self { item_id, model_id }
    }
}

impl std::fmt::Display for ItemModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.item_id, self.model_id)
    }
}

/// Ordered (primary, affiliate) region pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionPair {
    pub primary: Region,
    pub affiliate: Region,
}

impl RegionPair {
    pub fn new(primary: Region, affiliate: Region) -> Self {
        Self { primary, affiliate }
    }
}

impl std::fmt::Display for RegionPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.primary, self.affiliate)
    }
}

/// Direction of a price conversion.
///
/// `Forward` derives the downstream (affiliate / MPSKU) price from the source
/// price; `Reverse` derives the source (MTSKU) price back from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Forward,
    Reverse,
}

impl std::fmt::Display for PriceDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceDirection::Forward => write!(f, "forward"),
            PriceDirection::Reverse => write!(f, "reverse"),
        }
    }
}
