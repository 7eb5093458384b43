//! Inspect link parsing and generation
//!
//! An inspect link ends in `S{owner}A{asset}D{d}` for items in an inventory
//! or `M{listing}A{asset}D{d}` for market listings. The asset id is the stable
//! key used by item stores.

use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const INSPECT_PREFIX: &str = "steam://rungame/730/76561202255233023/+csgo_econ_action_preview";

static LINK_TAIL: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[SM](\d+)A(\d+)D(\d+)$").expect("valid inspect link regex"));

/// Errors from link parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("Invalid inspect link: {0}")]
    Invalid(String),
}

/// Who holds the inspected item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum LinkOwner {
    /// Item in a player's inventory, keyed by steam id
    Steam(String),
    /// Item on a market listing, keyed by listing id
    Market(String),
}

impl LinkOwner {
    fn marker(&self) -> char {
        match self {
            Self::Steam(_) => 'S',
            Self::Market(_) => 'M',
        }
    }

    /// The numeric id portion
    pub fn id(&self) -> &str {
        match self {
            Self::Steam(id) | Self::Market(id) => id,
        }
    }
}

/// A validated inspect link
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InspectLink {
    raw: String,
    owner: LinkOwner,
    #[serde(rename = "asset-id")]
    asset_id: String,
    d: String,
}

impl InspectLink {
    /// Parse and validate a raw inspect link
    pub fn parse(raw: &str) -> Result<Self, LinkError> {
        debug!(%raw, "InspectLink::parse: called");
        let caps = LINK_TAIL
            .captures(raw)
            .ok_or_else(|| LinkError::Invalid(raw.to_string()))?;

        // Group 0 starts with the marker character
        let marker = caps.get(0).and_then(|m| m.as_str().chars().next());
        let owner_id = caps[1].to_string();
        let owner = match marker {
            Some('M') => LinkOwner::Market(owner_id),
            _ => LinkOwner::Steam(owner_id),
        };

        Ok(Self {
            raw: raw.to_string(),
            owner,
            asset_id: caps[2].to_string(),
            d: caps[3].to_string(),
        })
    }

    /// Build the canonical inspect link for an item
    pub fn generate(owner: LinkOwner, asset_id: impl Into<String>, d: impl Into<String>) -> Self {
        let asset_id = asset_id.into();
        let d = d.into();
        let raw = format!("{} {}{}A{}D{}", INSPECT_PREFIX, owner.marker(), owner.id(), asset_id, d);
        debug!(%raw, "InspectLink::generate: built link");
        Self { raw, owner, asset_id, d }
    }

    pub fn owner(&self) -> &LinkOwner {
        &self.owner
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn d(&self) -> &str {
        &self.d
    }

    /// The link exactly as submitted
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for InspectLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl std::str::FromStr for InspectLink {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
