//! Raw inspect result payload

use serde::{Deserialize, Serialize};

/// A sticker applied to an inspected item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sticker {
    pub slot: u32,

    #[serde(rename = "sticker-id")]
    pub sticker_id: u32,

    #[serde(default)]
    pub wear: Option<f64>,
}

/// Item data returned by a worker for one inspect link
///
/// The scheduler never looks inside this; enrichment happens downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectItem {
    /// Asset id, matches `InspectLink::asset_id`
    pub itemid: String,
    pub defindex: u32,
    pub paintindex: u32,
    pub rarity: u32,
    pub quality: u32,
    /// Float value, kept as f64 (0.0 - 1.0)
    pub paintwear: f64,
    pub paintseed: u32,
    #[serde(default)]
    pub killeaterscoretype: Option<u32>,
    #[serde(default)]
    pub killeatervalue: Option<u32>,
    #[serde(default)]
    pub customname: Option<String>,
    pub inventory: u32,
    pub origin: u32,
    #[serde(default)]
    pub questid: Option<u32>,
    #[serde(default)]
    pub dropreason: Option<u32>,
    #[serde(default)]
    pub musicindex: Option<u32>,
    #[serde(default)]
    pub entindex: Option<i32>,
    #[serde(default)]
    pub stickers: Vec<Sticker>,
}

impl InspectItem {
    /// Minimal item with only the identifying fields set
    pub fn new(itemid: impl Into<String>) -> Self {
        Self {
            itemid: itemid.into(),
            defindex: 0,
            paintindex: 0,
            rarity: 0,
            quality: 0,
            paintwear: 0.0,
            paintseed: 0,
            killeaterscoretype: None,
            killeatervalue: None,
            customname: None,
            inventory: 0,
            origin: 0,
            questid: None,
            dropreason: None,
            musicindex: None,
            entindex: None,
            stickers: Vec::new(),
        }
    }
}
