//! WebSocket protocol message definitions
//! These are the wire types for client-server communication, and also the
//! exact envelopes carried on the event bus

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::store::{PlayerId, Tile};

/// Message type that requests a tile capture
pub const CAPTURE: &str = "capture";

/// Message sent from client to server.
///
/// Only `capture` is defined; other types decode fine and are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tile_id: Option<i32>,
    #[serde(default)]
    pub user_id: Option<PlayerId>,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// A tile changed owner
    #[serde(rename_all = "camelCase")]
    TileUpdate {
        tile_id: i32,
        owner_id: Option<PlayerId>,
    },

    /// The board is exhausted; final standings
    #[serde(rename_all = "camelCase")]
    GameOver {
        /// Rank-1 entry, absent when no player is registered
        winner: Option<StandingEntry>,
        rankings: Vec<StandingEntry>,
        /// Seconds until the board resets
        reset_in: u64,
    },

    /// The board was reset and a new game started
    NewGame,
}

impl ServerMsg {
    pub fn tile_update(tile: &Tile) -> Self {
        Self::TileUpdate {
            tile_id: tile.id,
            owner_id: tile.owner_id.clone(),
        }
    }

    /// Serialize to the bytes that go on the bus and the socket
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// One row of the final standings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandingEntry {
    pub user_id: PlayerId,
    pub name: String,
    pub color: String,
    pub count: usize,
    pub rank: u32,
}
