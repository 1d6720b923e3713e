//! Supabase REST API client using service_role key, and the board stored behind it

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{ClaimOutcome, OwnershipCount, Player, StoreError, Tile, TileStore};
use crate::config::SupabaseConfig;

/// Rows requested per page. PostgREST may return fewer (its `max_rows`), so
/// paging stops on an empty page rather than a short one.
const PAGE_SIZE: usize = 1000;

/// Supabase client for server-side database operations
/// Uses service_role key which bypasses RLS - handle with care!
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            service_role_key: config.service_role_key.clone(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    /// Make an authenticated GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Vec<T>, SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);

        let response = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        let response = check_status(response).await?;
        response.json().await.map_err(SupabaseError::Parse)
    }

    /// GET every row matching `query`, one page at a time.
    /// `query` must carry an `order` so pages do not overlap.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Vec<T>, SupabaseError> {
        let mut rows = Vec::new();
        loop {
            let paged = format!("{}&limit={}&offset={}", query, PAGE_SIZE, rows.len());
            let page: Vec<T> = self.get(table, &paged).await?;
            if page.is_empty() {
                return Ok(rows);
            }
            rows.extend(page);
        }
    }

    /// Count the rows matching `query` without transferring them
    pub async fn count(&self, table: &str, query: &str) -> Result<usize, SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);

        let response = self
            .authed(self.client.head(&url))
            .header("Prefer", "count=exact")
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        let response = check_status(response).await?;
        response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(content_range_total)
            .ok_or(SupabaseError::MissingCount)
    }

    /// Make an authenticated GET request expecting a single row
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Option<T>, SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);

        let response = self
            .authed(self.client.get(&url))
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        if response.status() == reqwest::StatusCode::NOT_ACCEPTABLE {
            // No rows found
            return Ok(None);
        }

        let response = check_status(response).await?;
        response.json().await.map(Some).map_err(SupabaseError::Parse)
    }

    /// PATCH the rows matching `query` and return them as they are after the update.
    ///
    /// The filter and the write run as one statement, so Postgres holds the row
    /// lock between checking the filter and applying the change.
    pub async fn update_returning<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
        data: &T,
    ) -> Result<Vec<R>, SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);

        let response = self
            .authed(self.client.patch(&url))
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        let response = check_status(response).await?;
        response.json().await.map_err(SupabaseError::Parse)
    }

    /// Make an authenticated PATCH request (update)
    pub async fn update<T: Serialize>(
        &self,
        table: &str,
        query: &str,
        data: &T,
    ) -> Result<(), SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);

        let response = self
            .authed(self.client.patch(&url))
            .header("Prefer", "return=minimal")
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        check_status(response).await?;
        Ok(())
    }

    /// Insert, skipping rows whose `on_conflict` key already exists
    pub async fn insert_ignore<T: Serialize>(
        &self,
        table: &str,
        data: &T,
        on_conflict: &str,
    ) -> Result<(), SupabaseError> {
        let url = format!("{}?on_conflict={}", self.rest_url(table), on_conflict);

        let response = self
            .authed(self.client.post(&url))
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        check_status(response).await?;
        Ok(())
    }
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`
fn content_range_total(header: &str) -> Option<usize> {
    header.rsplit_once('/')?.1.parse().ok()
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SupabaseError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(SupabaseError::Api {
        status: status.as_u16(),
        body,
    })
}

/// Row of the `tiles` table
#[derive(Debug, Clone, Deserialize)]
struct TileRow {
    id: i32,
    owner_id: Option<String>,
    updated_at: DateTime<Utc>,
}

impl From<TileRow> for Tile {
    fn from(row: TileRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OwnerRow {
    owner_id: String,
}

/// Owner change written to `tiles`
#[derive(Debug, Serialize)]
struct OwnerUpdate<'a> {
    owner_id: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

/// Board stored in the Supabase `tiles` and `users` tables
#[derive(Clone)]
pub struct SupabaseTileStore {
    client: SupabaseClient,
}

impl SupabaseTileStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TileStore for SupabaseTileStore {
    async fn list_tiles(&self) -> Result<Vec<Tile>, StoreError> {
        let rows: Vec<TileRow> = self
            .client
            .get_all("tiles", "select=id,owner_id,updated_at&order=id.asc")
            .await?;
        Ok(rows.into_iter().map(Tile::from).collect())
    }

    async fn claim_tile_exclusive(
        &self,
        tile_id: i32,
        player_id: &str,
    ) -> Result<ClaimOutcome, StoreError> {
        let update = OwnerUpdate {
            owner_id: Some(player_id),
            updated_at: Utc::now(),
        };
        let query = format!(
            "id=eq.{}&owner_id=is.null&select=id,owner_id,updated_at",
            tile_id
        );
        let mut claimed: Vec<TileRow> = self
            .client
            .update_returning("tiles", &query, &update)
            .await?;

        if let Some(row) = claimed.pop() {
            return Ok(ClaimOutcome::Claimed(row.into()));
        }

        // Nothing matched: either the tile is owned or it does not exist
        let existing: Option<TileRow> = self
            .client
            .get_one(
                "tiles",
                &format!("id=eq.{}&select=id,owner_id,updated_at", tile_id),
            )
            .await?;
        match existing {
            Some(_) => Ok(ClaimOutcome::AlreadyClaimed),
            None => Err(StoreError::TileNotFound(tile_id)),
        }
    }

    async fn count_unclaimed(&self) -> Result<usize, StoreError> {
        let unclaimed = self.client.count("tiles", "owner_id=is.null").await?;
        Ok(unclaimed)
    }

    async fn aggregate_ownership(&self) -> Result<Vec<OwnershipCount>, StoreError> {
        let players: Vec<Player> = self
            .client
            .get_all("users", "select=id,name,color&order=id.asc")
            .await?;
        let owners: Vec<OwnerRow> = self
            .client
            .get_all("tiles", "select=owner_id&owner_id=not.is.null&order=id.asc")
            .await?;

        let mut owned: HashMap<String, usize> = HashMap::new();
        for row in owners {
            *owned.entry(row.owner_id).or_default() += 1;
        }

        Ok(players
            .into_iter()
            .map(|player| {
                let count = owned.get(&player.id).copied().unwrap_or(0);
                OwnershipCount { player, count }
            })
            .collect())
    }

    async fn clear_all_owners(&self) -> Result<(), StoreError> {
        let update = OwnerUpdate {
            owner_id: None,
            updated_at: Utc::now(),
        };
        self.client
            .update("tiles", "owner_id=not.is.null", &update)
            .await?;
        Ok(())
    }

    async fn register_player(&self, player: Player) -> Result<(), StoreError> {
        self.client.insert_ignore("users", &player, "id").await?;
        Ok(())
    }
}

/// Supabase errors
#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(#[source] reqwest::Error),

    #[error("Response carried no row count")]
    MissingCount,
}
