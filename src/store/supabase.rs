//! Supabase PostgREST backend using the service_role key

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use super::{
    ArchivedSet, FinalResult, FinishReason, MatchRecord, MatchStatus, MatchStore,
    RosterDirectory, StoreError,
};
use crate::sim::roster::{Role, Roster, RosterMember};

const MATCHES: &str = "matches";
const MATCH_SETS: &str = "match_sets";
const TEAM_STARTERS: &str = "team_starters";

/// Thin PostgREST client. The service_role key bypasses RLS, keep it server side.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: &str, service_role_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
        }
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    async fn check(response: Response) -> Result<Response, SupabaseError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(SupabaseError::Api { status, body })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Vec<T>, SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self.authed(self.client.get(&url)).send().await?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)
    }

    /// GET expecting at most one row
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
            .await?;

        // PostgREST answers 406 when the object query matched no row
        if response.status() == reqwest::StatusCode::NOT_ACCEPTABLE {
            return Ok(None);
        }

        Self::check(response)
            .await?
            .json()
            .await
            .map(Some)
            .map_err(SupabaseError::Parse)
    }

    pub async fn insert<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        data: &T,
    ) -> Result<R, SupabaseError> {
        let response = self
            .authed(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await?;

        let rows: Vec<R> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)?;
        rows.into_iter().next().ok_or(SupabaseError::NoRowReturned)
    }

    pub async fn update<T: Serialize>(
        &self,
        table: &str,
        query: &str,
        data: &T,
    ) -> Result<(), SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self.authed(self.client.patch(&url)).json(data).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// PATCH returning the rows that matched the filter
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
            .await?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)
    }

    /// Insert or merge on `on_conflict` columns
    pub async fn upsert<T: Serialize>(
        &self,
        table: &str,
        data: &T,
        on_conflict: &str,
    ) -> Result<(), SupabaseError> {
        let url = format!("{}?on_conflict={}", self.rest_url(table), on_conflict);
        let response = self
            .authed(self.client.post(&url))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(data)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn delete(&self, table: &str, query: &str) -> Result<(), SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self.authed(self.client.delete(&url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

/// Supabase errors
#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),

    #[error("No row returned from insert")]
    NoRowReturned,
}

#[derive(Serialize)]
struct StatusPatch {
    status: MatchStatus,
}

#[derive(Serialize)]
struct RostersPatch<'a> {
    rosters: &'a [Roster; 2],
}

#[derive(Serialize)]
struct SnapshotPatch<'a> {
    snapshot: &'a serde_json::Value,
}

#[derive(Serialize)]
struct ResultPatch {
    status: MatchStatus,
    score: [u8; 2],
    winner_team: Option<Uuid>,
    finish_reason: FinishReason,
    finished_at: DateTime<Utc>,
}

/// `matches` and `match_sets` tables
#[derive(Clone)]
pub struct SupabaseStore {
    client: SupabaseClient,
}

impl SupabaseStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MatchStore for SupabaseStore {
    async fn insert_scheduled(&self, record: MatchRecord) -> Result<MatchRecord, StoreError> {
        Ok(self.client.insert(MATCHES, &record).await?)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MatchRecord>, StoreError> {
        let query = format!("id=eq.{}", id);
        Ok(self.client.get_one(MATCHES, &query).await?)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<MatchRecord>, StoreError> {
        let query = format!(
            "status=eq.scheduled&scheduled_at=lte.{}&order=scheduled_at.asc",
            now.format("%Y-%m-%dT%H:%M:%S%.fZ")
        );
        Ok(self.client.get(MATCHES, &query).await?)
    }

    async fn list_running(&self) -> Result<Vec<MatchRecord>, StoreError> {
        Ok(self.client.get(MATCHES, "status=eq.running").await?)
    }

    async fn try_transition(
        &self,
        id: Uuid,
        from: MatchStatus,
        to: MatchStatus,
    ) -> Result<bool, StoreError> {
        // The status filter makes the PATCH a compare-and-set
        let query = format!("id=eq.{}&status=eq.{}&select=id", id, from.as_str());
        let rows: Vec<serde_json::Value> = self
            .client
            .update_returning(MATCHES, &query, &StatusPatch { status: to })
            .await?;
        Ok(!rows.is_empty())
    }

    async fn capture_rosters(&self, id: Uuid, rosters: &[Roster; 2]) -> Result<(), StoreError> {
        let query = format!("id=eq.{}", id);
        Ok(self
            .client
            .update(MATCHES, &query, &RostersPatch { rosters })
            .await?)
    }

    async fn save_snapshot(
        &self,
        id: Uuid,
        snapshot: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let query = format!("id=eq.{}", id);
        Ok(self
            .client
            .update(MATCHES, &query, &SnapshotPatch { snapshot })
            .await?)
    }

    async fn archive_set(&self, set: &ArchivedSet) -> Result<(), StoreError> {
        Ok(self
            .client
            .upsert(MATCH_SETS, set, "match_id,set_number")
            .await?)
    }

    async fn record_result(&self, id: Uuid, result: &FinalResult) -> Result<(), StoreError> {
        let query = format!("id=eq.{}", id);
        let patch = ResultPatch {
            status: MatchStatus::Finished,
            score: result.score,
            winner_team: result.winner_team,
            finish_reason: result.reason,
            finished_at: result.finished_at,
        };
        Ok(self.client.update(MATCHES, &query, &patch).await?)
    }
}

/// Row of `team_starters`
#[derive(Debug, Serialize, Deserialize)]
struct StarterRow {
    team_id: Uuid,
    slot: u8,
    member_id: Uuid,
    name: String,
    role: Role,
    power: f64,
    #[serde(default = "eligible_default")]
    eligible: bool,
}

fn eligible_default() -> bool {
    true
}

/// Roster directory backed by the `team_starters` table
#[derive(Clone)]
pub struct SupabaseRosterDirectory {
    client: SupabaseClient,
}

impl SupabaseRosterDirectory {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RosterDirectory for SupabaseRosterDirectory {
    async fn starters(&self, team_id: Uuid) -> Result<Vec<RosterMember>, StoreError> {
        let query = format!("team_id=eq.{}&eligible=eq.true&order=slot.asc", team_id);
        let rows: Vec<StarterRow> = self.client.get(TEAM_STARTERS, &query).await?;
        Ok(rows
            .into_iter()
            .map(|row| RosterMember {
                id: row.member_id,
                name: row.name,
                role: row.role,
                power: row.power,
            })
            .collect())
    }

    async fn put_starters(
        &self,
        team_id: Uuid,
        starters: Vec<RosterMember>,
    ) -> Result<(), StoreError> {
        let rows = starter_rows(team_id, starters)?;
        let count = rows.len();

        // Write the new lineup before dropping old slots so a failure
        // never leaves the team without starters
        if !rows.is_empty() {
            self.client
                .upsert(TEAM_STARTERS, &rows, "team_id,slot")
                .await?;
        }
        let leftover = format!("team_id=eq.{}&slot=gte.{}", team_id, count);
        Ok(self.client.delete(TEAM_STARTERS, &leftover).await?)
    }
}

fn starter_rows(team_id: Uuid, starters: Vec<RosterMember>) -> Result<Vec<StarterRow>, StoreError> {
    let count = starters.len();
    starters
        .into_iter()
        .enumerate()
        .map(|(slot, member)| {
            let slot = u8::try_from(slot).map_err(|_| StoreError::TooManyStarters(count))?;
            Ok(StarterRow {
                team_id,
                slot,
                member_id: member.id,
                name: member.name,
                role: member.role,
                power: member.power,
                eligible: true,
            })
        })
        .collect()
}
