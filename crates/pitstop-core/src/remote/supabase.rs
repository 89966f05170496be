//! Supabase (PostgREST) document store
//!
//! One row per user in a table with columns `id` (text primary key) and
//! `data` (jsonb holding the garage).

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::models::Garage;

use super::store::{DocumentStore, RemoteError, RemoteResult};

#[derive(Clone)]
pub struct SupabaseStore {
    table_url: String,
    anon_key: String,
    client: Client,
}

#[derive(Serialize)]
struct UpsertRow<'a> {
    id: &'a str,
    data: &'a Garage,
}

#[derive(Deserialize)]
struct DataRow {
    data: Option<Garage>,
}

impl SupabaseStore {
    pub fn new(url: &str, anon_key: &str, table: &str) -> RemoteResult<Self> {
        let base = normalize_base_url(url)?;
        let anon_key = anon_key.trim().to_string();
        if anon_key.is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "Supabase anon key must not be empty",
            ));
        }
        let table = table.trim();
        if table.is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "Remote table name must not be empty",
            ));
        }

        Ok(Self {
            table_url: format!("{}/rest/v1/{}", base, table),
            anon_key,
            client: Client::builder().build()?,
        })
    }

    pub fn table_url(&self) -> &str {
        &self.table_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
    }

    fn id_filter(id: &str) -> [(&'static str, String); 1] {
        [("id", format!("eq.{}", id))]
    }
}

#[async_trait]
impl DocumentStore for SupabaseStore {
    async fn upsert(&self, id: &str, data: &Garage) -> RemoteResult<()> {
        let request = self
            .authorized(self.client.post(&self.table_url))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&UpsertRow { id, data });
        check_status(request.send().await?).await?;
        tracing::debug!(user_id = id, cars = data.len(), "Upserted garage to Supabase");
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> RemoteResult<Option<Garage>> {
        let request = self
            .authorized(self.client.get(&self.table_url))
            .header("Accept", "application/json")
            .query(&Self::id_filter(id))
            .query(&[("select", "data")]);
        let response = check_status(request.send().await?).await?;
        let body = response.text().await?;
        decode_rows(&body)
    }

    async fn delete_by_id(&self, id: &str) -> RemoteResult<()> {
        let request = self
            .authorized(self.client.delete(&self.table_url))
            .query(&Self::id_filter(id));
        check_status(request.send().await?).await?;
        tracing::debug!(user_id = id, "Deleted garage from Supabase");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "supabase"
    }
}

async fn check_status(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Api {
        status: status.as_u16(),
        message: parse_api_error(status, &body),
    })
}

/// First row's `data`, if any row matched
fn decode_rows(body: &str) -> RemoteResult<Option<Garage>> {
    let rows: Vec<DataRow> = serde_json::from_str(body)?;
    Ok(rows.into_iter().next().and_then(|row| row.data))
}

fn normalize_base_url(url: &str) -> RemoteResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(RemoteError::InvalidConfiguration(
            "Supabase URL must not be empty",
        ));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(RemoteError::InvalidConfiguration(
            "Supabase URL must include http:// or https://",
        ));
    }
    Ok(trimmed.trim_end_matches("/rest/v1").to_string())
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorResponse {
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorResponse>(body) {
        if let Some(message) = payload.message.or(payload.details).or(payload.hint) {
            return message.trim().to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed.to_string()
    }
}
