// Hand-crafted async HTTP client for the platform's row API.
//
// Base path: /rest/v1/
// Auth: `apikey` default header (injected by TransportConfig)
//
// The surface is PostgREST-shaped: one resource per table, `order=` for
// sorting, `column=eq.value` filters, `Prefer: return=representation`
// to get mutated rows back.

use reqwest::header::HeaderValue;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::Error;

/// A remote row: a flat JSON object keyed by column name.
///
/// Rows stay untyped at this layer. The core crate's transform layer is
/// the single place where column names and shapes are interpreted.
pub type Row = serde_json::Map<String, Value>;

// ── Error response shape from the row API ────────────────────────────

#[derive(serde::Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the platform's REST row surface.
///
/// Cheaply cloneable; the inner `reqwest::Client` is an `Arc` already.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RestClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build from a platform URL and a pre-configured HTTP client
    /// (service key already installed as a default header).
    pub fn new(platform_url: &Url, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = Self::normalize_base_url(platform_url)?;
        Ok(Self { http, base_url })
    }

    /// Wrap an existing `reqwest::Client` without header setup.
    /// Intended for tests that manage auth themselves.
    pub fn with_client(http: reqwest::Client, platform_url: &Url) -> Result<Self, Error> {
        Self::new(platform_url, http)
    }

    /// Build the base URL ending in `/rest/v1/`.
    fn normalize_base_url(raw: &Url) -> Result<Url, Error> {
        let mut url = raw.clone();
        let path = url.path().trim_end_matches('/').to_owned();

        if path.ends_with("/rest/v1") {
            url.set_path(&format!("{path}/"));
        } else {
            url.set_path(&format!("{path}/rest/v1/"));
        }

        Ok(url)
    }

    /// Join a table name onto the base URL.
    fn table_url(&self, table: &str) -> Url {
        // base_url always ends with `/rest/v1/`, so joining a bare table
        // name works.
        self.base_url
            .join(table)
            .unwrap_or_else(|_| self.base_url.clone())
    }

    // ── Row operations ───────────────────────────────────────────────

    /// Bulk read: every row of `table`, ordered by `order_field`.
    pub async fn select_all(
        &self,
        table: &str,
        order_field: &str,
        descending: bool,
    ) -> Result<Vec<Row>, Error> {
        let url = self.table_url(table);
        let direction = if descending { "desc" } else { "asc" };
        let order = format!("{order_field}.{direction}");
        debug!(%url, order, "GET rows");

        let resp = self
            .http
            .get(url)
            .query(&[("select", "*"), ("order", order.as_str())])
            .send()
            .await?;
        self.handle_response(resp).await
    }

    /// Insert one row; returns the created row as the server stored it
    /// (id and timestamps assigned).
    pub async fn insert(&self, table: &str, row: Row) -> Result<Row, Error> {
        let url = self.table_url(table);
        debug!(%url, "POST row");

        let resp = self
            .http
            .post(url)
            .header("Prefer", HeaderValue::from_static("return=representation"))
            .json(&Value::Object(row))
            .send()
            .await?;
        let rows: Vec<Row> = self.handle_response(resp).await?;
        rows.into_iter().next().ok_or_else(|| Error::Deserialization {
            message: "insert returned an empty representation".into(),
            body: String::new(),
        })
    }

    /// Update the given columns of the row with matching `id`.
    pub async fn update(&self, table: &str, id: &str, fields: Row) -> Result<Row, Error> {
        let url = self.table_url(table);
        debug!(%url, id, "PATCH row");

        let resp = self
            .http
            .patch(url)
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", HeaderValue::from_static("return=representation"))
            .json(&Value::Object(fields))
            .send()
            .await?;
        let rows: Vec<Row> = self.handle_response(resp).await?;
        rows.into_iter().next().ok_or_else(|| Error::Api {
            message: format!("no row with id {id}"),
            code: None,
            status: 404,
        })
    }

    /// Delete the row with matching `id`.
    pub async fn delete(&self, table: &str, id: &str) -> Result<(), Error> {
        let url = self.table_url(table);
        debug!(%url, id, "DELETE row");

        let resp = self
            .http
            .delete(url)
            .query(&[("id", format!("eq.{id}"))])
            .send()
            .await?;
        self.handle_empty(resp).await
    }

    // ── Response handling ────────────────────────────────────────────

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            serde_json::from_str(&body).map_err(|e| {
                let preview = &body[..body.len().min(200)];
                Error::Deserialization {
                    message: format!("{e} (body preview: {preview:?})"),
                    body,
                }
            })
        } else {
            Err(self.api_error(status, resp).await)
        }
    }

    async fn handle_empty(&self, resp: reqwest::Response) -> Result<(), Error> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.api_error(status, resp).await)
        }
    }

    /// Parse a non-2xx response into a structured API error.
    async fn api_error(&self, status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
        let body = resp.text().await.unwrap_or_default();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Error::Authentication {
                message: format!("platform rejected the service key (HTTP {status})"),
            };
        }

        let parsed: Option<ErrorResponse> = serde_json::from_str(&body).ok();
        let (message, code) = match parsed {
            Some(e) => (
                e.message.unwrap_or_else(|| format!("HTTP {status}")),
                e.code,
            ),
            None => (
                if body.is_empty() {
                    format!("HTTP {status}")
                } else {
                    body.chars().take(200).collect()
                },
                None,
            ),
        };

        Error::Api {
            message,
            code,
            status: status.as_u16(),
        }
    }
}
