//! PostgREST gateway over HTTP.
//!
//! Talks to `{base}/rest/v1/{table}` and `{base}/rest/v1/rpc/{function}`.
//! Realtime delivery rides a separate websocket transport and is not
//! provided here.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_RANGE};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::gateway::Gateway;
use crate::query::{Embed, Filter, Order, Row, Select, Table};

const PREFER: &str = "Prefer";

/// Connection settings for [`RestGateway`].
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    /// Public anon key, sent as `apikey`.
    pub api_key: String,
    /// Session token; falls back to the anon key for the bearer header.
    pub access_token: Option<String>,
}

pub struct RestGateway {
    client: Client,
    config: RestConfig,
}

impl RestGateway {
    pub fn new(config: RestConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn root(&self) -> String {
        format!("{}/rest/v1", self.config.base_url.trim_end_matches('/'))
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/{}", self.root(), table.name())
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rpc/{function}", self.root())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.api_key);
        request
            .header("apikey", &self.config.api_key)
            .bearer_auth(bearer)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let resp = self.authorize(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), %message, "backend request failed");
            return Err(StoreError::Backend {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl Gateway for RestGateway {
    async fn select(&self, query: &Select) -> Result<Vec<Row>> {
        let request = self
            .client
            .get(self.table_url(query.table))
            .query(&select_params(query));
        Ok(self.send(request).await?.json().await?)
    }

    async fn insert(&self, table: Table, row: Row, embeds: &[Embed]) -> Result<Row> {
        let select = Select::from(table).embeds(embeds);
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("select", select.select_clause())])
            .header(PREFER, "return=representation")
            .json(&row);
        let rows: Vec<Row> = self.send(request).await?.json().await?;
        rows.into_iter().next().ok_or(StoreError::NotFound)
    }

    async fn update(&self, table: Table, filter: &Filter, patch: Row) -> Result<Vec<Row>> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&filter.to_query_pairs())
            .header(PREFER, "return=representation")
            .json(&patch);
        Ok(self.send(request).await?.json().await?)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<u64> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&filter.to_query_pairs())
            .header(PREFER, "return=minimal,count=exact");
        let resp = self.send(request).await?;
        Ok(content_range_total(resp.headers()).unwrap_or(0))
    }

    async fn count(&self, table: Table, filter: &Filter) -> Result<u64> {
        let mut params = vec![("select".to_string(), "id".to_string())];
        params.extend(filter.to_query_pairs());
        let request = self
            .client
            .head(self.table_url(table))
            .query(&params)
            .header(PREFER, "count=exact");
        let resp = self.send(request).await?;
        content_range_total(resp.headers()).ok_or_else(|| StoreError::Backend {
            status: resp.status().as_u16(),
            message: "response carried no row count".to_string(),
        })
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value> {
        let request = self.client.post(self.rpc_url(function)).json(&args);
        let body = self.send(request).await?.bytes().await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Query parameters for a read: `select`, filters, `order`, `limit`.
fn select_params(query: &Select) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), query.select_clause())];
    if let Some(filter) = &query.filter {
        params.extend(filter.to_query_pairs());
    }
    if let Some(order) = order_param(&query.order) {
        params.push(("order".to_string(), order));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

fn order_param(order: &[Order]) -> Option<String> {
    if order.is_empty() {
        return None;
    }
    Some(
        order
            .iter()
            .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Total from a `Content-Range` header such as `0-24/310` or `*/0`.
fn content_range_total(headers: &HeaderMap<HeaderValue>) -> Option<u64> {
    let raw = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    parse_content_range(raw)
}

fn parse_content_range(raw: &str) -> Option<u64> {
    raw.rsplit_once('/')?.1.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(base: &str) -> RestGateway {
        RestGateway::new(RestConfig {
            base_url: base.to_string(),
            api_key: "anon".to_string(),
            access_token: None,
        })
    }

    #[test]
    fn urls_ignore_trailing_slash() {
        let g = gateway("http://localhost:54321/");
        assert_eq!(
            g.table_url(Table::Messages),
            "http://localhost:54321/rest/v1/messages"
        );
        assert_eq!(
            g.rpc_url("mark_messages_as_seen"),
            "http://localhost:54321/rest/v1/rpc/mark_messages_as_seen"
        );
    }

    #[test]
    fn content_range_parsing() {
        assert_eq!(parse_content_range("0-24/310"), Some(310));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-24/*"), None);
        assert_eq!(parse_content_range("garbage"), None);
    }

    #[test]
    fn select_params_render_order_and_limit() {
        let query = Select::from(Table::Posts)
            .filter(Filter::eq("user_id", "u1"))
            .order_by("created_at", false)
            .limit(20);
        assert_eq!(
            select_params(&query),
            vec![
                ("select".to_string(), "*".to_string()),
                ("user_id".to_string(), "eq.u1".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "20".to_string()),
            ]
        );
    }
}
