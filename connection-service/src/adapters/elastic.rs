//! Elasticsearch adapter over the REST API.
//!
//! Elasticsearch has no databases; the single pseudo-database `_all` stands in
//! for the whole cluster and indices play the role of tables.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use common::errors::{AppError, AppResult};
use common::models::{
    BackendKind, BrowsePage, ColumnDescriptor, ConnectionConfig, PageRequest, ResultEnvelope, Row,
    SearchMethod,
};

use super::{until_closed, BackendSession, Endpoint};

/// Pseudo-database name covering every index.
pub const ALL_INDICES: &str = "_all";

#[derive(Debug, Deserialize)]
struct SearchPayload {
    #[serde(default = "default_index")]
    index: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    document: Option<Value>,
    /// String or number; numbers are used in their decimal form.
    #[serde(default)]
    id: Option<Value>,
}

/// Document id from the payload. `null` counts as absent.
fn doc_id(id: Option<&Value>) -> AppResult<Option<String>> {
    match id {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id.clone())),
        Some(Value::Number(id)) => Ok(Some(id.to_string())),
        Some(other) => Err(AppError::MalformedPayload(format!(
            "id must be a string or a number, got {}",
            other
        ))),
    }
}

fn default_index() -> String {
    ALL_INDICES.to_string()
}

fn default_method() -> String {
    SearchMethod::DEFAULT.to_string()
}

fn match_all() -> Value {
    json!({ "query": { "match_all": {} } })
}

#[derive(Debug, Clone)]
enum Auth {
    None,
    Basic { user: String, password: Option<String> },
    ApiKey(String),
}

pub struct ElasticSession {
    http: reqwest::Client,
    base_url: Url,
    auth: Auth,
    closed: CancellationToken,
}

impl ElasticSession {
    pub async fn connect(
        config: &ConnectionConfig,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> AppResult<Self> {
        let scheme = config
            .scheme
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("http");
        let base_url = Url::parse(&format!("{}://{}:{}/", scheme, endpoint.host, endpoint.port))
            .map_err(|e| AppError::Validation(format!("invalid search endpoint: {}", e)))?;

        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .danger_accept_invalid_certs(!config.verify_certs.unwrap_or(true))
            .build()
            .map_err(|e| AppError::DatabaseConnection(e.to_string()))?;

        let auth = match (config.api_key.as_deref(), config.user.as_deref()) {
            (Some(key), _) if !key.is_empty() => Auth::ApiKey(key.to_string()),
            (_, Some(user)) if !user.is_empty() => Auth::Basic {
                user: user.to_string(),
                password: config.password.clone(),
            },
            _ => Auth::None,
        };

        let session = Self {
            http,
            base_url,
            auth,
            closed: CancellationToken::new(),
        };

        let ping = session.request(Method::GET, session.base_url.clone());
        let response = tokio::time::timeout(timeout, ping.send())
            .await
            .map_err(|_| {
                AppError::DatabaseConnection(format!(
                    "timed out reaching {} after {}s",
                    session.base_url,
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::DatabaseConnection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AppError::DatabaseConnection(format!(
                "{} answered {}",
                session.base_url,
                response.status()
            )));
        }

        tracing::info!(id = %config.id, url = %session.base_url, "Elasticsearch connected");
        Ok(session)
    }

    fn url(&self, segments: &[&str]) -> AppResult<Url> {
        build_url(&self.base_url, segments)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.auth {
            Auth::None => builder,
            Auth::Basic { user, password } => builder.basic_auth(user, password.as_ref()),
            Auth::ApiKey(key) => builder.header(reqwest::header::AUTHORIZATION, format!("ApiKey {}", key)),
        }
    }

    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> AppResult<Value> {
        let mut builder = self.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| AppError::DatabaseQuery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::DatabaseQuery(format!("{}: {}", status.as_u16(), text)));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| AppError::DatabaseQuery(e.to_string()))
    }

    async fn search(&self, index: &str, body: &Value) -> AppResult<Value> {
        self.send(Method::POST, self.url(&[index, "_search"])?, Some(body))
            .await
    }
}

/// Appends percent-encoded path segments to `base`.
fn build_url(base: &Url, segments: &[&str]) -> AppResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| AppError::Internal(format!("{} cannot carry a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// `_source` of every hit, with `_id` first.
pub fn hits_to_rows(response: &Value) -> Vec<Row> {
    response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .map(|hit| {
                    let mut row = Map::new();
                    row.insert(
                        "_id".to_string(),
                        hit.get("_id").cloned().unwrap_or(Value::Null),
                    );
                    if let Some(Value::Object(source)) = hit.get("_source") {
                        row.extend(source.clone());
                    }
                    row
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Hit count, reported either as a number or as `{"value": n, ...}`.
pub fn normalize_total(response: &Value) -> u64 {
    match response.pointer("/hits/total") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or_default(),
        Some(Value::Object(total)) => total
            .get("value")
            .and_then(Value::as_u64)
            .unwrap_or_default(),
        _ => 0,
    }
}

/// Index names from `_cat/indices`, hidden/system ones removed.
fn visible_indices(response: &Value) -> Vec<String> {
    let mut names: Vec<String> = response
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("index").and_then(Value::as_str))
                .filter(|name| !name.starts_with('.'))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Top-level fields of the first mapping in a `_mapping` response.
fn mapping_columns(response: &Value) -> Vec<ColumnDescriptor> {
    let properties = response
        .as_object()
        .and_then(|indices| indices.values().next())
        .and_then(|index| index.pointer("/mappings/properties"))
        .and_then(Value::as_object);

    properties
        .map(|props| {
            props
                .iter()
                .map(|(field, definition)| {
                    let data_type = definition
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("object");
                    ColumnDescriptor::new(field.clone(), data_type, "")
                })
                .collect()
        })
        .unwrap_or_default()
}

fn browse_body(page: PageRequest) -> Value {
    json!({
        "query": { "match_all": {} },
        "from": page.offset(),
        "size": page.page_size,
    })
}

fn write_result(response: &Value) -> ResultEnvelope {
    ResultEnvelope::Write {
        affected_rows: 1,
        inserted_id: None,
        result: response
            .get("result")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

#[async_trait]
impl BackendSession for ElasticSession {
    fn kind(&self) -> BackendKind {
        BackendKind::Search
    }

    async fn list_databases(&self) -> AppResult<Vec<String>> {
        Ok(vec![ALL_INDICES.to_string()])
    }

    async fn list_tables(&self, _database: &str) -> AppResult<Vec<String>> {
        let mut url = self.url(&["_cat", "indices"])?;
        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("h", "index");
        let response = until_closed(&self.closed, self.send(Method::GET, url, None)).await?;
        Ok(visible_indices(&response))
    }

    async fn get_structure(&self, _database: &str, table: &str) -> AppResult<Vec<ColumnDescriptor>> {
        let url = self.url(&[table, "_mapping"])?;
        let response = until_closed(&self.closed, self.send(Method::GET, url, None)).await?;
        Ok(mapping_columns(&response))
    }

    async fn browse(&self, _database: &str, table: &str, page: PageRequest) -> AppResult<BrowsePage> {
        let body = browse_body(page);
        let response = until_closed(&self.closed, self.search(table, &body)).await?;
        Ok(BrowsePage {
            rows: hits_to_rows(&response),
            total: normalize_total(&response),
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn execute(&self, query: &str, _database: Option<&str>) -> AppResult<ResultEnvelope> {
        let payload: SearchPayload = serde_json::from_str(query)
            .map_err(|e| AppError::MalformedPayload(e.to_string()))?;
        until_closed(&self.closed, self.run(payload)).await
    }

    /// Abandons requests in flight. The HTTP client holds no session state.
    async fn close(&self) -> AppResult<()> {
        self.closed.cancel();
        Ok(())
    }
}

impl ElasticSession {
    async fn run(&self, payload: SearchPayload) -> AppResult<ResultEnvelope> {
        let method: SearchMethod = payload.method.parse()?;
        let id = doc_id(payload.id.as_ref())?;
        let index = payload.index.as_str();

        tracing::debug!(index, method = %payload.method, "Executing search query");

        match method {
            SearchMethod::Search => {
                let body = payload.body.unwrap_or_else(match_all);
                let response = self.search(index, &body).await?;
                let rows = hits_to_rows(&response);
                let columns = rows
                    .first()
                    .map(|row| row.keys().cloned().collect())
                    .unwrap_or_default();
                Ok(ResultEnvelope::Rows {
                    columns,
                    rowcount: rows.len(),
                    rows,
                    total: Some(normalize_total(&response)),
                })
            }
            SearchMethod::Index => {
                let document = payload
                    .document
                    .ok_or_else(|| AppError::MalformedPayload("document is required".into()))?;
                let response = match id.as_deref() {
                    Some(id) => {
                        self.send(Method::PUT, self.url(&[index, "_doc", id])?, Some(&document))
                            .await?
                    }
                    None => {
                        self.send(Method::POST, self.url(&[index, "_doc"])?, Some(&document))
                            .await?
                    }
                };
                let mut envelope = write_result(&response);
                if let ResultEnvelope::Write { inserted_id, .. } = &mut envelope {
                    *inserted_id = response.get("_id").and_then(Value::as_str).map(str::to_string);
                }
                Ok(envelope)
            }
            SearchMethod::Delete => {
                let id = id.ok_or_else(|| AppError::MalformedPayload("id is required for delete".into()))?;
                let response = self
                    .send(Method::DELETE, self.url(&[index, "_doc", id.as_str()])?, None)
                    .await?;
                Ok(write_result(&response))
            }
            SearchMethod::Update => {
                let id = id.ok_or_else(|| AppError::MalformedPayload("id is required for update".into()))?;
                let body = json!({ "doc": payload.document.unwrap_or_else(|| json!({})) });
                let response = self
                    .send(Method::POST, self.url(&[index, "_update", id.as_str()])?, Some(&body))
                    .await?;
                Ok(write_result(&response))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hits_put_id_first_and_merge_source() {
        let response = json!({
            "hits": {
                "total": { "value": 42, "relation": "eq" },
                "hits": [
                    { "_id": "a1", "_source": { "title": "x", "views": 3 } },
                    { "_id": "a2", "_source": { "title": "y" } }
                ]
            }
        });
        let rows = hits_to_rows(&response);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].keys().next().map(String::as_str), Some("_id"));
        assert_eq!(rows[0]["views"], 3);
        assert_eq!(rows[1]["_id"], "a2");
        assert_eq!(normalize_total(&response), 42);
    }

    #[test]
    fn test_total_as_plain_number() {
        let response = json!({ "hits": { "total": 7, "hits": [] } });
        assert_eq!(normalize_total(&response), 7);
        assert!(hits_to_rows(&response).is_empty());
    }

    #[test]
    fn test_hidden_indices_are_skipped() {
        let response = json!([{ "index": "logs" }, { "index": ".kibana" }, { "index": "audit" }]);
        assert_eq!(visible_indices(&response), vec!["audit", "logs"]);
    }

    #[test]
    fn test_mapping_defaults_to_object() {
        let response = json!({
            "logs": { "mappings": { "properties": {
                "message": { "type": "text" },
                "geo": { "properties": { "lat": { "type": "float" } } }
            } } }
        });
        let columns = mapping_columns(&response);
        let geo = columns.iter().find(|c| c.field == "geo").unwrap();
        assert_eq!(geo.data_type, "object");
        let message = columns.iter().find(|c| c.field == "message").unwrap();
        assert_eq!(message.data_type, "text");
    }

    #[test]
    fn test_url_segments_are_encoded() {
        let base = Url::parse("http://127.0.0.1:9200/").unwrap();
        let url = build_url(&base, &["logs", "_doc", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9200/logs/_doc/a%2Fb%20c");
    }

    #[test]
    fn test_browse_body_offsets_by_page() {
        let body = browse_body(PageRequest::new(2, 10));
        assert_eq!(body["from"], 10);
        assert_eq!(body["size"], 10);
    }

    #[test]
    fn test_payload_defaults() {
        let payload: SearchPayload = serde_json::from_str("{}").unwrap();
        assert_eq!(payload.index, "_all");
        assert_eq!(payload.method, "search");
        assert!(payload.body.is_none());
        assert_eq!(doc_id(payload.id.as_ref()).unwrap(), None);
    }

    #[test]
    fn test_numeric_id_is_used_as_decimal_string() {
        let payload: SearchPayload =
            serde_json::from_str(r#"{"index":"logs","method":"delete","id":5}"#).unwrap();
        assert_eq!(doc_id(payload.id.as_ref()).unwrap().as_deref(), Some("5"));
    }

    #[test]
    fn test_string_and_null_ids() {
        assert_eq!(doc_id(Some(&json!("a1"))).unwrap().as_deref(), Some("a1"));
        assert_eq!(doc_id(Some(&Value::Null)).unwrap(), None);
    }

    #[test]
    fn test_structured_id_is_malformed() {
        let err = doc_id(Some(&json!({"a": 1}))).unwrap_err();
        assert!(matches!(err, AppError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_requests() {
        let session = ElasticSession {
            http: reqwest::Client::new(),
            base_url: Url::parse("http://127.0.0.1:1/").unwrap(),
            auth: Auth::None,
            closed: CancellationToken::new(),
        };
        session.close().await.unwrap();
        let err = session.execute("{}", None).await.unwrap_err();
        assert!(matches!(err, AppError::DatabaseConnection(_)));
    }
}
