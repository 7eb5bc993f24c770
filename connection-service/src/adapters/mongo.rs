//! MongoDB adapter.
//!
//! Queries are JSON payloads naming a collection and a method. Filters,
//! documents and pipelines are read as extended JSON, so `{"$oid": ...}` and
//! `{"$date": ...}` work in filters.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, Credential, ServerAddress};
use mongodb::{Client, Collection, Database};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use common::errors::{AppError, AppResult};
use common::models::{
    BackendKind, BrowsePage, ColumnDescriptor, ConnectionConfig, DocumentMethod, PageRequest,
    ResultEnvelope, Row,
};

use super::{until_closed, BackendSession, Endpoint};

/// Documents sampled when inferring a collection's fields.
pub const STRUCTURE_SAMPLE_SIZE: i64 = 20;

const DEFAULT_DATABASE: &str = "test";
const DEFAULT_LIMIT: i64 = 100;

/// Payload accepted by [`MongoSession::execute`].
#[derive(Debug, Deserialize)]
struct DocumentPayload {
    collection: Option<String>,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    filter: Option<Value>,
    #[serde(default)]
    projection: Option<Value>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    pipeline: Vec<Value>,
    #[serde(default = "empty_object")]
    document: Value,
    #[serde(default)]
    documents: Vec<Value>,
    #[serde(default = "empty_object")]
    update: Value,
}

fn default_method() -> String {
    DocumentMethod::DEFAULT.to_string()
}

fn empty_object() -> Value {
    json!({})
}

pub struct MongoSession {
    client: Client,
    default_database: String,
    closed: CancellationToken,
}

impl MongoSession {
    pub async fn connect(
        config: &ConnectionConfig,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> AppResult<Self> {
        let uri = config.uri.as_deref().filter(|u| !u.trim().is_empty());
        let mut options = match uri {
            Some(uri) => ClientOptions::parse(uri)
                .await
                .map_err(|e| AppError::DatabaseConnection(e.to_string()))?,
            None => {
                let mut options = ClientOptions::default();
                options.credential = config.user.as_ref().map(|user| {
                    let mut credential = Credential::default();
                    credential.username = Some(user.clone());
                    credential.password = config.password.clone();
                    credential
                });
                options
            }
        };
        if endpoint.tunneled || uri.is_none() {
            options.hosts = vec![ServerAddress::Tcp {
                host: endpoint.host.clone(),
                port: Some(endpoint.port),
            }];
            options.direct_connection = Some(true);
        }
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);

        let client = Client::with_options(options)
            .map_err(|e| AppError::DatabaseConnection(e.to_string()))?;

        tokio::time::timeout(timeout, client.database("admin").run_command(doc! { "ping": 1 }))
            .await
            .map_err(|_| {
                AppError::DatabaseConnection(format!(
                    "timed out reaching {}:{} after {}s",
                    endpoint.host,
                    endpoint.port,
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::DatabaseConnection(e.to_string()))?;

        tracing::info!(id = %config.id, host = %endpoint.host, port = endpoint.port, "MongoDB connected");
        Ok(Self {
            client,
            default_database: config
                .database
                .clone()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            closed: CancellationToken::new(),
        })
    }

    fn database(&self, name: Option<&str>) -> Database {
        let name = name.filter(|n| !n.is_empty()).unwrap_or(&self.default_database);
        self.client.database(name)
    }

    fn collection(&self, database: Option<&str>, name: &str) -> Collection<Document> {
        self.database(database).collection(name)
    }
}

fn query_error(e: mongodb::error::Error) -> AppError {
    AppError::DatabaseQuery(e.to_string())
}

/// Converts extended JSON into a BSON document.
fn to_document(value: Value, what: &str) -> AppResult<Document> {
    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(_) => Err(AppError::MalformedPayload(format!("{} must be an object", what))),
        Err(e) => Err(AppError::MalformedPayload(format!("invalid {}: {}", what, e))),
    }
}

/// BSON to plain JSON. ObjectIds and dates become strings.
pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .map(Value::String)
            .unwrap_or_else(|_| Value::String(dt.to_string())),
        Bson::Document(doc) => Value::Object(document_to_row(doc)),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Null => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::from(i),
        Bson::Int64(i) => Value::from(i),
        Bson::String(s) => Value::String(s),
        Bson::Decimal128(d) => Value::String(d.to_string()),
        other => other.into_relaxed_extjson(),
    }
}

fn document_to_row(doc: Document) -> Row {
    doc.into_iter().map(|(k, v)| (k, bson_to_json(v))).collect()
}

fn id_to_string(id: Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s,
        other => bson_to_json(other).to_string(),
    }
}

/// Short type name of a BSON value, as used in `$type` queries.
fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binData",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::Int32(_) => "int",
        Bson::Timestamp(_) => "timestamp",
        Bson::Int64(_) => "long",
        Bson::Decimal128(_) => "decimal",
        _ => "other",
    }
}

/// Field list of a collection from sampled documents. Fields keep the order
/// in which they were first seen; each lists every observed type.
pub fn infer_structure(sample: &[Document]) -> Vec<ColumnDescriptor> {
    let mut order: Vec<String> = Vec::new();
    let mut types: HashMap<String, BTreeSet<&'static str>> = HashMap::new();

    for doc in sample {
        for (field, value) in doc {
            let seen = types.entry(field.clone()).or_insert_with(|| {
                order.push(field.clone());
                BTreeSet::new()
            });
            seen.insert(bson_type_name(value));
        }
    }

    order
        .into_iter()
        .map(|field| {
            let data_type = types
                .remove(&field)
                .unwrap_or_default()
                .into_iter()
                .collect::<Vec<_>>()
                .join("/");
            let key = if field == "_id" { "PRI" } else { "" };
            ColumnDescriptor::new(field, data_type, key)
        })
        .collect()
}

#[async_trait]
impl BackendSession for MongoSession {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn list_databases(&self) -> AppResult<Vec<String>> {
        until_closed(&self.closed, async {
            self.client.list_database_names().await.map_err(query_error)
        })
        .await
    }

    async fn list_tables(&self, database: &str) -> AppResult<Vec<String>> {
        until_closed(&self.closed, async {
            let mut names = self
                .database(Some(database))
                .list_collection_names()
                .await
                .map_err(query_error)?;
            names.sort();
            Ok(names)
        })
        .await
    }

    async fn get_structure(&self, database: &str, table: &str) -> AppResult<Vec<ColumnDescriptor>> {
        until_closed(&self.closed, async {
            let sample: Vec<Document> = self
                .collection(Some(database), table)
                .find(doc! {})
                .limit(STRUCTURE_SAMPLE_SIZE)
                .await
                .map_err(query_error)?
                .try_collect()
                .await
                .map_err(query_error)?;
            Ok(infer_structure(&sample))
        })
        .await
    }

    async fn browse(&self, database: &str, table: &str, page: PageRequest) -> AppResult<BrowsePage> {
        until_closed(&self.closed, self.browse_page(database, table, page)).await
    }

    async fn execute(&self, query: &str, database: Option<&str>) -> AppResult<ResultEnvelope> {
        let payload: DocumentPayload = serde_json::from_str(query)
            .map_err(|e| AppError::MalformedPayload(e.to_string()))?;
        until_closed(&self.closed, self.run(payload, database)).await
    }

    /// Interrupts operations in flight, then shuts the client down without
    /// waiting for checked-out connections.
    async fn close(&self) -> AppResult<()> {
        self.closed.cancel();
        self.client.clone().shutdown().immediate(true).await;
        Ok(())
    }
}

impl MongoSession {
    async fn browse_page(&self, database: &str, table: &str, page: PageRequest) -> AppResult<BrowsePage> {
        let collection = self.collection(Some(database), table);
        let total = collection
            .estimated_document_count()
            .await
            .map_err(query_error)?;
        let docs: Vec<Document> = collection
            .find(doc! {})
            .skip(page.offset())
            .limit(i64::try_from(page.page_size).unwrap_or(i64::MAX))
            .await
            .map_err(query_error)?
            .try_collect()
            .await
            .map_err(query_error)?;

        Ok(BrowsePage {
            rows: docs.into_iter().map(document_to_row).collect(),
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn run(&self, payload: DocumentPayload, database: Option<&str>) -> AppResult<ResultEnvelope> {
        let method: DocumentMethod = payload.method.parse()?;
        let collection_name = payload
            .collection
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AppError::MalformedPayload("collection is required".into()))?;
        let collection = self.collection(database, &collection_name);
        let filter = match payload.filter {
            Some(filter) => to_document(filter, "filter")?,
            None => Document::new(),
        };

        tracing::debug!(collection = %collection_name, method = %payload.method, "Executing document query");

        let envelope = match method {
            DocumentMethod::Find => {
                let mut find = collection
                    .find(filter)
                    .limit(payload.limit.unwrap_or(DEFAULT_LIMIT));
                if let Some(projection) = payload.projection {
                    find = find.projection(to_document(projection, "projection")?);
                }
                let docs: Vec<Document> = find
                    .await
                    .map_err(query_error)?
                    .try_collect()
                    .await
                    .map_err(query_error)?;
                ResultEnvelope::from_rows(docs.into_iter().map(document_to_row).collect())
            }
            DocumentMethod::Count => {
                let count = collection.count_documents(filter).await.map_err(query_error)?;
                let mut row = Row::new();
                row.insert("count".to_string(), json!(count));
                ResultEnvelope::with_columns(vec!["count".to_string()], vec![row])
            }
            DocumentMethod::Aggregate => {
                let pipeline = payload
                    .pipeline
                    .into_iter()
                    .map(|stage| to_document(stage, "pipeline stage"))
                    .collect::<AppResult<Vec<_>>>()?;
                let docs: Vec<Document> = collection
                    .aggregate(pipeline)
                    .await
                    .map_err(query_error)?
                    .try_collect()
                    .await
                    .map_err(query_error)?;
                ResultEnvelope::from_rows(docs.into_iter().map(document_to_row).collect())
            }
            DocumentMethod::InsertOne => {
                let document = to_document(payload.document, "document")?;
                let result = collection.insert_one(document).await.map_err(query_error)?;
                ResultEnvelope::Write {
                    affected_rows: 1,
                    inserted_id: Some(id_to_string(result.inserted_id)),
                    result: None,
                }
            }
            DocumentMethod::InsertMany => {
                let documents = payload
                    .documents
                    .into_iter()
                    .map(|d| to_document(d, "document"))
                    .collect::<AppResult<Vec<_>>>()?;
                let result = collection.insert_many(documents).await.map_err(query_error)?;
                ResultEnvelope::affected(result.inserted_ids.len() as u64)
            }
            DocumentMethod::UpdateOne | DocumentMethod::UpdateMany => {
                let update = to_document(payload.update, "update")?;
                let result = if method == DocumentMethod::UpdateOne {
                    collection.update_one(filter, update).await
                } else {
                    collection.update_many(filter, update).await
                }
                .map_err(query_error)?;
                ResultEnvelope::affected(result.modified_count)
            }
            DocumentMethod::DeleteOne | DocumentMethod::DeleteMany => {
                let result = if method == DocumentMethod::DeleteOne {
                    collection.delete_one(filter).await
                } else {
                    collection.delete_many(filter).await
                }
                .map_err(query_error)?;
                ResultEnvelope::affected(result.deleted_count)
            }
        };
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    #[test]
    fn test_infer_structure_unions_types_in_first_seen_order() {
        let sample = vec![
            doc! { "_id": ObjectId::new(), "name": "a", "age": 30 },
            doc! { "_id": ObjectId::new(), "age": "unknown", "tags": ["x"] },
            doc! { "_id": ObjectId::new(), "age": Bson::Null },
        ];
        let columns = infer_structure(&sample);

        let fields: Vec<_> = columns.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["_id", "name", "age", "tags"]);
        assert_eq!(columns[0].key, "PRI");
        assert_eq!(columns[0].data_type, "objectId");
        assert_eq!(columns[2].data_type, "int/null/string");
        assert_eq!(columns[2].key, "");
        assert_eq!(columns[3].data_type, "array");
    }

    #[test]
    fn test_infer_structure_of_empty_collection() {
        assert!(infer_structure(&[]).is_empty());
    }

    #[test]
    fn test_bson_to_json_renders_ids_and_dates_as_strings() {
        let oid = ObjectId::parse_str("65a1b2c3d4e5f60718293a4b").unwrap();
        let value = bson_to_json(Bson::Document(doc! {
            "_id": oid,
            "at": bson::DateTime::from_millis(0),
            "n": 3_i64,
            "nested": { "ok": true },
        }));
        assert_eq!(value["_id"], "65a1b2c3d4e5f60718293a4b");
        assert_eq!(value["at"], "1970-01-01T00:00:00Z");
        assert_eq!(value["n"], 3);
        assert_eq!(value["nested"]["ok"], true);
    }

    #[test]
    fn test_extended_json_filter_is_parsed() {
        let filter = to_document(json!({"_id": {"$oid": "65a1b2c3d4e5f60718293a4b"}}), "filter").unwrap();
        assert!(matches!(filter.get("_id"), Some(Bson::ObjectId(_))));
    }

    #[test]
    fn test_non_object_filter_is_malformed() {
        let err = to_document(json!([1, 2]), "filter").unwrap_err();
        assert!(matches!(err, AppError::MalformedPayload(_)));
    }

    #[test]
    fn test_payload_defaults() {
        let payload: DocumentPayload = serde_json::from_str(r#"{"collection":"users"}"#).unwrap();
        assert_eq!(payload.method, "find");
        assert!(payload.filter.is_none());
        assert!(payload.limit.is_none());
        assert!(payload.pipeline.is_empty());
        assert!(payload.documents.is_empty());
        assert_eq!(payload.document, json!({}));
        assert_eq!(payload.update, json!({}));
    }

    #[test]
    fn test_aggregate_without_pipeline_is_accepted() {
        let payload: DocumentPayload =
            serde_json::from_str(r#"{"collection":"users","method":"aggregate"}"#).unwrap();
        assert!(payload.pipeline.is_empty());
        assert!(payload.method.parse::<DocumentMethod>().is_ok());
    }

    #[test]
    fn test_insert_one_without_document_inserts_empty_document() {
        let payload: DocumentPayload =
            serde_json::from_str(r#"{"collection":"users","method":"insertOne"}"#).unwrap();
        let document = to_document(payload.document, "document").unwrap();
        assert!(document.is_empty());
    }
}
