mod support;

use common::errors::AppError;
use common::models::{ExecuteOutcome, PageRequest, ResultEnvelope};
use connection_service::dispatcher::QueryDispatcher;
use support::{es_request, mongo_request, mysql_request, Harness};

async fn connected(h: &Harness, req: common::models::ConnectionRequest) -> String {
    let saved = h.registry.upsert(req).await.unwrap();
    h.registry.connect(&saved.id).await.unwrap();
    saved.id
}

#[tokio::test]
async fn unconfirmed_write_never_reaches_adapter() {
    let h = Harness::new();
    let id = connected(&h, mysql_request("shop")).await;
    let dispatcher = QueryDispatcher::new(h.registry.clone());

    let outcome = dispatcher
        .execute(&id, "DELETE FROM orders WHERE id = 7", None, false)
        .await
        .unwrap();

    match outcome {
        ExecuteOutcome::NeedsConfirmation(req) => {
            assert!(req.needs_confirmation);
            assert_eq!(req.query, "DELETE FROM orders WHERE id = 7");
        }
        other => panic!("expected confirmation request, got {other:?}"),
    }
    assert_eq!(h.connector.log.count("execute"), 0);
}

#[tokio::test]
async fn unconfirmed_write_is_gated_even_when_inactive() {
    let h = Harness::new();
    let saved = h.registry.upsert(mysql_request("idle")).await.unwrap();
    let dispatcher = QueryDispatcher::new(h.registry.clone());

    let outcome = dispatcher
        .execute(&saved.id, "DROP TABLE users", None, false)
        .await
        .unwrap();

    assert!(matches!(outcome, ExecuteOutcome::NeedsConfirmation(_)));
}

#[tokio::test]
async fn confirmed_write_reaches_adapter_once() {
    let h = Harness::new();
    let id = connected(&h, mysql_request("shop")).await;
    let dispatcher = QueryDispatcher::new(h.registry.clone());

    let outcome = dispatcher
        .execute(&id, "UPDATE users SET name = 'x'", Some("shop"), true)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ExecuteOutcome::Completed(ResultEnvelope::affected(1))
    );
    assert_eq!(
        h.connector.log.all(),
        vec!["execute:shop:UPDATE users SET name = 'x'".to_string()]
    );
}

#[tokio::test]
async fn read_runs_without_confirmation() {
    let h = Harness::new();
    let id = connected(&h, mysql_request("shop")).await;
    let dispatcher = QueryDispatcher::new(h.registry.clone());

    let outcome = dispatcher.execute(&id, "SELECT 1", None, false).await.unwrap();

    match outcome {
        ExecuteOutcome::Completed(ResultEnvelope::Rows { columns, rowcount, .. }) => {
            assert_eq!(columns, vec!["n".to_string()]);
            assert_eq!(rowcount, 1);
        }
        other => panic!("expected rows, got {other:?}"),
    }
}

#[tokio::test]
async fn document_write_method_is_gated() {
    let h = Harness::new();
    let id = connected(&h, mongo_request("docs")).await;
    let dispatcher = QueryDispatcher::new(h.registry.clone());

    let query = r#"{"collection": "users", "method": "deleteMany", "filter": {}}"#;
    let outcome = dispatcher.execute(&id, query, Some("app"), false).await.unwrap();

    assert!(matches!(outcome, ExecuteOutcome::NeedsConfirmation(_)));
    assert_eq!(h.connector.log.count("execute"), 0);
}

#[tokio::test]
async fn search_read_passes_through() {
    let h = Harness::new();
    let id = connected(&h, es_request("logs")).await;
    let dispatcher = QueryDispatcher::new(h.registry.clone());

    let query = r#"{"index": "logs-*", "method": "search"}"#;
    dispatcher.execute(&id, query, None, false).await.unwrap();

    assert_eq!(h.connector.log.count("execute"), 1);
}

#[tokio::test]
async fn classify_uses_backend_dialect() {
    let h = Harness::new();
    let sql = h.registry.upsert(mysql_request("shop")).await.unwrap();
    let es = h.registry.upsert(es_request("logs")).await.unwrap();
    let dispatcher = QueryDispatcher::new(h.registry.clone());

    assert!(dispatcher.classify(&sql.id, "insert into t values (1)").await.unwrap().is_write);
    assert!(!dispatcher.classify(&sql.id, "SELECT * FROM t").await.unwrap().is_write);
    assert!(dispatcher
        .classify(&es.id, r#"{"method": "index", "document": {}}"#)
        .await
        .unwrap()
        .is_write);
    assert!(!dispatcher.classify(&es.id, "not json").await.unwrap().is_write);
}

#[tokio::test]
async fn browse_page_two_skips_first_page() {
    let h = Harness::new();
    let id = connected(&h, mysql_request("shop")).await;
    let dispatcher = QueryDispatcher::new(h.registry.clone());

    let page = dispatcher
        .browse(&id, "shop", "orders", PageRequest::new(2, 10))
        .await
        .unwrap();

    assert_eq!(page.page, 2);
    assert_eq!(page.page_size, 10);
    assert_eq!(page.total, 42);
    assert_eq!(
        h.connector.log.all(),
        vec!["browse:shop.orders:offset=10:limit=10".to_string()]
    );
}

#[tokio::test]
async fn introspection_routes_to_session() {
    let h = Harness::new();
    let id = connected(&h, mysql_request("shop")).await;
    let dispatcher = QueryDispatcher::new(h.registry.clone());

    assert_eq!(dispatcher.list_databases(&id).await.unwrap(), vec!["shop", "analytics"]);
    assert_eq!(dispatcher.list_tables(&id, "shop").await.unwrap(), vec!["orders", "users"]);
    let columns = dispatcher.get_structure(&id, "shop", "orders").await.unwrap();
    assert_eq!(columns[0].key, "PRI");
    assert!(dispatcher.get_indexes(&id, "shop", "orders").await.unwrap().is_empty());

    let schemas = dispatcher.get_all_schemas(&id, "shop").await.unwrap();
    assert_eq!(schemas.len(), 2);
    assert_eq!(schemas[1].table, "users");
    assert_eq!(schemas[1].columns.len(), 2);
}

#[tokio::test]
async fn inactive_connection_is_not_connected() {
    let h = Harness::new();
    let saved = h.registry.upsert(mysql_request("idle")).await.unwrap();
    let dispatcher = QueryDispatcher::new(h.registry.clone());

    let err = dispatcher.execute(&saved.id, "SELECT 1", None, false).await.unwrap_err();
    assert!(matches!(err, AppError::NotConnected(_)));

    let err = dispatcher.list_databases(&saved.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotConnected(_)));
}

#[tokio::test]
async fn unknown_connection_is_not_found() {
    let h = Harness::new();
    let dispatcher = QueryDispatcher::new(h.registry.clone());

    let err = dispatcher.execute("ghost", "SELECT 1", None, true).await.unwrap_err();
    assert!(matches!(err, AppError::ConnectionNotFound(_)));

    let err = dispatcher.classify("ghost", "SELECT 1").await.unwrap_err();
    assert!(matches!(err, AppError::ConnectionNotFound(_)));
}

#[tokio::test]
async fn session_is_gone_after_disconnect() {
    let h = Harness::new();
    let id = connected(&h, mysql_request("shop")).await;
    let dispatcher = QueryDispatcher::new(h.registry.clone());
    h.registry.disconnect(&id).await;

    let err = dispatcher.browse(&id, "shop", "orders", PageRequest::default()).await.unwrap_err();
    assert!(matches!(err, AppError::NotConnected(_)));
}
