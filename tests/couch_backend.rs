//! HTTP backend tests against a mock document store

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use enclave_store::backend::{CouchBackend, Credentials, StorageBackend};
use enclave_store::collection::CollectionClient;
use enclave_store::query::{parse, SortSpec};
use enclave_store::{ConnectionManager, Document, EnclaveError, ReauthBackend};

fn backend(server: &MockServer) -> CouchBackend {
    CouchBackend::new(server.uri(), 5).expect("client builds")
}

fn session_response(cookie: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("set-cookie", format!("AuthSession={}; Version=1; Path=/; HttpOnly", cookie).as_str())
        .set_body_json(json!({"ok": true, "name": "hub", "roles": ["_admin"]}))
}

#[tokio::test]
async fn test_status_mapping() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/hub_cars"))
        .respond_with(
            ResponseTemplate::new(412)
                .set_body_json(json!({"error": "file_exists", "reason": "The database could not be created, the file already exists."})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hub_cars/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "not_found", "reason": "missing"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hub_ghost/a"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"error": "not_found", "reason": "Database does not exist."})),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/hub_cars/taken"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({"error": "conflict", "reason": "Document update conflict."})),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/hub_locked/a"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"error": "forbidden", "reason": "read-only"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_all_dbs"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = backend(&server);
    assert!(matches!(
        store.create_database("hub_cars").await,
        Err(EnclaveError::AlreadyExists(_))
    ));
    assert!(matches!(
        store.get_document("hub_cars", "missing").await,
        Err(EnclaveError::NotFound { .. })
    ));
    assert!(matches!(
        store.get_document("hub_ghost", "a").await,
        Err(EnclaveError::CollectionNotFound(_))
    ));
    assert!(matches!(
        store.put_document("hub_cars", "taken", &Document::new()).await,
        Err(EnclaveError::Conflict(_))
    ));
    assert!(matches!(
        store.put_document("hub_locked", "a", &Document::new()).await,
        Err(EnclaveError::ReadOnlyViolation(_))
    ));
    assert!(matches!(
        store.list_databases().await,
        Err(EnclaveError::Backend { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_find_request_and_missing_index() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hub_cars/_find"))
        .and(body_partial_json(json!({
            "selector": {"rentalPrice": {"$gte": 200}},
            "sort": [{"rentalPrice": "asc"}],
            "limit": 250,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "docs": [{"_id": "c", "_rev": "1-a", "rentalPrice": 220}],
            "bookmark": "nil",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hub_boats/_find"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "no_usable_index",
            "reason": "No index exists for this sort, try indexing by the sort fields.",
        })))
        .mount(&server)
        .await;

    let store = backend(&server);
    let query = parse(&["rentalPrice >= 200"], Some(SortSpec::asc("rentalPrice")), None).unwrap();
    let docs = store.find("hub_cars", &query).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["_id"], "c");

    assert!(matches!(
        store.find("hub_boats", &query).await,
        Err(EnclaveError::NoUsableIndex(_))
    ));
}

#[tokio::test]
async fn test_filter_adds_index_and_retries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hub_cars/_find"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "no_usable_index",
            "reason": "No index exists for this sort.",
        })))
        .with_priority(1)
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hub_cars/_index"))
        .and(body_partial_json(json!({"index": {"fields": ["model"]}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "created"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hub_cars/_find"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "docs": [{"_id": "a", "_rev": "2-b", "sys_timestamp": 7, "model": "Telsa"}],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store: Arc<dyn StorageBackend> = Arc::new(backend(&server));
    let manager = ConnectionManager::with_backend(store, None, false, "readonly");
    let cars: Arc<CollectionClient> = manager.open_database("hub_cars", false).await.unwrap();

    let docs = cars
        .filter(&["model == Telsa"], Some(SortSpec::asc("model")), None, 0)
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["pk"], "a");
    assert_eq!(docs[0]["timestamp"], 7);
    assert!(!docs[0].contains_key("_rev"));
}

#[tokio::test]
async fn test_create_collection_wire_sequence() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/hub_cars"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/hub_cars/_design/read_only_policy"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "ok": true, "id": "_design/read_only_policy", "rev": "1-a"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/hub_cars/_security"))
        .and(body_partial_json(json!({"members": {"names": ["readonly"]}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hub_cars/_index"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "created"})))
        .expect(2)
        .mount(&server)
        .await;

    let store: Arc<dyn StorageBackend> = Arc::new(backend(&server));
    let manager = ConnectionManager::with_backend(store, None, false, "readonly");
    manager.create_database("hub_cars", &["rentalPrice"]).await.unwrap();
}

#[tokio::test]
async fn test_delete_sends_revision() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/hub_cars/a"))
        .and(query_param("rev", "3-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    backend(&server)
        .delete_document("hub_cars", "a", "3-abc")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_session_cookie_is_sent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/_session"))
        .and(body_partial_json(json!({"name": "hub", "password": "pw"})))
        .respond_with(session_response("abc123"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_all_dbs"))
        .and(header("cookie", "AuthSession=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["hub_cars", "_users"])))
        .expect(1)
        .mount(&server)
        .await;

    let store = backend(&server);
    store.authenticate(&Credentials::new("hub", "pw")).await.unwrap();
    assert_eq!(
        store.list_databases().await.unwrap(),
        vec!["hub_cars".to_string(), "_users".to_string()]
    );
}

#[tokio::test]
async fn test_reauthentication_on_401() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_all_dbs"))
        .and(header("cookie", "AuthSession=fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["hub_cars"])))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_all_dbs"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "unauthorized", "reason": "You are not authorized to access this db."
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/_session"))
        .respond_with(session_response("fresh"))
        .expect(1)
        .mount(&server)
        .await;

    let store = ReauthBackend::new(Arc::new(backend(&server)), Some(Credentials::new("hub", "pw")));
    assert_eq!(store.list_databases().await.unwrap(), vec!["hub_cars".to_string()]);
}

#[tokio::test]
async fn test_second_401_is_auth_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/hub_cars"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "unauthorized", "reason": "Session expired"
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/_session"))
        .respond_with(session_response("fresh"))
        .expect(1)
        .mount(&server)
        .await;

    let store = ReauthBackend::new(Arc::new(backend(&server)), Some(Credentials::new("hub", "pw")));
    assert!(matches!(
        store.database_info("hub_cars").await,
        Err(EnclaveError::AuthFailure(_))
    ));
}

#[tokio::test]
async fn test_rejected_login_is_auth_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/_session"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "unauthorized", "reason": "Name or password is incorrect."
        })))
        .mount(&server)
        .await;

    let store = ReauthBackend::new(Arc::new(backend(&server)), None);
    assert!(matches!(
        store.authenticate(&Credentials::new("hub", "wrong")).await,
        Err(EnclaveError::AuthFailure(_))
    ));
}

#[tokio::test]
async fn test_refused_connection_is_fatal() {
    // Nothing listens on port 1
    let store = CouchBackend::new("http://127.0.0.1:1", 2).unwrap();
    let err = store.list_databases().await.unwrap_err();
    assert!(err.is_fatal(), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_count_excludes_design_documents() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/hub_cars"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "db_name": "hub_cars", "doc_count": 3, "doc_del_count": 0
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hub_cars/_all_docs"))
        .and(query_param("startkey", "\"_design/\""))
        .and(query_param("endkey", "\"_design0\""))
        .and(query_param("inclusive_end", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 3,
            "offset": 0,
            "rows": [
                {"id": "_design/a1b2", "key": "_design/a1b2", "value": {"rev": "1-a"}},
                {"id": "_design/read_only_policy", "key": "_design/read_only_policy", "value": {"rev": "1-b"}},
            ],
        })))
        .expect(2)
        .mount(&server)
        .await;

    let store: Arc<dyn StorageBackend> = Arc::new(backend(&server));
    assert_eq!(store.database_info("hub_cars").await.unwrap().doc_count, 1);

    let manager = ConnectionManager::with_backend(store, None, false, "readonly");
    let cars = manager.open_database("hub_cars", false).await.unwrap();
    assert_eq!(cars.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_first_record_skips_design_documents() {
    let server = MockServer::start().await;

    // Nothing sorts before the design documents here
    Mock::given(method("GET"))
        .and(path("/hub_cars/_all_docs"))
        .and(query_param("endkey", "\"_design/\""))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 2, "offset": 0, "rows": []
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hub_cars/_all_docs"))
        .and(query_param("startkey", "\"_design0\""))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 2,
            "offset": 1,
            "rows": [{
                "id": "a3f9", "key": "a3f9", "value": {"rev": "1-x"},
                "doc": {"_id": "a3f9", "_rev": "1-x", "sys_timestamp": 5, "model": "Telsa"},
            }],
        })))
        .expect(2)
        .mount(&server)
        .await;

    let store: Arc<dyn StorageBackend> = Arc::new(backend(&server));
    let manager = ConnectionManager::with_backend(store, None, false, "readonly");
    let cars = manager.open_database("hub_cars", false).await.unwrap();

    let first = cars.first().await.unwrap();
    assert_eq!(first["pk"], "a3f9");
    assert_eq!(first["model"], "Telsa");
    assert_eq!(cars.list(Some(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_stops_when_lower_range_fills_limit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/hub_cars/_all_docs"))
        .and(query_param("endkey", "\"_design/\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_rows": 4,
            "offset": 0,
            "rows": [{
                "id": "A1", "key": "A1", "value": {"rev": "1-x"},
                "doc": {"_id": "A1", "_rev": "1-x", "sys_timestamp": 1},
            }],
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hub_cars/_all_docs"))
        .and(query_param("startkey", "\"_design0\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": []})))
        .expect(0)
        .mount(&server)
        .await;

    let docs = backend(&server).all_documents("hub_cars", Some(1)).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["_id"], "A1");
}
