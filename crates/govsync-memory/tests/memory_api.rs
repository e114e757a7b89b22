use govsync_api::{ApiError, ApiErrorKind, Filter, ListQuery, RemoteApi};
use govsync_memory::{InMemoryRemoteApi, Operation, RequestRoute};
use serde_json::json;

fn by_name(name: &str) -> ListQuery {
    ListQuery::filtered(Filter::eq("displayName", name))
}

#[tokio::test]
async fn test_created_object_is_listable_and_readable() {
    let api = InMemoryRemoteApi::new();
    let created = api
        .create("catalogs", &json!({"displayName": "Eng"}))
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    let rows = api.list("catalogs", &by_name("eng")).await.unwrap();
    assert_eq!(rows.len(), 1, "filtering is case-insensitive");
    assert_eq!(api.read("catalogs", id).await.unwrap().unwrap()["displayName"], "Eng");
}

#[tokio::test]
async fn test_visibility_lag_hides_new_objects() {
    let api = InMemoryRemoteApi::new().with_visibility_lag(2);
    let created = api
        .create("catalogs", &json!({"displayName": "Eng"}))
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    assert!(api.list("catalogs", &by_name("Eng")).await.unwrap().is_empty());
    assert_eq!(api.read("catalogs", id).await.unwrap(), None);
    assert!(api.list("catalogs", &by_name("Eng")).await.unwrap().is_empty());
    assert_eq!(api.list("catalogs", &by_name("Eng")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unique_key_conflicts_even_when_invisible() {
    let api = InMemoryRemoteApi::new()
        .with_visibility_lag(5)
        .with_unique_key("catalogs", &["displayName"]);
    api.create("catalogs", &json!({"displayName": "Eng"}))
        .await
        .unwrap();

    let err = api
        .create("catalogs", &json!({"displayName": "Eng"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Conflict);
    assert_eq!(err.code.as_deref(), Some("ResourceAlreadyExists"));
}

#[tokio::test]
async fn test_injected_faults_are_returned_once() {
    let api = InMemoryRemoteApi::new();
    api.fail_next(Operation::List, "catalogs", ApiError::throttled("slow down"));

    let err = api.list("catalogs", &ListQuery::new()).await.unwrap_err();
    assert_eq!(err.kind, ApiErrorKind::Throttled);
    assert!(api.list("catalogs", &ListQuery::new()).await.is_ok());
    assert_eq!(api.call_count(Operation::List, "catalogs"), 2);
}

#[tokio::test]
async fn test_update_merges_and_optionally_echoes() {
    let api = InMemoryRemoteApi::new().with_update_echo();
    let id = api.seed("catalogs", json!({"displayName": "Eng", "description": "old"}));

    let updated = api
        .update("catalogs", &id, &json!({"description": "new"}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated["description"], "new");
    assert_eq!(updated["displayName"], "Eng");

    let err = api
        .update("catalogs", "missing", &json!({"description": "x"}))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_request_route_materializes_after_polls() {
    let api = InMemoryRemoteApi::new()
        .with_unique_key("assignments", &["displayName"])
        .with_request_route("assignmentRequests", RequestRoute::new("assignments").after_polls(2));

    let request = api
        .create("assignmentRequests", &json!({"displayName": "alice-eng"}))
        .await
        .unwrap();
    let request_id = request["id"].as_str().unwrap().to_string();
    assert_eq!(request["status"], "Submitted");

    let duplicate = api
        .create("assignmentRequests", &json!({"displayName": "alice-eng"}))
        .await
        .unwrap_err();
    assert!(duplicate.is_conflict());

    assert!(api.list("assignments", &by_name("alice-eng")).await.unwrap().is_empty());
    let rows = api.list("assignments", &by_name("alice-eng")).await.unwrap();
    assert_eq!(rows.len(), 1);

    let request = api.read("assignmentRequests", &request_id).await.unwrap().unwrap();
    assert_eq!(request["status"], "Delivered");
}

#[tokio::test]
async fn test_failing_request_reports_terminal_state() {
    let api = InMemoryRemoteApi::new().with_request_route(
        "assignmentRequests",
        RequestRoute::new("assignments").failing_with("Denied"),
    );
    let request = api
        .create("assignmentRequests", &json!({"displayName": "bob-eng"}))
        .await
        .unwrap();
    let request_id = request["id"].as_str().unwrap();

    assert!(api.list("assignments", &ListQuery::new()).await.unwrap().is_empty());
    let request = api.read("assignmentRequests", request_id).await.unwrap().unwrap();
    assert_eq!(request["status"], "Denied");
    assert!(api.list("assignments", &ListQuery::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let api = InMemoryRemoteApi::new();
    let id = api.seed("catalogs", json!({"displayName": "Eng"}));

    api.delete("catalogs", &id).await.unwrap();
    api.delete("catalogs", &id).await.unwrap();
    assert!(api.objects("catalogs").is_empty());
    assert_eq!(api.write_count(), 2);
}
