mod common;

use std::sync::Arc;

use common::{catalog_kind, desired, engine};
use govsync_api::ApiError;
use govsync_core::{DesiredResource, PolicyAttachment};
use govsync_engine::ReconcileError;
use govsync_memory::{InMemoryRemoteApi, Operation};
use serde_json::{Value, json};

const RULES: &str = "policies/p1/rules";

fn attachment(rules: Vec<Value>) -> PolicyAttachment {
    PolicyAttachment::new("shared-policy", "policies", "p1", rules)
}

fn with_policy(name: &str, policy: PolicyAttachment) -> DesiredResource {
    desired(&catalog_kind(), name, json!({})).with_policy(policy)
}

#[tokio::test]
async fn test_shared_policy_is_patched_once_per_session() {
    let api = Arc::new(InMemoryRemoteApi::new());
    api.seed(RULES, json!({"id": "R1", "x": 0}));
    let engine = engine(&api);
    let session = engine.session();
    let policy = attachment(vec![json!({"id": "R1", "x": 1})]);

    let first = engine
        .converge(&session, &with_policy("A", policy.clone()))
        .await
        .unwrap();
    let second = engine
        .converge(&session, &with_policy("B", policy))
        .await
        .unwrap();

    let first = first.policy.unwrap();
    assert_eq!(first.patched, vec!["R1".to_string()]);
    assert!(!first.already_applied);
    assert!(second.policy.unwrap().already_applied);
    assert_eq!(api.call_count(Operation::Update, RULES), 1);
    assert_eq!(api.object(RULES, "R1").unwrap()["x"], 1);
    assert!(session.is_applied("shared-policy").await);
}

#[tokio::test]
async fn test_concurrent_reconciliations_patch_once() {
    let api = Arc::new(InMemoryRemoteApi::new());
    api.seed(RULES, json!({"id": "R1", "x": 0}));
    let engine = engine(&api);
    let session = engine.session();
    let policy = attachment(vec![json!({"id": "R1", "x": 1})]);
    let a = with_policy("A", policy.clone());
    let b = with_policy("B", policy);

    let (a, b) = tokio::join!(engine.converge(&session, &a), engine.converge(&session, &b));
    let (a, b) = (a.unwrap().policy.unwrap(), b.unwrap().policy.unwrap());

    assert!(a.already_applied != b.already_applied);
    assert_eq!(api.call_count(Operation::Update, RULES), 1);
}

#[tokio::test]
async fn test_matching_rules_are_not_written() {
    let api = Arc::new(InMemoryRemoteApi::new());
    api.seed(RULES, json!({"id": "R1", "x": 1, "modifiedDateTime": "2024-01-01"}));
    let engine = engine(&api);

    let outcome = engine
        .converge(
            &engine.session(),
            &with_policy("A", attachment(vec![json!({"id": "R1", "x": 1})])),
        )
        .await
        .unwrap();

    let report = outcome.policy.unwrap();
    assert_eq!(report.unchanged, vec!["R1".to_string()]);
    assert!(report.patched.is_empty());
    assert_eq!(api.call_count(Operation::Update, RULES), 0);
}

#[tokio::test]
async fn test_rule_absent_from_policy_fails_the_patch() {
    let api = Arc::new(InMemoryRemoteApi::new());
    api.seed(RULES, json!({"id": "R1", "x": 1}));
    let engine = engine(&api);

    let err = engine
        .converge(
            &engine.session(),
            &with_policy("A", attachment(vec![json!({"id": "R2", "x": 1})])),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::PolicyPatchFailed { .. }));
    let update = api
        .calls()
        .into_iter()
        .find(|c| c.operation == Operation::Update)
        .unwrap();
    assert_eq!(update.id.as_deref(), Some("R2"));
}

#[tokio::test]
async fn test_rule_placeholders_are_rendered() {
    let api = Arc::new(InMemoryRemoteApi::new());
    api.seed(RULES, json!({"id": "R1", "members": []}));
    let engine = engine(&api);

    let outcome = engine
        .converge(
            &engine.session(),
            &with_policy(
                "A",
                attachment(vec![json!({"id": "R1", "members": ["${id}"], "label": "${name}"})]),
            ),
        )
        .await
        .unwrap();

    let rule = api.object(RULES, "R1").unwrap();
    assert_eq!(rule["members"], json!([outcome.identifier]));
    assert_eq!(rule["label"], "A");
}

#[tokio::test]
async fn test_critical_failure_leaves_ledger_unmarked() {
    let api = Arc::new(InMemoryRemoteApi::new());
    api.seed(RULES, json!({"id": "R1", "x": 0}));
    api.fail_next(Operation::Update, RULES, ApiError::validation("rule rejected"));
    let engine = engine(&api);
    let session = engine.session();
    let a = with_policy("A", attachment(vec![json!({"id": "R1", "x": 1})]));

    let err = engine.converge(&session, &a).await.unwrap_err();
    match &err {
        ReconcileError::PolicyPatchFailed { key, message } => {
            assert_eq!(key, "shared-policy");
            assert!(message.contains("1 of 1 critical"), "{message}");
            assert!(message.contains("rule rejected"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!session.is_applied("shared-policy").await);

    let rerun = engine.converge(&session, &a).await.unwrap();
    assert_eq!(rerun.policy.unwrap().patched, vec!["R1".to_string()]);
    assert_eq!(api.call_count(Operation::Update, RULES), 2);
    assert_eq!(api.object(RULES, "R1").unwrap()["x"], 1);
}

#[tokio::test]
async fn test_critical_failure_counts_only_critical_rules() {
    let api = Arc::new(InMemoryRemoteApi::new());
    for id in ["R1", "R2", "R3"] {
        api.seed(RULES, json!({"id": id, "x": 0}));
    }
    api.fail_next(Operation::Update, RULES, ApiError::validation("rule rejected"));
    let engine = engine(&api);
    let policy = attachment(vec![
        json!({"id": "R1", "x": 1}),
        json!({"id": "R2", "x": 1}),
        json!({"id": "R3", "x": 1}),
    ])
    .with_critical_rules(["R1"]);

    let err = engine
        .converge(&engine.session(), &with_policy("A", policy))
        .await
        .unwrap_err();

    match &err {
        ReconcileError::PolicyPatchFailed { message, .. } => {
            assert!(message.contains("1 of 1 critical"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(api.call_count(Operation::Update, RULES), 3);
}

#[tokio::test]
async fn test_non_critical_failure_is_reported() {
    let api = Arc::new(InMemoryRemoteApi::new());
    api.seed(RULES, json!({"id": "R1", "x": 0}));
    api.seed(RULES, json!({"id": "R2", "x": 0}));
    api.fail_next(Operation::Update, RULES, ApiError::validation("rule rejected"));
    let engine = engine(&api);
    let policy = attachment(vec![json!({"id": "R1", "x": 1}), json!({"id": "R2", "x": 1})])
        .with_critical_rules(["R2"]);

    let outcome = engine
        .converge(&engine.session(), &with_policy("A", policy))
        .await
        .unwrap();

    let report = outcome.policy.unwrap();
    assert_eq!(report.patched, vec!["R2".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].rule_id, "R1");
    assert_eq!(api.object(RULES, "R1").unwrap()["x"], 0);
}

#[tokio::test]
async fn test_policy_waits_for_materialization() {
    use govsync_memory::RequestRoute;

    let api = Arc::new(
        InMemoryRemoteApi::new()
            .with_request_route("assignmentRequests", RequestRoute::new("assignments").never()),
    );
    api.seed(RULES, json!({"id": "R1", "x": 0}));
    let engine = engine(&api);
    let a = desired(&common::assignment_kind(), "A", json!({}))
        .with_policy(attachment(vec![json!({"id": "R1", "x": 1})]));

    let outcome = engine.converge(&engine.session(), &a).await.unwrap();

    assert!(outcome.policy.is_none());
    assert!(outcome.diagnostic.unwrap().contains("policy shared-policy not applied"));
    assert_eq!(api.call_count(Operation::Update, RULES), 0);
}
