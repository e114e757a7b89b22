#![allow(dead_code)]

use std::sync::Arc;

use govsync_core::{AsyncRequest, DesiredResource, NaturalKey, ResourceKind};
use govsync_engine::{Engine, EngineConfig};
use govsync_memory::InMemoryRemoteApi;
use serde_json::Value;

pub fn engine(api: &Arc<InMemoryRemoteApi>) -> Engine {
    Engine::new(api.clone(), EngineConfig::for_testing())
}

pub fn engine_with(api: &Arc<InMemoryRemoteApi>, config: EngineConfig) -> Engine {
    Engine::new(api.clone(), config)
}

pub fn catalog_kind() -> Arc<ResourceKind> {
    Arc::new(ResourceKind::new("catalog", "catalogs").immutable(["catalogType"]))
}

pub fn package_kind() -> Arc<ResourceKind> {
    Arc::new(ResourceKind::new("package", "accessPackages").with_parent("catalog.id", None))
}

pub fn assignment_kind() -> Arc<ResourceKind> {
    Arc::new(
        ResourceKind::new("assignment", "assignments").via_request(AsyncRequest {
            request_collection: "assignmentRequests".into(),
            request_id_field: "id".into(),
            status_field: Some("status".into()),
            failed_states: vec!["Denied".into(), "Failed".into()],
        }),
    )
}

pub fn desired(kind: &Arc<ResourceKind>, name: &str, properties: Value) -> DesiredResource {
    DesiredResource::new(kind.clone(), NaturalKey::new(name))
        .with_properties(properties.as_object().cloned().unwrap_or_default())
}
