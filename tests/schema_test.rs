// OpenAPI schema contract test: the generated document stays valid and keeps
// documenting the admin surface.

use utoipa::OpenApi;

#[test]
fn openapi_schema_is_valid_json() {
    let schema = serde_json::to_string_pretty(&mcp_router::ApiDoc::openapi())
        .expect("OpenAPI schema should serialize to JSON");
    assert!(!schema.is_empty(), "Schema should not be empty");
}

#[test]
fn openapi_schema_contains_required_fields() {
    let schema = serde_json::to_string_pretty(&mcp_router::ApiDoc::openapi())
        .expect("OpenAPI schema should serialize to JSON");
    assert!(schema.contains("openapi"), "Schema should contain 'openapi' version field");
    assert!(schema.contains("/api/health"), "Schema should document /api/health endpoint");
    assert!(schema.contains("mcp-router"), "Schema should contain project name");
}

#[test]
fn openapi_schema_documents_key_endpoints() {
    let doc = mcp_router::ApiDoc::openapi();
    let value = serde_json::to_value(&doc).expect("Schema should convert to Value");
    let paths = value["paths"].as_object().expect("paths should be an object");
    for path in [
        "/health",
        "/api/servers",
        "/api/servers/{name}",
        "/api/servers/{name}/toggle",
        "/api/test-all",
        "/api/audit",
        "/api/config/client",
        "/api/refresh",
        "/api/monitor/heal/{name}",
        "/api/logs",
    ] {
        assert!(paths.contains_key(path), "Schema should document {path}");
    }
}

#[test]
fn openapi_schema_registers_models() {
    let value = serde_json::to_value(mcp_router::ApiDoc::openapi()).unwrap();
    let schemas = value["components"]["schemas"]
        .as_object()
        .expect("components.schemas should be an object");
    for name in ["ServerView", "NewServer", "ServerUpdate", "ExecutionBackend", "AuditEntry"] {
        assert!(schemas.contains_key(name), "missing schema {name}");
    }
}

#[test]
fn openapi_schema_parses_to_valid_structure() {
    let doc = mcp_router::ApiDoc::openapi();
    let value = serde_json::to_value(&doc).expect("Schema should convert to Value");
    assert!(value.is_object(), "Schema root should be an object");
    assert!(value.get("info").is_some(), "Schema should have 'info' section");
    assert!(value.get("paths").is_some(), "Schema should have 'paths' section");
}
