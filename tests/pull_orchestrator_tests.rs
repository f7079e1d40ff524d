//! Pull flow end to end: database-backed connectors and mappings, an
//! in-memory cache and a mock ERP.

use anyhow::Result;
use integration_hub::error::HubError;
use integration_hub::orchestrator::{PullMetadata, PullRequest};
use integration_hub::repositories::ConnectorUpdate;
use serde_json::{Value, json};
use uuid::Uuid;
use wiremock::matchers::{any, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::TestHub;

fn priority_config(server: &MockServer) -> Value {
    json!({
        "baseUrl": format!("{}/api", server.uri()),
        "company": "demo",
        "endpoints": {"customers": "/customers/{customerId}"}
    })
}

fn request(organization_id: Uuid, connector_id: Uuid) -> PullRequest {
    PullRequest {
        organization_id,
        connector_id,
        resource_type: "customers".to_string(),
        resource_id: "CID456".to_string(),
        force_refresh: false,
    }
}

#[tokio::test]
async fn pull_maps_response_then_serves_from_cache() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/customers/CID456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "CUSTNAME": "CID456",
            "CUSTDES": "  john doe  ",
            "PHONE": "03-1234567"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let hub = TestHub::new().await?;
    let org = Uuid::new_v4();
    let connector = hub
        .create_connector(org, "Priority", priority_config(&server))
        .await?;
    hub.create_mapping(org, connector.id, None, "name", "CUSTDES", &["trim", "uppercase"])
        .await?;
    hub.create_mapping(org, connector.id, None, "customerId", "CUSTNAME", &[])
        .await?;
    let pull = hub.pull();

    let first = pull.pull_data(request(org, connector.id)).await?;
    assert!(!first.from_cache);
    assert_eq!(first.data, json!({"name": "JOHN DOE", "customerId": "CID456"}));
    assert!(matches!(first.metadata, PullMetadata::Fetched { .. }));

    let second = pull.pull_data(request(org, connector.id)).await?;
    assert!(second.from_cache);
    assert_eq!(second.data, first.data);
    assert!(matches!(second.metadata, PullMetadata::Cached { .. }));

    let serialized = serde_json::to_value(&second)?;
    assert!(serialized["metadata"]["cachedAt"].is_string());
    assert!(serialized["metadata"].get("fetchedAt").is_none());
    Ok(())
}

#[tokio::test]
async fn force_refresh_bypasses_cache_and_rewrites_it() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/customers/CID456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"CUSTDES": "Acme"})))
        .expect(2)
        .mount(&server)
        .await;

    let hub = TestHub::new().await?;
    let org = Uuid::new_v4();
    let connector = hub
        .create_connector(org, "Priority", priority_config(&server))
        .await?;
    let pull = hub.pull();

    pull.pull_data(request(org, connector.id)).await?;
    let refreshed = pull
        .pull_data(PullRequest {
            force_refresh: true,
            ..request(org, connector.id)
        })
        .await?;

    assert!(!refreshed.from_cache);
    // No mappings: the upstream body passes through unchanged
    assert_eq!(refreshed.data, json!({"CUSTDES": "Acme"}));
    assert!(pull.pull_data(request(org, connector.id)).await?.from_cache);
    Ok(())
}

#[tokio::test]
async fn foreign_organization_never_reaches_network_or_cache() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/customers/CID456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"CUSTDES": "Acme"})))
        .expect(1)
        .mount(&server)
        .await;

    let hub = TestHub::new().await?;
    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    let connector = hub
        .create_connector(owner, "Priority", priority_config(&server))
        .await?;
    let pull = hub.pull();

    pull.pull_data(request(owner, connector.id)).await?;
    let err = pull
        .pull_data(request(intruder, connector.id))
        .await
        .unwrap_err();

    assert!(matches!(err, HubError::NotFound(_)));
    assert_eq!(hub.cache.get_cache_stats(intruder).await?.total_keys, 0);
    assert_eq!(hub.cache.get_cache_stats(owner).await?.total_keys, 1);
    Ok(())
}

#[tokio::test]
async fn disabled_connector_is_rejected_without_network() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let hub = TestHub::new().await?;
    let org = Uuid::new_v4();
    let connector = hub
        .create_connector(org, "Priority", priority_config(&server))
        .await?;
    hub.connectors
        .update(
            connector.id,
            org,
            ConnectorUpdate {
                is_enabled: Some(false),
                ..Default::default()
            },
        )
        .await?;

    let err = hub
        .pull()
        .pull_data(request(org, connector.id))
        .await
        .unwrap_err();

    assert!(matches!(err, HubError::ConnectorDisabled { .. }));
    Ok(())
}

#[tokio::test]
async fn api_key_credentials_become_a_header() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/customers/CID456"))
        .and(header("X-Priority-Key", "pk-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"CUSTDES": "Acme"})))
        .expect(1)
        .mount(&server)
        .await;

    let hub = TestHub::new().await?;
    let org = Uuid::new_v4();
    let connector = hub
        .create_connector(org, "Priority", priority_config(&server))
        .await?;
    hub.vault
        .store_credentials(
            connector.id,
            "api_key",
            &json!({"apiKey": "pk-123", "headerName": "X-Priority-Key"}),
        )
        .await?;

    let result = hub.pull().pull_data(request(org, connector.id)).await?;
    assert_eq!(result.data["CUSTDES"], "Acme");
    Ok(())
}

#[tokio::test]
async fn basic_credentials_use_authorization_header() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let hub = TestHub::new().await?;
    let org = Uuid::new_v4();
    let connector = hub
        .create_connector(org, "Priority", priority_config(&server))
        .await?;
    hub.vault
        .store_credentials(
            connector.id,
            "basic",
            &json!({"username": "user", "password": "pass"}),
        )
        .await?;

    hub.pull().pull_data(request(org, connector.id)).await?;
    Ok(())
}

#[tokio::test]
async fn missing_template_falls_back_to_resource_path() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/orders/SO1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ORDNAME": "SO1"})))
        .expect(1)
        .mount(&server)
        .await;

    let hub = TestHub::new().await?;
    let org = Uuid::new_v4();
    let connector = hub
        .create_connector(org, "Priority", priority_config(&server))
        .await?;

    let result = hub
        .pull()
        .pull_data(PullRequest {
            resource_type: "orders".to_string(),
            resource_id: "SO1".to_string(),
            ..request(org, connector.id)
        })
        .await?;

    assert_eq!(result.data, json!({"ORDNAME": "SO1"}));
    Ok(())
}

#[tokio::test]
async fn upstream_server_error_is_retried_then_reported() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(3)
        .mount(&server)
        .await;

    let hub = TestHub::new().await?;
    let org = Uuid::new_v4();
    let connector = hub
        .create_connector(org, "Priority", priority_config(&server))
        .await?;

    let err = hub
        .pull()
        .pull_data(request(org, connector.id))
        .await
        .unwrap_err();

    match err {
        HubError::Gateway { status, body, .. } => {
            assert_eq!(status, Some(503));
            assert_eq!(body.as_deref(), Some("maintenance"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(hub.cache.get_cache_stats(org).await?.total_keys, 0);
    Ok(())
}

#[tokio::test]
async fn path_traversal_resource_id_is_rejected() -> Result<()> {
    let hub = TestHub::new().await?;
    let org = Uuid::new_v4();
    let connector = hub
        .create_connector(org, "Priority", json!({"baseUrl": "https://erp.example.com"}))
        .await?;

    let err = hub
        .pull()
        .pull_data(PullRequest {
            resource_id: "../admin".to_string(),
            ..request(org, connector.id)
        })
        .await
        .unwrap_err();

    assert!(matches!(err, HubError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn dot_segment_resource_ids_never_reach_upstream() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let hub = TestHub::new().await?;
    let org = Uuid::new_v4();
    let connector = hub
        .create_connector(org, "Priority", priority_config(&server))
        .await?;

    for resource_id in ["..", ".", "%2E%2e", "%2e"] {
        let err = hub
            .pull()
            .pull_data(PullRequest {
                resource_id: resource_id.to_string(),
                force_refresh: true,
                ..request(org, connector.id)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Validation(_)), "{resource_id}: {err:?}");
    }
    Ok(())
}
