use std::sync::Arc;

use async_trait::async_trait;
use bridge_desktop::{MemoryHost, StaticPermissionGate};
use bridge_traits::error::Result as HostResult;
use bridge_traits::permission::{PermissionDecision, PermissionGate, PermissionRequest};
use core_service::contract::{self, note};
use core_service::{BridgeConfig, ContentRequest, ContentService, CoreError, ErrorKind, ValueMap};
use mockall::mock;

mock! {
    PermissionGate {}
    #[async_trait]
    impl PermissionGate for PermissionGate {
        async fn check(&self, request: &PermissionRequest) -> HostResult<PermissionDecision>;
    }
}

fn host() -> Arc<MemoryHost> {
    Arc::new(MemoryHost::builder().provider(contract::AUTHORITY).build())
}

fn service(host: &Arc<MemoryHost>, gate: Arc<dyn PermissionGate>) -> ContentService {
    let config = BridgeConfig::builder()
        .host_runtime(host.clone())
        .permission_gate(gate)
        .build()
        .unwrap();
    ContentService::new(&config).unwrap()
}

#[tokio::test]
async fn test_revoked_permission_blocks_writes() {
    let host = host();
    let gate = Arc::new(StaticPermissionGate::granting(&[contract::PERMISSION]));
    let service = service(&host, gate.clone());

    let id = service
        .add_note(1, contract::DEFAULT_DECK_ID, &["Q", "A"], &["x"])
        .await
        .unwrap();
    assert!(id > 0);

    gate.revoke(contract::PERMISSION);
    let err = service
        .add_note(1, contract::DEFAULT_DECK_ID, &["Q2", "A2"], &[])
        .await
        .unwrap_err();
    assert_eq!(err.bridge_kind(), Some(ErrorKind::PermissionDenied));
    assert_eq!(host.stats().attaches, 1);
    assert_eq!(host.row_count(contract::AUTHORITY, "notes"), 1);
}

#[tokio::test]
async fn test_gate_sees_resolved_locator() {
    let host = host();
    let mut gate = MockPermissionGate::new();
    gate.expect_check()
        .withf(|request| {
            request.operation == "query"
                && request.locator == "content://com.ichi2.anki.flashcards/decks"
        })
        .times(1)
        .returning(|_| {
            Ok(PermissionDecision::Denied {
                reason: "user declined".to_string(),
            })
        });
    let service = service(&host, Arc::new(gate));

    let err = service
        .query(
            ContentRequest::query(contract::decks())
                .projection(contract::deck::DEFAULT_PROJECTION.iter().copied()),
        )
        .await
        .unwrap_err();

    let CoreError::Bridge(err) = err else {
        panic!("expected a bridge error");
    };
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(host.stats().attaches, 0);
}

#[tokio::test]
async fn test_invalid_insert_reports_context() {
    let host = host();
    let mut gate = MockPermissionGate::new();
    gate.expect_check().returning(|_| Ok(PermissionDecision::Granted));
    let service = service(&host, Arc::new(gate));

    let err = service
        .insert(&contract::notes(), ValueMap::new())
        .await
        .unwrap_err();
    let context = err.context();
    assert_eq!(context.kind, ErrorKind::InvalidOperation);
    assert!(context.host_fault.is_none());

    let item = service
        .insert(&contract::notes(), ValueMap::new().with(note::FLDS, "Q"))
        .await
        .unwrap();
    assert_eq!(item.locator.authority(), contract::AUTHORITY);
}
