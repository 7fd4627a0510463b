//! End-to-end exercise of a VM create request against a real Postgres
//! instance. Ignored by default, the way a database-backed integration test
//! should be; run with `DATABASE_URL=postgres://... cargo test -- --ignored`.

use serde_json::json;
use shepherd_core::domain::{TicketStatus, VmStatus};
use shepherd_store::decide::{approve_create, ApproveCreateInput};
use shepherd_store::submit::{submit, SubmitInput};
use shepherd_store::{services, systems};
use shepherd_core::domain::OperationType;

async fn test_pool() -> sqlx::PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
    shepherd_store::connect(&url, 5).await.expect("connect")
}

#[tokio::test]
#[ignore = "requires a live Postgres instance"]
async fn happy_path_create_then_approve_produces_one_vm_row() {
    let pool = test_pool().await;
    let mut tx = pool.begin().await.expect("begin");

    let system = systems::create(&mut tx, "shop", "shop system", "alice")
        .await
        .expect("create system");
    let service = services::create(&mut tx, system.id, "redis", "redis service")
        .await
        .expect("create service");

    let outcome = submit(
        &mut tx,
        SubmitInput {
            operation_type: OperationType::Create,
            aggregate_type: "service",
            aggregate_id: service.id,
            requester: "alice",
            resource_type: "service",
            resource_id: Some(service.id),
            payload: &json!({"service_id": service.id, "namespace": "prod-shop"}),
            request_params: &json!({"disk": 100}),
            environment: "prod",
            audit_action: "vm.request",
        },
    )
    .await
    .expect("submit create");

    let approved = approve_create(
        &mut tx,
        ApproveCreateInput {
            ticket_id: outcome.ticket_id,
            approver: "bob",
            requester: "alice",
            selected_cluster_id: uuid::Uuid::new_v4(),
            selected_storage_class: "ceph-rbd",
            selected_template_version: "tpl-centos7@1",
            modified_spec: &json!({}),
            template_snapshot: &json!({"name": "tpl-centos7"}),
            instance_size_snapshot: &json!({"cpu": 8}),
            service_id: service.id,
            system_name: "shop",
            service_name: "redis",
            namespace: "prod-shop",
            environment: "prod",
        },
    )
    .await
    .expect("approve create");

    assert_eq!(approved.ticket.status, TicketStatus::Approved);
    assert_eq!(approved.vm.status, VmStatus::Creating);
    assert_eq!(approved.vm.name, "prod-shop-shop-redis-1");

    tx.rollback().await.expect("rollback test transaction");
}

#[tokio::test]
#[ignore = "requires a live Postgres instance"]
async fn duplicate_submit_before_resolution_is_rejected() {
    let pool = test_pool().await;
    let mut tx = pool.begin().await.expect("begin");

    let system = systems::create(&mut tx, "shop", "shop system", "alice")
        .await
        .expect("create system");
    let service = services::create(&mut tx, system.id, "redis", "redis service")
        .await
        .expect("create service");

    let input = || SubmitInput {
        operation_type: OperationType::Create,
        aggregate_type: "service",
        aggregate_id: service.id,
        requester: "alice",
        resource_type: "service",
        resource_id: Some(service.id),
        payload: &json!({}),
        request_params: &json!({}),
        environment: "prod",
        audit_action: "vm.request",
    };

    submit(&mut tx, input()).await.expect("first submit succeeds");
    let err = submit(&mut tx, input()).await.expect_err("second submit must be rejected");

    assert!(matches!(err, shepherd_store::error::Error::DuplicatePendingRequest { .. }));

    tx.rollback().await.expect("rollback test transaction");
}
