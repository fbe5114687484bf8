#![forbid(unsafe_code)]

use hub_kernel_contracts::ph1pod::{PodProof, PodStepKind};
use hub_kernel_contracts::ph1route::{
    AddressChangeEntry, CustomerId, OrderId, OrderStatus, ParcelId, ParcelUpdate,
};
use hub_kernel_contracts::{MonotonicTimeNs, ReasonCodeId};
use hub_storage::fixture::demo_route_store;
use hub_storage::repo::{DeliveryCompletionSink, RouteOrderRepo};
use hub_storage::route_store::{RouteJournalEventKind, StorageError};

fn order(id: &str) -> OrderId {
    OrderId::new(id).unwrap()
}

fn parcel(id: &str) -> ParcelId {
    ParcelId::new(id).unwrap()
}

fn proof(order_id: &str, t: u64) -> PodProof {
    PodProof::v1(
        order(order_id),
        vec![
            PodStepKind::Details,
            PodStepKind::RecipientName,
            PodStepKind::Signature,
            PodStepKind::Photo,
        ],
        Some("Jane Doe".to_string()),
        None,
        None,
        Some("a".repeat(64)),
        vec![],
        MonotonicTimeNs(t),
        format!("pod_proof:{order_id}"),
    )
    .unwrap()
}

#[test]
fn at_route_db_01_parcel_updates_are_journaled() {
    let mut s = demo_route_store().unwrap();
    s.apply_parcel_update(
        &parcel("BOX-1-1"),
        ParcelUpdate::ScannedOnVan {
            at: MonotonicTimeNs(10),
        },
        ReasonCodeId(0x5343_0001),
    )
    .unwrap();

    let p = s.parcel(&parcel("BOX-1-1")).unwrap();
    assert!(p.scanned_on_van);
    assert_eq!(p.scanned_on_at, Some(MonotonicTimeNs(10)));
    assert_eq!(s.journal().len(), 1);
    assert_eq!(s.journal()[0].event_kind, RouteJournalEventKind::ParcelLoaded);
    assert_eq!(s.journal()[0].order_id, order("ORD-1"));
    assert!(matches!(
        s.attempt_overwrite_journal_row(s.journal()[0].journal_id),
        Err(StorageError::AppendOnlyViolation { .. })
    ));
}

#[test]
fn at_route_db_02_unload_without_load_is_invalid_transition() {
    let mut s = demo_route_store().unwrap();
    let err = s
        .apply_parcel_update(
            &parcel("BOX-2-1"),
            ParcelUpdate::ScannedOffVan {
                at: MonotonicTimeNs(5),
            },
            ReasonCodeId(0x5343_0005),
        )
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidTransition { .. }));
    assert!(s.journal().is_empty());
}

#[test]
fn at_route_db_03_unknown_parcel_is_foreign_key_violation() {
    let mut s = demo_route_store().unwrap();
    let err = s
        .apply_parcel_update(
            &parcel("WRONG-BOX-123"),
            ParcelUpdate::ScannedOnVan {
                at: MonotonicTimeNs(5),
            },
            ReasonCodeId(1),
        )
        .unwrap_err();
    assert!(matches!(err, StorageError::ForeignKeyViolation { .. }));
}

#[test]
fn at_route_db_04_delivery_is_monotonic_and_keeps_proof() {
    let mut s = demo_route_store().unwrap();
    s.complete_delivery(&order("ORD-1"), proof("ORD-1", 50), ReasonCodeId(0x504F_0001))
        .unwrap();
    assert_eq!(
        s.order_row(&order("ORD-1")).unwrap().status,
        OrderStatus::Delivered
    );
    assert_eq!(
        s.pod_proof(&order("ORD-1")).unwrap().proof_ref,
        "pod_proof:ORD-1"
    );

    let again = s.complete_delivery(&order("ORD-1"), proof("ORD-1", 60), ReasonCodeId(1));
    assert!(matches!(
        again,
        Err(StorageError::InvalidTransition { .. })
    ));
    assert_eq!(
        s.pod_proof(&order("ORD-1")).unwrap().completed_at,
        MonotonicTimeNs(50)
    );
    let delivered_rows = s
        .journal()
        .iter()
        .filter(|r| r.event_kind == RouteJournalEventKind::OrderDelivered)
        .count();
    assert_eq!(delivered_rows, 1);
}

#[test]
fn at_route_db_05_proof_for_another_order_is_rejected() {
    let mut s = demo_route_store().unwrap();
    let err = s
        .complete_delivery(&order("ORD-2"), proof("ORD-1", 50), ReasonCodeId(1))
        .unwrap_err();
    assert!(matches!(err, StorageError::ContractViolation(_)));
    assert_eq!(
        s.order_row(&order("ORD-2")).unwrap().status,
        OrderStatus::OutForDelivery
    );
}

#[test]
fn at_route_db_06_progress_queries() {
    let mut s = demo_route_store().unwrap();
    assert_eq!(s.loaded_count(), 0);
    assert_eq!(s.pending_load().len(), s.parcel_count());

    for (t, code) in [(1, "BOX-1-1"), (2, "BOX-1-2"), (3, "BOX-1-3")] {
        s.apply_parcel_update(
            &parcel(code),
            ParcelUpdate::ScannedOnVan {
                at: MonotonicTimeNs(t),
            },
            ReasonCodeId(1),
        )
        .unwrap();
    }
    assert_eq!(s.loaded_count(), 3);
    assert!(!s.all_loaded());
    assert_eq!(s.pending_load()[0].parcel_id, parcel("BOX-2-1"));

    s.apply_parcel_update(
        &parcel("BOX-1-1"),
        ParcelUpdate::ScannedOffVan {
            at: MonotonicTimeNs(10),
        },
        ReasonCodeId(1),
    )
    .unwrap();
    assert_eq!(s.delivered_count(), 1);
    assert_eq!(s.order_all_unloaded(&order("ORD-1")), Some(false));
    assert_eq!(s.order_all_unloaded(&order("ORD-404")), None);
}

#[test]
fn at_route_db_07_address_history_is_append_only() {
    let mut s = demo_route_store().unwrap();
    let customer_id = CustomerId::new("CUST-FARMACIA-CENTRAL").unwrap();
    let seq = s
        .append_address_change(
            AddressChangeEntry::v1(
                customer_id.clone(),
                MonotonicTimeNs(100),
                "Calle Mayor 12, Madrid".to_string(),
                "Calle Mayor 14, Madrid".to_string(),
                "office_admin".to_string(),
            )
            .unwrap(),
        )
        .unwrap();
    assert_eq!(s.address_history(&customer_id).len(), 1);
    assert!(matches!(
        s.attempt_overwrite_address_change(seq),
        Err(StorageError::AppendOnlyViolation { .. })
    ));

    let unknown = AddressChangeEntry::v1(
        CustomerId::new("CUST-NOBODY").unwrap(),
        MonotonicTimeNs(101),
        "A".to_string(),
        "B".to_string(),
        "office_admin".to_string(),
    )
    .unwrap();
    assert!(matches!(
        s.append_address_change(unknown),
        Err(StorageError::ForeignKeyViolation { .. })
    ));
}

#[test]
fn at_route_db_08_repo_exposes_route_and_customers() {
    let s = demo_route_store().unwrap();
    assert_eq!(s.route_orders().len(), 3);
    let o = s.order_row(&order("ORD-2")).unwrap();
    let c = s.customer_config_row(&o.customer_id).unwrap();
    assert_eq!(c.name, "Hospital Norte");
}
