#![forbid(unsafe_code)]

use hub_engines::ph1pod::Ph1PodConfig;
use hub_engines::ph1scan::{Ph1ScanConfig, Ph1ScanRuntime};
use hub_kernel_contracts::ph1scan::{PendingUnload, Ph1ScanRequest, ScanPhase};
use hub_kernel_contracts::{ContractViolation, MonotonicTimeNs};
use hub_storage::repo::{DeliveryCompletionSink, ParcelUpdateSink, RouteOrderRepo};
use hub_storage::route_store::StorageError;

use crate::capabilities::{LocationProvider, Scanner};
use crate::ph1pod::{Ph1PodWiring, Ph1PodWiringConfig, Ph1PodWiringOutcome, PodCommand};
use crate::ph1scan::{Ph1ScanWiring, Ph1ScanWiringConfig, Ph1ScanWiringOutcome};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteSessionConfig {
    pub scan_wiring: Ph1ScanWiringConfig,
    pub scan: Ph1ScanConfig,
    pub pod_wiring: Ph1PodWiringConfig,
    pub pod: Ph1PodConfig,
}

impl RouteSessionConfig {
    pub fn mvp_v1() -> Self {
        Self {
            scan_wiring: Ph1ScanWiringConfig::mvp_v1(true),
            scan: Ph1ScanConfig::mvp_v1(),
            pod_wiring: Ph1PodWiringConfig::mvp_v1(true),
            pod: Ph1PodConfig::mvp_v1(),
        }
    }
}

/// Owns one driver's route: the parcel store, the scan reconciler and the POD controller.
/// Every event goes through `&mut self`, so scans and flow commands are applied in arrival
/// order against the same parcel state.
#[derive(Debug)]
pub struct RouteSession<S> {
    store: S,
    scan: Ph1ScanWiring<Ph1ScanRuntime>,
    pod: Ph1PodWiring,
}

impl<S> RouteSession<S>
where
    S: RouteOrderRepo + ParcelUpdateSink + DeliveryCompletionSink,
{
    pub fn new(store: S, config: RouteSessionConfig) -> Result<Self, ContractViolation> {
        Ok(Self {
            store,
            scan: Ph1ScanWiring::new(config.scan_wiring, Ph1ScanRuntime::new(config.scan))?,
            pod: Ph1PodWiring::new(config.pod_wiring, config.pod)?,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn pod(&self) -> &Ph1PodWiring {
        &self.pod
    }

    pub fn pending_unload(&self) -> Option<&PendingUnload> {
        self.scan.pending()
    }

    pub fn scan(
        &mut self,
        now: MonotonicTimeNs,
        code: &str,
        phase: ScanPhase,
        location: &dyn LocationProvider,
    ) -> Result<Ph1ScanWiringOutcome, StorageError> {
        let req = Ph1ScanRequest::scan_v1(now, code, phase, location.current_location())?;
        self.scan.run_request(&mut self.store, &req)
    }

    /// Pulls the next code from `scanner`; `None` when nothing is queued.
    pub fn scan_next(
        &mut self,
        now: MonotonicTimeNs,
        phase: ScanPhase,
        scanner: &mut dyn Scanner,
        location: &dyn LocationProvider,
    ) -> Result<Option<Ph1ScanWiringOutcome>, StorageError> {
        match scanner.next_code() {
            Some(code) => self.scan(now, &code, phase, location).map(Some),
            None => Ok(None),
        }
    }

    pub fn confirm_delivery(
        &mut self,
        now: MonotonicTimeNs,
    ) -> Result<Ph1ScanWiringOutcome, StorageError> {
        self.scan.confirm_pending(&mut self.store, now)
    }

    pub fn abandon_pending_unload(&mut self) -> Option<PendingUnload> {
        self.scan.abandon_pending()
    }

    pub fn pod_command(
        &mut self,
        now: MonotonicTimeNs,
        cmd: PodCommand,
    ) -> Result<Ph1PodWiringOutcome, StorageError> {
        self.pod.run_command(&mut self.store, now, cmd)
    }

    /// Feeds the next scanner code to the QR_SCAN step of the active flow.
    pub fn pod_scan_next(
        &mut self,
        now: MonotonicTimeNs,
        scanner: &mut dyn Scanner,
    ) -> Result<Option<Ph1PodWiringOutcome>, StorageError> {
        match scanner.next_code() {
            Some(code) => self
                .pod_command(now, PodCommand::ScanParcel { code })
                .map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{FixedLocation, SimulatedScanner};
    use hub_kernel_contracts::ph1pod::{
        EvidencePayload, PodCommandOutcome, PodFlowPhase, PodRefuseKind, PodScanOutcome,
        PodStepKind,
    };
    use hub_kernel_contracts::ph1route::{
        CommChannel, CustomerConfig, CustomerId, GeoPoint, Order, OrderId, OrderStatus, PodMethod,
    };
    use hub_kernel_contracts::ph1scan::{ScanAccepted, ScanRefuseKind};
    use hub_storage::fixture::demo_route_store;
    use hub_storage::route_store::RouteStore;

    fn t(ms: u64) -> MonotonicTimeNs {
        MonotonicTimeNs::from_ms(ms)
    }

    fn session(store: RouteStore) -> RouteSession<RouteStore> {
        RouteSession::new(store, RouteSessionConfig::mvp_v1()).unwrap()
    }

    fn single_order_store(methods: &[PodMethod], items: u16) -> RouteStore {
        let mut store = RouteStore::new_in_memory();
        let customer_id = CustomerId::new("CUST-1").unwrap();
        store
            .insert_customer_config(
                CustomerConfig::v1(
                    customer_id.clone(),
                    "Acme Pharmacy".to_string(),
                    methods.iter().copied().collect(),
                    [CommChannel::Sms].into(),
                    vec![],
                )
                .unwrap(),
            )
            .unwrap();
        let order_id = OrderId::new("ORD-1").unwrap();
        store
            .insert_order(
                Order::v1(
                    order_id.clone(),
                    customer_id,
                    "Jane Doe".to_string(),
                    "1 Main St".to_string(),
                    "10001".to_string(),
                    Some(GeoPoint::v1(40.4153, -3.7074, None).unwrap()),
                    OrderStatus::OutForDelivery,
                    items,
                    Order::with_generated_parcels(order_id, "1", items).unwrap(),
                )
                .unwrap(),
            )
            .unwrap();
        store
    }

    fn pod(s: &mut RouteSession<RouteStore>, ms: u64, cmd: PodCommand) -> PodCommandOutcome {
        match s.pod_command(t(ms), cmd).unwrap() {
            Ph1PodWiringOutcome::Handled(o) => o,
            other => panic!("expected handled, got {other:?}"),
        }
    }

    fn accepted(out: Ph1ScanWiringOutcome) -> ScanAccepted {
        match out {
            Ph1ScanWiringOutcome::Accepted(ok) => ok.accepted,
            other => panic!("expected accepted scan, got {other:?}"),
        }
    }

    fn refused(out: Ph1ScanWiringOutcome) -> ScanRefuseKind {
        match out {
            Ph1ScanWiringOutcome::Refused(r) => r.kind,
            other => panic!("expected refused scan, got {other:?}"),
        }
    }

    #[test]
    fn at_session_01_scenario_photo_only_delivery() {
        let mut s = session(single_order_store(&[PodMethod::Photo], 1));
        let order_id = OrderId::new("ORD-1").unwrap();
        match pod(
            &mut s,
            1,
            PodCommand::Start {
                order_id: order_id.clone(),
            },
        ) {
            PodCommandOutcome::Started { steps, .. } => assert_eq!(
                steps,
                vec![
                    PodStepKind::Details,
                    PodStepKind::RecipientName,
                    PodStepKind::Signature,
                    PodStepKind::Photo,
                ]
            ),
            other => panic!("expected started, got {other:?}"),
        }
        assert!(matches!(
            pod(&mut s, 2, PodCommand::Advance),
            PodCommandOutcome::Moved { .. }
        ));
        assert_eq!(
            pod(&mut s, 3, PodCommand::Advance).refuse_kind(),
            Some(PodRefuseKind::IncompleteStep)
        );
        pod(&mut s, 4, PodCommand::SetRecipientName("Jane Doe".to_string()));
        pod(&mut s, 5, PodCommand::Advance);
        assert!(matches!(
            pod(&mut s, 6, PodCommand::Advance),
            PodCommandOutcome::Moved {
                to: PodStepKind::Photo,
                ..
            }
        ));
        assert_eq!(
            pod(&mut s, 7, PodCommand::Advance).refuse_kind(),
            Some(PodRefuseKind::IncompleteStep)
        );
        pod(
            &mut s,
            8,
            PodCommand::CapturePhoto(EvidencePayload::new("data:image/jpeg;base64,AAAA").unwrap()),
        );
        match pod(&mut s, 9, PodCommand::Advance) {
            PodCommandOutcome::Completed(proof) => assert_eq!(proof.order_id, order_id),
            other => panic!("expected completed, got {other:?}"),
        }
        assert_eq!(s.pod().flow().phase(), PodFlowPhase::Success);
        assert_eq!(
            s.store().order(&order_id).unwrap().status,
            OrderStatus::Delivered
        );
    }

    #[test]
    fn at_session_02_scenario_all_loaded_on_last_box() {
        let mut s = session(single_order_store(&[], 3));
        let no_fix = FixedLocation::no_fix();
        let mut scanner = SimulatedScanner::new(["BOX-1-1", "BOX-1-2", "BOX-1-3"]);
        let mut flags = Vec::new();
        let mut ms = 1;
        while let Some(out) = s
            .scan_next(t(ms), ScanPhase::Warehouse, &mut scanner, &no_fix)
            .unwrap()
        {
            match accepted(out) {
                ScanAccepted::Loaded { all_loaded, .. } => flags.push(all_loaded),
                other => panic!("expected loaded, got {other:?}"),
            }
            ms += 1;
        }
        assert_eq!(flags, vec![false, false, true]);
        assert!(s.store().all_loaded());
    }

    #[test]
    fn at_session_03_scenario_wrong_box_is_not_found() {
        let mut s = session(demo_route_store().unwrap());
        let no_fix = FixedLocation::no_fix();
        for phase in [ScanPhase::Warehouse, ScanPhase::Delivery] {
            let out = s.scan(t(1), "WRONG-BOX-123", phase, &no_fix).unwrap();
            assert_eq!(refused(out), ScanRefuseKind::NotFound);
        }
        assert!(s.store().journal().is_empty());
    }

    #[test]
    fn at_session_09_undecodable_or_foreign_codes_are_not_found() {
        let mut s = session(demo_route_store().unwrap());
        let no_fix = FixedLocation::no_fix();
        let long = "X".repeat(200);
        for code in ["BOX-Ü-1", long.as_str(), ""] {
            for phase in [ScanPhase::Warehouse, ScanPhase::Delivery] {
                let out = s.scan(t(0), code, phase, &no_fix).unwrap();
                assert_eq!(refused(out), ScanRefuseKind::NotFound, "code {code:?}");
            }
        }
        assert!(s.store().journal().is_empty());
        assert!(s.pending_unload().is_none());

        let out = s.scan(t(0), "BOX-1-1", ScanPhase::Warehouse, &no_fix).unwrap();
        assert!(matches!(accepted(out), ScanAccepted::Loaded { .. }));
    }

    #[test]
    fn at_session_04_scenario_qr_scan_two_parcels() {
        let mut s = session(demo_route_store().unwrap());
        let order_id = OrderId::new("ORD-2").unwrap();
        pod(
            &mut s,
            1,
            PodCommand::Start {
                order_id: order_id.clone(),
            },
        );
        pod(&mut s, 2, PodCommand::Advance);
        for (slot, digit) in ["4", "8", "1", "5"].into_iter().enumerate() {
            pod(
                &mut s,
                3,
                PodCommand::SetOtpSlot {
                    slot,
                    input: digit.to_string(),
                },
            );
        }
        pod(&mut s, 4, PodCommand::Advance);
        pod(&mut s, 5, PodCommand::SetRecipientName("Dr. Luis Romero".to_string()));
        pod(&mut s, 6, PodCommand::Advance);
        pod(&mut s, 7, PodCommand::Advance);
        assert_eq!(
            s.pod().flow().current_kind(),
            Some(PodStepKind::QrScan)
        );

        let mut scanner = SimulatedScanner::new(["BOX-2-1", "BOX-2-1", "BOX-2-2"]);
        let counts: Vec<PodScanOutcome> = (0..3)
            .map(|i| match s.pod_scan_next(t(10 + i), &mut scanner).unwrap() {
                Some(Ph1PodWiringOutcome::Handled(PodCommandOutcome::Scanned(o))) => o,
                other => panic!("expected scan outcome, got {other:?}"),
            })
            .collect();
        assert!(matches!(
            counts[0],
            PodScanOutcome::Counted {
                scanned: 1,
                expected: 2,
                ..
            }
        ));
        assert!(matches!(
            counts[1],
            PodScanOutcome::AlreadyCounted { scanned: 1, .. }
        ));
        assert!(matches!(
            counts[2],
            PodScanOutcome::Counted {
                scanned: 2,
                expected: 2,
                ..
            }
        ));
        assert!(s.pod().flow().can_advance());
        assert!(matches!(
            pod(&mut s, 20, PodCommand::Advance),
            PodCommandOutcome::Moved {
                to: PodStepKind::Photo,
                ..
            }
        ));
    }

    #[test]
    fn at_session_05_qr_scan_wrong_parcel_notice_expires() {
        let mut s = session(demo_route_store().unwrap());
        pod(
            &mut s,
            1,
            PodCommand::Start {
                order_id: OrderId::new("ORD-2").unwrap(),
            },
        );
        pod(&mut s, 2, PodCommand::Advance);
        for slot in 0..4 {
            pod(
                &mut s,
                3,
                PodCommand::SetOtpSlot {
                    slot,
                    input: "7".to_string(),
                },
            );
        }
        pod(&mut s, 4, PodCommand::Advance);
        pod(&mut s, 5, PodCommand::SetRecipientName("Luis".to_string()));
        pod(&mut s, 6, PodCommand::Advance);
        pod(&mut s, 7, PodCommand::Advance);

        let out = pod(
            &mut s,
            1_000,
            PodCommand::ScanParcel {
                code: "BOX-1-1".to_string(),
            },
        );
        assert_eq!(out.refuse_kind(), Some(PodRefuseKind::WrongParcel));
        assert!(s.pod().misscan_notice(t(3_999)).is_some());
        assert!(s.pod().misscan_notice(t(4_000)).is_none());
        let out = pod(
            &mut s,
            5_000,
            PodCommand::ScanParcel {
                code: "WRONG-BOX-123".to_string(),
            },
        );
        assert_eq!(out.refuse_kind(), Some(PodRefuseKind::NotFound));
    }

    #[test]
    fn at_session_06_delivery_far_from_address_needs_explicit_confirm() {
        let mut s = session(demo_route_store().unwrap());
        let no_fix = FixedLocation::no_fix();
        s.scan(t(1), "BOX-1-1", ScanPhase::Warehouse, &no_fix)
            .unwrap();

        // ~150 m north of the expected position.
        let far = FixedLocation::new(Some(GeoPoint::v1(40.41665, -3.7074, Some(8.0)).unwrap()));
        match accepted(
            s.scan(t(10), "BOX-1-1", ScanPhase::Delivery, &far)
                .unwrap(),
        ) {
            ScanAccepted::UnloadPending(p) => assert!(p.location.is_mismatch()),
            other => panic!("expected pending unload, got {other:?}"),
        }
        assert_eq!(s.store().delivered_count(), 0);

        match accepted(s.confirm_delivery(t(11)).unwrap()) {
            ScanAccepted::Unloaded {
                location_override, ..
            } => assert!(location_override),
            other => panic!("expected unloaded, got {other:?}"),
        }
        assert_eq!(s.store().delivered_count(), 1);
    }

    #[test]
    fn at_session_07_delivery_before_load_always_refused() {
        let mut s = session(demo_route_store().unwrap());
        let here = FixedLocation::new(Some(GeoPoint::v1(40.4153, -3.7074, None).unwrap()));
        for ms in 1..=3 {
            let out = s.scan(t(ms), "BOX-1-2", ScanPhase::Delivery, &here).unwrap();
            assert_eq!(refused(out), ScanRefuseKind::PrecedenceViolation);
        }
        assert!(s.pending_unload().is_none());
    }

    #[test]
    fn at_session_08_abandoned_confirmation_leaves_parcel_on_van() {
        let mut s = session(demo_route_store().unwrap());
        let no_fix = FixedLocation::no_fix();
        s.scan(t(1), "BOX-3-1", ScanPhase::Warehouse, &no_fix)
            .unwrap();
        s.scan(t(2), "BOX-3-1", ScanPhase::Delivery, &no_fix)
            .unwrap();
        assert!(s.abandon_pending_unload().is_some());
        assert_eq!(
            refused(s.confirm_delivery(t(3)).unwrap()),
            ScanRefuseKind::NoPendingConfirmation
        );
        assert_eq!(s.store().delivered_count(), 0);
        assert_eq!(s.store().loaded_count(), 1);
    }
}
