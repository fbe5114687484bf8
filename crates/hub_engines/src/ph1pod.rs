#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hub_kernel_contracts::ph1pod::{
    EvidencePayload, PhotoStage, PodCommandOutcome, PodFlowPhase, PodProof, PodRefuse,
    PodRefuseKind, PodScanOutcome, PodStep, PodStepKind, OTP_LEN, PH1POD_CONTRACT_VERSION,
};
use hub_kernel_contracts::ph1route::{CustomerConfig, Order, OrderId, ParcelId, PodMethod};
use hub_kernel_contracts::{ContractViolation, MonotonicTimeNs, ReasonCodeId, Validate};
use sha2::{Digest, Sha256};

use crate::expiring::NoticeSlot;

pub mod reason_codes {
    use hub_kernel_contracts::ReasonCodeId;

    // PH1.POD reason-code namespace.
    pub const POD_NO_ACTIVE_FLOW: ReasonCodeId = ReasonCodeId(0x504F_00F1);
    pub const POD_FLOW_ALREADY_ACTIVE: ReasonCodeId = ReasonCodeId(0x504F_00F2);
    pub const POD_STEP_INCOMPLETE: ReasonCodeId = ReasonCodeId(0x504F_00F3);
    pub const POD_AT_FIRST_STEP: ReasonCodeId = ReasonCodeId(0x504F_00F4);
    pub const POD_TERMINAL_STATE: ReasonCodeId = ReasonCodeId(0x504F_00F5);
    pub const POD_WRONG_STEP: ReasonCodeId = ReasonCodeId(0x504F_00F6);
    pub const POD_WRONG_PARCEL: ReasonCodeId = ReasonCodeId(0x504F_00F7);
    pub const POD_PARCEL_NOT_FOUND: ReasonCodeId = ReasonCodeId(0x504F_00F8);
    pub const POD_INPUT_INVALID: ReasonCodeId = ReasonCodeId(0x504F_00F9);
    pub const POD_ORDER_ALREADY_DELIVERED: ReasonCodeId = ReasonCodeId(0x504F_00FA);
    pub const POD_INTERNAL_PIPELINE_ERROR: ReasonCodeId = ReasonCodeId(0x504F_00FF);
}

pub const MISSCAN_NOTICE_TTL_MS: u64 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ph1PodConfig {
    pub misscan_notice_ttl_ms: u64,
    pub otp_len: usize,
}

impl Ph1PodConfig {
    pub fn mvp_v1() -> Self {
        Self {
            misscan_notice_ttl_ms: MISSCAN_NOTICE_TTL_MS,
            otp_len: OTP_LEN,
        }
    }
}

impl Validate for Ph1PodConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.otp_len != OTP_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "ph1pod_config.otp_len",
                reason: "must equal OTP_LEN",
            });
        }
        if self.misscan_notice_ttl_ms == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "ph1pod_config.misscan_notice_ttl_ms",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

impl Default for Ph1PodConfig {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

/// Derives the ordered step list for a customer.
///
/// SIGNATURE and PHOTO are always present whatever the configuration says. The name capture
/// always sits directly before the signature.
pub fn derive_step_kinds(customer: &CustomerConfig) -> Vec<PodStepKind> {
    let mut steps = vec![PodStepKind::Details];
    if customer.requires(PodMethod::Otp) {
        steps.push(PodStepKind::Otp);
    }
    steps.push(PodStepKind::RecipientName);
    steps.push(PodStepKind::Signature);
    if customer.requires(PodMethod::QrScan) {
        steps.push(PodStepKind::QrScan);
    }
    steps.push(PodStepKind::Photo);
    steps
}

/// Transient rejection shown after a QR_SCAN mis-scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MisscanNotice {
    pub kind: PodRefuseKind,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone)]
struct ActiveFlow {
    order_id: OrderId,
    steps: Vec<PodStep>,
    index: usize,
}

/// The proof-of-delivery state machine for the single delivery in progress.
#[derive(Debug, Clone)]
pub struct Ph1PodFlow {
    phase: PodFlowPhase,
    flow: Option<ActiveFlow>,
    misscan: NoticeSlot<MisscanNotice>,
}

impl Default for Ph1PodFlow {
    fn default() -> Self {
        Self::new(Ph1PodConfig::mvp_v1())
    }
}

impl Ph1PodFlow {
    pub fn new(config: Ph1PodConfig) -> Self {
        Self {
            phase: PodFlowPhase::Idle,
            flow: None,
            misscan: NoticeSlot::new(config.misscan_notice_ttl_ms),
        }
    }

    pub fn phase(&self) -> PodFlowPhase {
        self.phase
    }

    pub fn order_id(&self) -> Option<&OrderId> {
        self.flow.as_ref().map(|f| &f.order_id)
    }

    pub fn index(&self) -> Option<usize> {
        self.flow.as_ref().map(|f| f.index)
    }

    pub fn steps(&self) -> Vec<PodStepKind> {
        self.flow
            .as_ref()
            .map(|f| f.steps.iter().map(PodStep::kind).collect())
            .unwrap_or_default()
    }

    pub fn current_step(&self) -> Option<&PodStep> {
        if self.phase != PodFlowPhase::Active {
            return None;
        }
        self.flow.as_ref().and_then(|f| f.steps.get(f.index))
    }

    pub fn current_kind(&self) -> Option<PodStepKind> {
        self.current_step().map(PodStep::kind)
    }

    pub fn can_advance(&self) -> bool {
        self.current_step().is_some_and(PodStep::is_complete)
    }

    pub fn misscan_notice(&self, now: MonotonicTimeNs) -> Option<&MisscanNotice> {
        self.misscan.current(now)
    }

    /// Drops an expired mis-scan notice; returns true when one was cleared.
    pub fn tick(&mut self, now: MonotonicTimeNs) -> bool {
        self.misscan.reap(now)
    }

    pub fn start(&mut self, order: &Order, customer: &CustomerConfig) -> PodCommandOutcome {
        match self.phase {
            PodFlowPhase::Active => {
                return refuse(
                    PodRefuseKind::FlowAlreadyActive,
                    reason_codes::POD_FLOW_ALREADY_ACTIVE,
                    "another delivery is in progress; reset it first",
                )
            }
            PodFlowPhase::Success => {
                return refuse(
                    PodRefuseKind::TerminalState,
                    reason_codes::POD_TERMINAL_STATE,
                    "delivery finished; reset before starting another",
                )
            }
            PodFlowPhase::Idle => {}
        }
        if order.status.is_terminal() {
            return refuse(
                PodRefuseKind::InvalidInput,
                reason_codes::POD_ORDER_ALREADY_DELIVERED,
                "order is already delivered",
            );
        }
        if order.customer_id != customer.customer_id {
            return refuse(
                PodRefuseKind::InvalidInput,
                reason_codes::POD_INPUT_INVALID,
                "customer configuration does not belong to this order",
            );
        }
        let expected = order.parcel_ids();
        let kinds = derive_step_kinds(customer);
        let steps = kinds
            .iter()
            .map(|k| PodStep::fresh(*k, &expected))
            .collect();
        self.flow = Some(ActiveFlow {
            order_id: order.order_id.clone(),
            steps,
            index: 0,
        });
        self.phase = PodFlowPhase::Active;
        self.misscan.clear();
        PodCommandOutcome::Started {
            order_id: order.order_id.clone(),
            steps: kinds,
        }
    }

    /// Moves forward when the current step is complete. On the last step this returns the proof
    /// the caller must hand to the completion sink; the flow stays on that step until
    /// `commit_success` records that the sink accepted it.
    pub fn advance(&mut self, now: MonotonicTimeNs) -> PodCommandOutcome {
        let flow = match self.active_flow_mut() {
            Ok(f) => f,
            Err(r) => return r,
        };
        let Some(step) = flow.steps.get(flow.index) else {
            return refuse(
                PodRefuseKind::InvalidInput,
                reason_codes::POD_INTERNAL_PIPELINE_ERROR,
                "step index out of range",
            );
        };
        if !step.is_complete() {
            return refuse(
                PodRefuseKind::IncompleteStep,
                reason_codes::POD_STEP_INCOMPLETE,
                incomplete_message(step.kind()),
            );
        }
        let from = step.kind();
        if flow.index + 1 < flow.steps.len() {
            flow.index += 1;
            return PodCommandOutcome::Moved {
                from,
                to: flow.steps[flow.index].kind(),
                index: flow.index,
            };
        }
        match build_proof(flow, now) {
            Ok(proof) => PodCommandOutcome::Completed(proof),
            Err(r) => r,
        }
    }

    /// Enters SUCCESS after the completion sink took `proof`. Returns false, leaving the flow
    /// untouched, unless `proof` belongs to the active flow and that flow sits on its last step.
    pub fn commit_success(&mut self, proof: &PodProof) -> bool {
        let on_last_step = self.phase == PodFlowPhase::Active
            && self
                .flow
                .as_ref()
                .is_some_and(|f| f.order_id == proof.order_id && f.index + 1 == f.steps.len());
        if on_last_step {
            self.phase = PodFlowPhase::Success;
            self.misscan.clear();
        }
        on_last_step
    }

    pub fn retreat(&mut self) -> PodCommandOutcome {
        let flow = match self.active_flow_mut() {
            Ok(f) => f,
            Err(r) => return r,
        };
        if flow.index == 0 {
            return refuse(
                PodRefuseKind::AtFirstStep,
                reason_codes::POD_AT_FIRST_STEP,
                "already at the first step",
            );
        }
        let from = flow.steps[flow.index].kind();
        flow.index -= 1;
        PodCommandOutcome::Moved {
            from,
            to: flow.steps[flow.index].kind(),
            index: flow.index,
        }
    }

    /// Discards the flow and all evidence. Valid from every state.
    pub fn reset(&mut self) -> PodCommandOutcome {
        self.flow = None;
        self.phase = PodFlowPhase::Idle;
        self.misscan.clear();
        PodCommandOutcome::Reset
    }

    pub fn set_otp_slot(&mut self, slot: usize, input: &str) -> PodCommandOutcome {
        let step = match self.current_step_mut(PodStepKind::Otp) {
            Ok(s) => s,
            Err(r) => return r,
        };
        let PodStep::Otp(otp) = step else {
            return wrong_step(PodStepKind::Otp);
        };
        match otp.set_slot(slot, input) {
            Ok(next_focus) => PodCommandOutcome::OtpSlotSet { next_focus },
            Err(_) => refuse(
                PodRefuseKind::InvalidInput,
                reason_codes::POD_INPUT_INVALID,
                "otp slot or character is invalid",
            ),
        }
    }

    pub fn set_recipient_name(&mut self, name: &str) -> PodCommandOutcome {
        let step = match self.current_step_mut(PodStepKind::RecipientName) {
            Ok(s) => s,
            Err(r) => return r,
        };
        if name.len() > 256 {
            return refuse(
                PodRefuseKind::InvalidInput,
                reason_codes::POD_INPUT_INVALID,
                "recipient name is too long",
            );
        }
        *step = PodStep::RecipientName(name.to_string());
        PodCommandOutcome::EvidenceRecorded(PodStepKind::RecipientName)
    }

    pub fn set_signature(&mut self, signature: Option<EvidencePayload>) -> PodCommandOutcome {
        let step = match self.current_step_mut(PodStepKind::Signature) {
            Ok(s) => s,
            Err(r) => return r,
        };
        *step = PodStep::Signature(signature);
        PodCommandOutcome::EvidenceRecorded(PodStepKind::Signature)
    }

    pub fn capture_photo(&mut self, photo: EvidencePayload) -> PodCommandOutcome {
        let step = match self.current_step_mut(PodStepKind::Photo) {
            Ok(s) => s,
            Err(r) => return r,
        };
        *step = PodStep::Photo(PhotoStage::Captured(photo));
        PodCommandOutcome::EvidenceRecorded(PodStepKind::Photo)
    }

    pub fn retake_photo(&mut self) -> PodCommandOutcome {
        let step = match self.current_step_mut(PodStepKind::Photo) {
            Ok(s) => s,
            Err(r) => return r,
        };
        *step = PodStep::Photo(PhotoStage::AwaitingCapture);
        PodCommandOutcome::EvidenceRecorded(PodStepKind::Photo)
    }

    /// Records a box scan during QR_SCAN. `route` is used to tell a box of another order
    /// apart from a code that is no parcel at all.
    pub fn scan_parcel(
        &mut self,
        now: MonotonicTimeNs,
        code: &str,
        route: &[Order],
    ) -> PodCommandOutcome {
        let step = match self.current_step_mut(PodStepKind::QrScan) {
            Ok(s) => s,
            Err(r) => return r,
        };
        let PodStep::QrScan { expected, scanned } = step else {
            return wrong_step(PodStepKind::QrScan);
        };
        if let Some(parcel_id) = expected.iter().find(|p| p.as_str() == code).cloned() {
            let fresh = scanned.insert(parcel_id.clone());
            let (scanned, expected) = (scanned.len(), expected.len());
            return PodCommandOutcome::Scanned(if fresh {
                PodScanOutcome::Counted {
                    parcel_id,
                    scanned,
                    expected,
                }
            } else {
                PodScanOutcome::AlreadyCounted {
                    parcel_id,
                    scanned,
                    expected,
                }
            });
        }
        let elsewhere = route.iter().any(|o| o.parcel_by_code(code).is_some());
        let (kind, reason_code, message) = if elsewhere {
            (
                PodRefuseKind::WrongParcel,
                reason_codes::POD_WRONG_PARCEL,
                "wrong box: parcel belongs to another order",
            )
        } else {
            (
                PodRefuseKind::NotFound,
                reason_codes::POD_PARCEL_NOT_FOUND,
                "scanned code matches no parcel",
            )
        };
        self.misscan.raise(
            MisscanNotice {
                kind,
                code: code.to_string(),
                message: message.to_string(),
            },
            now,
        );
        refuse(kind, reason_code, message)
    }

    fn active_flow_mut(&mut self) -> Result<&mut ActiveFlow, PodCommandOutcome> {
        match self.phase {
            PodFlowPhase::Idle => Err(refuse(
                PodRefuseKind::NoActiveFlow,
                reason_codes::POD_NO_ACTIVE_FLOW,
                "no delivery in progress",
            )),
            PodFlowPhase::Success => Err(refuse(
                PodRefuseKind::TerminalState,
                reason_codes::POD_TERMINAL_STATE,
                "delivery finished; only reset is available",
            )),
            PodFlowPhase::Active => self.flow.as_mut().ok_or_else(|| {
                refuse(
                    PodRefuseKind::NoActiveFlow,
                    reason_codes::POD_INTERNAL_PIPELINE_ERROR,
                    "active phase without flow state",
                )
            }),
        }
    }

    fn current_step_mut(&mut self, kind: PodStepKind) -> Result<&mut PodStep, PodCommandOutcome> {
        let flow = self.active_flow_mut()?;
        let index = flow.index;
        match flow.steps.get_mut(index) {
            Some(step) if step.kind() == kind => Ok(step),
            _ => Err(wrong_step(kind)),
        }
    }
}

fn incomplete_message(kind: PodStepKind) -> &'static str {
    match kind {
        PodStepKind::Otp => "enter all otp digits",
        PodStepKind::RecipientName => "enter the recipient name",
        PodStepKind::QrScan => "scan every parcel of this order",
        PodStepKind::Photo => "capture a photo first",
        PodStepKind::Details | PodStepKind::Signature => "step is incomplete",
    }
}

fn wrong_step(kind: PodStepKind) -> PodCommandOutcome {
    refuse(
        PodRefuseKind::WrongStep,
        reason_codes::POD_WRONG_STEP,
        match kind {
            PodStepKind::Details => "not on the details step",
            PodStepKind::Otp => "not on the otp step",
            PodStepKind::RecipientName => "not on the recipient name step",
            PodStepKind::Signature => "not on the signature step",
            PodStepKind::QrScan => "not on the box scan step",
            PodStepKind::Photo => "not on the photo step",
        },
    )
}

fn refuse(kind: PodRefuseKind, reason_code: ReasonCodeId, message: &str) -> PodCommandOutcome {
    match PodRefuse::v1(kind, reason_code, message.to_string()) {
        Ok(r) => PodCommandOutcome::Refused(r),
        Err(_) => PodCommandOutcome::Refused(PodRefuse {
            schema_version: PH1POD_CONTRACT_VERSION,
            kind,
            reason_code: reason_codes::POD_INTERNAL_PIPELINE_ERROR,
            message: "failed to build pod refuse".to_string(),
        }),
    }
}

/// Hashes evidence. `data:` URLs are decoded first so the digest covers the image bytes.
pub fn evidence_sha256_hex(payload: &EvidencePayload) -> String {
    let raw = payload.as_str();
    let decoded = raw
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .and_then(|(_, b64)| BASE64.decode(b64.trim()).ok());
    let digest = match decoded {
        Some(bytes) => Sha256::digest(&bytes),
        None => Sha256::digest(raw.as_bytes()),
    };
    hex_lower(&digest)
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn build_proof(flow: &ActiveFlow, now: MonotonicTimeNs) -> Result<PodProof, PodCommandOutcome> {
    let mut recipient_name = None;
    let mut otp_code = None;
    let mut signature_sha256 = None;
    let mut photo_sha256 = None;
    let mut scanned_parcels: BTreeSet<ParcelId> = BTreeSet::new();
    for step in &flow.steps {
        match step {
            PodStep::Details => {}
            PodStep::Otp(otp) => otp_code = otp.code(),
            PodStep::RecipientName(name) => recipient_name = Some(name.trim().to_string()),
            PodStep::Signature(sig) => signature_sha256 = sig.as_ref().map(evidence_sha256_hex),
            PodStep::QrScan { scanned, .. } => scanned_parcels.extend(scanned.iter().cloned()),
            PodStep::Photo(PhotoStage::Captured(photo)) => {
                photo_sha256 = Some(evidence_sha256_hex(photo))
            }
            PodStep::Photo(PhotoStage::AwaitingCapture) => {}
        }
    }
    let completed_steps: Vec<PodStepKind> = flow.steps.iter().map(PodStep::kind).collect();

    let mut h = Sha256::new();
    h.update(flow.order_id.as_str().as_bytes());
    for k in &completed_steps {
        h.update(b"|");
        h.update(k.as_str().as_bytes());
    }
    for v in [&recipient_name, &signature_sha256, &photo_sha256] {
        h.update(b"|");
        h.update(v.as_deref().unwrap_or("-").as_bytes());
    }
    for p in &scanned_parcels {
        h.update(b"|");
        h.update(p.as_str().as_bytes());
    }
    h.update(now.0.to_be_bytes());
    let digest = hex_lower(&h.finalize());
    let proof_ref = format!("pod_proof:{}", &digest[..16]);

    PodProof::v1(
        flow.order_id.clone(),
        completed_steps,
        recipient_name,
        otp_code,
        signature_sha256,
        photo_sha256,
        scanned_parcels.into_iter().collect(),
        now,
        proof_ref,
    )
    .map_err(|_| {
        refuse(
            PodRefuseKind::InvalidInput,
            reason_codes::POD_INTERNAL_PIPELINE_ERROR,
            "failed to build pod proof",
        )
    })
}
