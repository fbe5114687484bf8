#![forbid(unsafe_code)]

use hub_engines::ph1pod::{MisscanNotice, Ph1PodConfig, Ph1PodFlow};
use hub_kernel_contracts::ph1pod::{
    EvidencePayload, PodCommandOutcome, PodFlowPhase, PH1POD_ENGINE_ID,
};
use hub_kernel_contracts::ph1route::OrderId;
use hub_kernel_contracts::{ContractViolation, MonotonicTimeNs, Validate};
use hub_storage::repo::{DeliveryCompletionSink, RouteOrderRepo};
use hub_storage::route_store::StorageError;
use tracing::{debug, info, warn};

pub mod reason_codes {
    use hub_kernel_contracts::ReasonCodeId;

    // PH1.POD OS wiring reason-code namespace.
    pub const PH1_POD_DELIVERY_COMPLETED: ReasonCodeId = ReasonCodeId(0x504F_0101);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ph1PodWiringConfig {
    pub pod_enabled: bool,
}

impl Ph1PodWiringConfig {
    pub fn mvp_v1(pod_enabled: bool) -> Self {
        Self { pod_enabled }
    }
}

/// Driver actions against the proof-of-delivery flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodCommand {
    Start { order_id: OrderId },
    Advance,
    Retreat,
    Reset,
    SetOtpSlot { slot: usize, input: String },
    SetRecipientName(String),
    SetSignature(Option<EvidencePayload>),
    CapturePhoto(EvidencePayload),
    RetakePhoto,
    ScanParcel { code: String },
}

impl PodCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodCommand::Start { .. } => "START",
            PodCommand::Advance => "ADVANCE",
            PodCommand::Retreat => "RETREAT",
            PodCommand::Reset => "RESET",
            PodCommand::SetOtpSlot { .. } => "SET_OTP_SLOT",
            PodCommand::SetRecipientName(_) => "SET_RECIPIENT_NAME",
            PodCommand::SetSignature(_) => "SET_SIGNATURE",
            PodCommand::CapturePhoto(_) => "CAPTURE_PHOTO",
            PodCommand::RetakePhoto => "RETAKE_PHOTO",
            PodCommand::ScanParcel { .. } => "SCAN_PARCEL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ph1PodWiringOutcome {
    NotInvokedDisabled,
    Handled(PodCommandOutcome),
}

/// The POD flow controller: one flow at a time. Passing the last step hands the proof to the
/// completion sink, and the flow enters SUCCESS only once the sink accepted it.
#[derive(Debug, Clone)]
pub struct Ph1PodWiring {
    config: Ph1PodWiringConfig,
    flow: Ph1PodFlow,
}

impl Ph1PodWiring {
    pub fn new(
        config: Ph1PodWiringConfig,
        flow_config: Ph1PodConfig,
    ) -> Result<Self, ContractViolation> {
        flow_config.validate()?;
        Ok(Self {
            config,
            flow: Ph1PodFlow::new(flow_config),
        })
    }

    pub fn flow(&self) -> &Ph1PodFlow {
        &self.flow
    }

    pub fn misscan_notice(&self, now: MonotonicTimeNs) -> Option<&MisscanNotice> {
        self.flow.misscan_notice(now)
    }

    pub fn run_command<S>(
        &mut self,
        store: &mut S,
        now: MonotonicTimeNs,
        cmd: PodCommand,
    ) -> Result<Ph1PodWiringOutcome, StorageError>
    where
        S: RouteOrderRepo + DeliveryCompletionSink,
    {
        if !self.config.pod_enabled {
            return Ok(Ph1PodWiringOutcome::NotInvokedDisabled);
        }
        self.flow.tick(now);
        let command = cmd.as_str();

        let out = match cmd {
            PodCommand::Start { order_id } => {
                let order = store.order_row(&order_id).ok_or_else(|| {
                    StorageError::ForeignKeyViolation {
                        table: "orders.order_id",
                        key: order_id.as_str().to_string(),
                    }
                })?;
                let customer = store.customer_config_row(&order.customer_id).ok_or_else(|| {
                    StorageError::ForeignKeyViolation {
                        table: "customer_configs.customer_id",
                        key: order.customer_id.as_str().to_string(),
                    }
                })?;
                self.flow.start(order, customer)
            }
            PodCommand::Advance => self.flow.advance(now),
            PodCommand::Retreat => self.flow.retreat(),
            PodCommand::Reset => self.flow.reset(),
            PodCommand::SetOtpSlot { slot, input } => self.flow.set_otp_slot(slot, &input),
            PodCommand::SetRecipientName(name) => self.flow.set_recipient_name(&name),
            PodCommand::SetSignature(sig) => self.flow.set_signature(sig),
            PodCommand::CapturePhoto(photo) => self.flow.capture_photo(photo),
            PodCommand::RetakePhoto => self.flow.retake_photo(),
            PodCommand::ScanParcel { code } => {
                self.flow.scan_parcel(now, &code, store.route_orders())
            }
        };

        match &out {
            PodCommandOutcome::Started { order_id, steps } => {
                let steps: Vec<&str> = steps.iter().map(|s| s.as_str()).collect();
                info!(
                    engine = PH1POD_ENGINE_ID,
                    order_id = order_id.as_str(),
                    ?steps,
                    "pod flow started"
                );
            }
            PodCommandOutcome::Moved { from, to, index } => {
                debug!(from = from.as_str(), to = to.as_str(), index, "pod step moved");
            }
            PodCommandOutcome::Completed(proof) => {
                if let Err(err) = store.complete_delivery(
                    &proof.order_id,
                    proof.clone(),
                    reason_codes::PH1_POD_DELIVERY_COMPLETED,
                ) {
                    warn!(
                        engine = PH1POD_ENGINE_ID,
                        order_id = proof.order_id.as_str(),
                        error = %err,
                        "completion sink rejected pod proof; flow stays on its last step"
                    );
                    return Err(err);
                }
                self.flow.commit_success(proof);
                info!(
                    engine = PH1POD_ENGINE_ID,
                    order_id = proof.order_id.as_str(),
                    proof_ref = proof.proof_ref.as_str(),
                    "pod flow finalized"
                );
            }
            PodCommandOutcome::Reset => info!("pod flow reset"),
            PodCommandOutcome::Refused(r) => warn!(
                engine = PH1POD_ENGINE_ID,
                command,
                kind = ?r.kind,
                reason_code = r.reason_code.0,
                "pod command refused: {}",
                r.message
            ),
            PodCommandOutcome::OtpSlotSet { .. }
            | PodCommandOutcome::EvidenceRecorded(_)
            | PodCommandOutcome::Scanned(_) => debug!(command, "pod evidence updated"),
        }
        Ok(Ph1PodWiringOutcome::Handled(out))
    }

    pub fn is_success(&self) -> bool {
        self.flow.phase() == PodFlowPhase::Success
    }
}
