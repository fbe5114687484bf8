#![forbid(unsafe_code)]

use hub_kernel_contracts::ph1pod::PodProof;
use hub_kernel_contracts::ph1route::{
    CustomerConfig, CustomerId, Order, OrderId, ParcelId, ParcelUpdate,
};
use hub_kernel_contracts::ReasonCodeId;

use crate::route_store::{RouteStore, StorageError};

/// Read access to the route a driver is working.
pub trait RouteOrderRepo {
    fn route_orders(&self) -> &[Order];
    fn order_row(&self, order_id: &OrderId) -> Option<&Order>;
    fn customer_config_row(&self, customer_id: &CustomerId) -> Option<&CustomerConfig>;
}

/// Receives the parcel mutations committed by the scan reconciler.
pub trait ParcelUpdateSink {
    fn apply_parcel_update(
        &mut self,
        parcel_id: &ParcelId,
        update: ParcelUpdate,
        reason_code: ReasonCodeId,
    ) -> Result<(), StorageError>;
}

/// Receives the single completion signal of a finished proof-of-delivery flow.
pub trait DeliveryCompletionSink {
    fn complete_delivery(
        &mut self,
        order_id: &OrderId,
        proof: PodProof,
        reason_code: ReasonCodeId,
    ) -> Result<(), StorageError>;
}

impl RouteOrderRepo for RouteStore {
    fn route_orders(&self) -> &[Order] {
        self.orders()
    }

    fn order_row(&self, order_id: &OrderId) -> Option<&Order> {
        self.order(order_id)
    }

    fn customer_config_row(&self, customer_id: &CustomerId) -> Option<&CustomerConfig> {
        self.customer_config(customer_id)
    }
}

impl ParcelUpdateSink for RouteStore {
    fn apply_parcel_update(
        &mut self,
        parcel_id: &ParcelId,
        update: ParcelUpdate,
        reason_code: ReasonCodeId,
    ) -> Result<(), StorageError> {
        RouteStore::apply_parcel_update(self, parcel_id, update, reason_code)
    }
}

impl DeliveryCompletionSink for RouteStore {
    fn complete_delivery(
        &mut self,
        order_id: &OrderId,
        proof: PodProof,
        reason_code: ReasonCodeId,
    ) -> Result<(), StorageError> {
        self.mark_delivered(order_id, proof, reason_code)
    }
}
