//! Metro ticket checkout participants.
//!
//! Six in-process participants, one per checkout step, sharing a
//! `CheckoutLedger`:
//!
//! | Step                | Forward action                  | Inverse action      |
//! |---------------------|---------------------------------|---------------------|
//! | `validate-items`    | check catalog, hold stock       | release holds       |
//! | `calculate-pricing` | base total in cents             | nothing to undo     |
//! | `apply-discounts`   | package percentage, voucher     | release voucher     |
//! | `create-order`      | create `PENDING` order          | cancel order        |
//! | `process-payment`   | charge via CASH / VNPAY / PAYOS | refund              |
//! | `generate-tickets`  | issue one ticket per unit       | void tickets        |
//!
//! The checkout request travels as the saga payload; each step reads the
//! outputs of earlier steps from the saga context.

mod ledger;
mod steps;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::interfaces::participant::{
    CompensationRequest, Participant, Result, StepReply, StepRequest,
};
use crate::model::StepDefinition;

pub use ledger::{
    CatalogItem, CheckoutLedger, LedgerState, Order, OrderStatus, Payment, PaymentStatus, Ticket,
    TicketStatus, Voucher,
};

/// Saga type of the built-in checkout workflow.
pub const CHECKOUT_SAGA_TYPE: &str = "checkout";

pub const VALIDATE_ITEMS: &str = "validate-items";
pub const CALCULATE_PRICING: &str = "calculate-pricing";
pub const APPLY_DISCOUNTS: &str = "apply-discounts";
pub const CREATE_ORDER: &str = "create-order";
pub const PROCESS_PAYMENT: &str = "process-payment";
pub const GENERATE_TICKETS: &str = "generate-tickets";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketType {
    #[serde(rename = "P2P")]
    P2p,
    #[serde(rename = "TIMED")]
    Timed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Vnpay,
    Payos,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "CASH",
            Self::Vnpay => "VNPAY",
            Self::Payos => "PAYOS",
        }
    }
}

/// One line of a checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItem {
    pub ticket_type: TicketType,
    /// Journey id for `P2P` tickets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p2p_journey_id: Option<String>,
    /// Plan id for `TIMED` tickets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timed_ticket_plan_id: Option<String>,
    pub quantity: u32,
}

impl CheckoutItem {
    /// Catalog id matching the ticket type.
    pub fn item_id(&self) -> Option<&str> {
        match self.ticket_type {
            TicketType::P2p => self.p2p_journey_id.as_deref(),
            TicketType::Timed => self.timed_ticket_plan_id.as_deref(),
        }
    }
}

/// Body of `POST /orders/checkout-saga`, and the checkout saga payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub items: Vec<CheckoutItem>,
    pub payment_method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_package_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voucher_id: Option<String>,
    /// Customer for offline purchases made by staff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

/// Most tickets a single checkout may issue, across all lines.
pub const MAX_TICKETS_PER_CHECKOUT: u32 = 100;

impl CheckoutRequest {
    /// Shape checks that do not need the ledger.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.items.is_empty() {
            return Err("checkout has no items".to_string());
        }
        let mut total: u64 = 0;
        for (index, item) in self.items.iter().enumerate() {
            if item.quantity == 0 {
                return Err(format!("item {index}: quantity must be at least 1"));
            }
            total += u64::from(item.quantity);
            if total > u64::from(MAX_TICKETS_PER_CHECKOUT) {
                return Err(format!(
                    "checkout exceeds {MAX_TICKETS_PER_CHECKOUT} tickets"
                ));
            }
            if item.item_id().map_or(true, str::is_empty) {
                return Err(format!("item {index}: missing id for {:?} ticket", item.ticket_type));
            }
        }
        Ok(())
    }
}

/// Ordered steps of the checkout saga.
pub fn checkout_steps() -> Vec<StepDefinition> {
    CheckoutStep::ALL
        .iter()
        .map(|step| StepDefinition::new(step.name(), step.name()))
        .collect()
}

/// Which checkout action a participant performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStep {
    ValidateItems,
    CalculatePricing,
    ApplyDiscounts,
    CreateOrder,
    ProcessPayment,
    GenerateTickets,
}

impl CheckoutStep {
    pub const ALL: [CheckoutStep; 6] = [
        Self::ValidateItems,
        Self::CalculatePricing,
        Self::ApplyDiscounts,
        Self::CreateOrder,
        Self::ProcessPayment,
        Self::GenerateTickets,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ValidateItems => VALIDATE_ITEMS,
            Self::CalculatePricing => CALCULATE_PRICING,
            Self::ApplyDiscounts => APPLY_DISCOUNTS,
            Self::CreateOrder => CREATE_ORDER,
            Self::ProcessPayment => PROCESS_PAYMENT,
            Self::GenerateTickets => GENERATE_TICKETS,
        }
    }
}

/// In-process participant for one checkout step.
pub struct CheckoutParticipant {
    step: CheckoutStep,
    ledger: Arc<CheckoutLedger>,
}

impl CheckoutParticipant {
    pub fn new(step: CheckoutStep, ledger: Arc<CheckoutLedger>) -> Self {
        Self { step, ledger }
    }
}

#[async_trait]
impl Participant for CheckoutParticipant {
    fn name(&self) -> &str {
        self.step.name()
    }

    async fn execute(&self, request: &StepRequest) -> Result<StepReply> {
        self.ledger
            .execute_once(&request.idempotency_key, |state| match self.step {
                CheckoutStep::ValidateItems => steps::validate_items(state, request),
                CheckoutStep::CalculatePricing => steps::calculate_pricing(request),
                CheckoutStep::ApplyDiscounts => steps::apply_discounts(state, request),
                CheckoutStep::CreateOrder => steps::create_order(state, request),
                CheckoutStep::ProcessPayment => steps::process_payment(state, request),
                CheckoutStep::GenerateTickets => steps::generate_tickets(state, request),
            })
            .await
    }

    async fn compensate(&self, request: &CompensationRequest) -> Result<()> {
        self.ledger
            .compensate_once(&request.idempotency_key, |state| match self.step {
                CheckoutStep::ValidateItems => steps::release_holds(state, request),
                CheckoutStep::CalculatePricing => Ok(()),
                CheckoutStep::ApplyDiscounts => steps::release_voucher(state, request),
                CheckoutStep::CreateOrder => steps::cancel_order(state, request),
                CheckoutStep::ProcessPayment => steps::refund_payment(state, request),
                CheckoutStep::GenerateTickets => steps::void_tickets(state, request),
            })
            .await
    }
}

/// All checkout participants over one ledger.
pub fn checkout_participants(ledger: Arc<CheckoutLedger>) -> Vec<Arc<dyn Participant>> {
    CheckoutStep::ALL
        .iter()
        .map(|step| {
            Arc::new(CheckoutParticipant::new(*step, ledger.clone())) as Arc<dyn Participant>
        })
        .collect()
}

#[cfg(test)]
mod tests;
