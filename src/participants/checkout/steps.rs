//! Forward and inverse actions of the checkout steps.
//!
//! Every function runs under the ledger lock, so checks and writes within
//! one action are atomic.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ledger::{new_id, LedgerState, Order, OrderStatus, Payment, PaymentStatus, Ticket, TicketStatus};
use super::{
    CheckoutRequest, TicketType, APPLY_DISCOUNTS, CALCULATE_PRICING, CREATE_ORDER,
    VALIDATE_ITEMS,
};
use crate::interfaces::participant::{
    CompensationRequest, ParticipantError, Result, StepReply, StepRequest,
};
use crate::model::SagaContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedItem {
    pub item_id: String,
    pub ticket_type: TicketType,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValidatedItems {
    items: Vec<ValidatedItem>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hold {
    item_id: String,
    quantity: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pricing {
    base_total_cents: i64,
    #[serde(default)]
    discount_total_cents: i64,
    #[serde(default)]
    final_total_cents: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRef {
    order_id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoucherRef {
    #[serde(default)]
    voucher_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRef {
    payment_id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TicketRefs {
    ticket_ids: Vec<String>,
}

fn rejected(message: impl Into<String>) -> ParticipantError {
    ParticipantError::Rejected(message.into())
}

fn checkout_request(context: &SagaContext) -> Result<CheckoutRequest> {
    serde_json::from_value(context.payload.clone())
        .map_err(|e| rejected(format!("invalid checkout request: {e}")))
}

/// Output of an earlier step, decoded.
fn step_output<T: DeserializeOwned>(context: &SagaContext, step: &str) -> Result<T> {
    let output = context
        .outputs
        .get(step)
        .ok_or_else(|| rejected(format!("missing output of {step}")))?;
    serde_json::from_value(output.clone())
        .map_err(|e| rejected(format!("malformed output of {step}: {e}")))
}

/// Compensation token, decoded. A missing token decodes as `T::default()`.
fn token<T: DeserializeOwned + Default>(request: &CompensationRequest) -> Result<T> {
    match &request.compensation_token {
        None => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| rejected(format!("malformed compensation token: {e}"))),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| rejected(format!("unserializable reply: {e}")))
}

pub fn validate_items(state: &mut LedgerState, request: &StepRequest) -> Result<StepReply> {
    let checkout = checkout_request(&request.context)?;
    checkout.validate().map_err(rejected)?;

    let mut validated: Vec<ValidatedItem> = Vec::with_capacity(checkout.items.len());
    for item in &checkout.items {
        let item_id = item.item_id().unwrap_or_default();
        let entry = state
            .catalog
            .get(item_id)
            .ok_or_else(|| rejected(format!("unknown item {item_id}")))?;
        if entry.ticket_type != item.ticket_type {
            return Err(rejected(format!(
                "item {item_id} is not a {:?} ticket",
                item.ticket_type
            )));
        }
        validated.push(ValidatedItem {
            item_id: item_id.to_string(),
            ticket_type: item.ticket_type,
            quantity: item.quantity,
            unit_price_cents: entry.price_cents,
        });
    }

    // Check every line before holding anything.
    let mut holds: Vec<Hold> = Vec::new();
    for line in &validated {
        let requested: u64 = validated
            .iter()
            .filter(|other| other.item_id == line.item_id)
            .map(|other| u64::from(other.quantity))
            .sum();
        let stock = state.catalog.get(&line.item_id).and_then(|item| item.stock);
        if let Some(stock) = stock {
            if requested > u64::from(stock) {
                return Err(rejected(format!(
                    "insufficient capacity for {}: requested {requested}, available {stock}",
                    line.item_id
                )));
            }
            holds.push(Hold {
                item_id: line.item_id.clone(),
                quantity: line.quantity,
            });
        }
    }
    for hold in &holds {
        if let Some(item) = state.catalog.get_mut(&hold.item_id) {
            item.stock = item.stock.map(|s| s - hold.quantity);
        }
    }

    Ok(StepReply::new(to_value(&ValidatedItems { items: validated })?)
        .with_token(json!({ "holds": holds })))
}

pub fn release_holds(state: &mut LedgerState, request: &CompensationRequest) -> Result<()> {
    #[derive(Default, Deserialize)]
    struct Holds {
        #[serde(default)]
        holds: Vec<Hold>,
    }

    let token: Holds = token(request)?;
    for hold in token.holds {
        if let Some(item) = state.catalog.get_mut(&hold.item_id) {
            item.stock = item.stock.map(|s| s.saturating_add(hold.quantity));
        }
    }
    Ok(())
}

pub fn calculate_pricing(request: &StepRequest) -> Result<StepReply> {
    let validated: ValidatedItems = step_output(&request.context, VALIDATE_ITEMS)?;
    let base_total_cents = validated
        .items
        .iter()
        .map(|item| item.unit_price_cents * i64::from(item.quantity))
        .sum::<i64>();

    Ok(StepReply::new(json!({ "baseTotalCents": base_total_cents })))
}

pub fn apply_discounts(state: &mut LedgerState, request: &StepRequest) -> Result<StepReply> {
    let checkout = checkout_request(&request.context)?;
    let pricing: Pricing = step_output(&request.context, CALCULATE_PRICING)?;
    let base = pricing.base_total_cents;

    let mut discount = 0;
    if let Some(package_id) = &checkout.discount_package_id {
        let percent = state
            .discount_packages
            .get(package_id)
            .ok_or_else(|| rejected(format!("unknown discount package {package_id}")))?;
        discount += base * i64::from(*percent) / 100;
    }

    if let Some(voucher_id) = &checkout.voucher_id {
        let voucher = state
            .vouchers
            .get_mut(voucher_id)
            .ok_or_else(|| rejected(format!("unknown voucher {voucher_id}")))?;
        if voucher.redeemed_by.is_some_and(|holder| holder != request.saga_id) {
            return Err(rejected(format!("voucher {voucher_id} already redeemed")));
        }
        if base < voucher.min_total_cents {
            return Err(rejected(format!(
                "voucher {voucher_id} requires a total of at least {} cents",
                voucher.min_total_cents
            )));
        }
        voucher.redeemed_by = Some(request.saga_id);
        discount += voucher.discount_cents;
    }

    let discount = discount.min(base);
    let pricing = Pricing {
        base_total_cents: base,
        discount_total_cents: discount,
        final_total_cents: base - discount,
    };

    Ok(StepReply::new(to_value(&pricing)?).with_token(to_value(&VoucherRef {
        voucher_id: checkout.voucher_id,
    })?))
}

pub fn release_voucher(state: &mut LedgerState, request: &CompensationRequest) -> Result<()> {
    let token: VoucherRef = token(request)?;
    if let Some(voucher) = token.voucher_id.and_then(|id| state.vouchers.get_mut(&id)) {
        if voucher.redeemed_by == Some(request.saga_id) {
            voucher.redeemed_by = None;
        }
    }
    Ok(())
}

pub fn create_order(state: &mut LedgerState, request: &StepRequest) -> Result<StepReply> {
    let checkout = checkout_request(&request.context)?;
    let pricing: Pricing = step_output(&request.context, APPLY_DISCOUNTS)?;

    let order = Order {
        id: new_id("ord"),
        saga_id: request.saga_id,
        customer_id: checkout.customer_id,
        base_total_cents: pricing.base_total_cents,
        discount_total_cents: pricing.discount_total_cents,
        final_total_cents: pricing.final_total_cents,
        status: OrderStatus::Pending,
    };
    let order_id = order.id.clone();
    state.orders.insert(order_id.clone(), order);

    Ok(StepReply::new(json!({
        "orderId": order_id,
        "finalTotalCents": pricing.final_total_cents,
    }))
    .with_token(json!({ "orderId": order_id })))
}

pub fn cancel_order(state: &mut LedgerState, request: &CompensationRequest) -> Result<()> {
    let token: Option<OrderRef> = token(request)?;
    if let Some(order) = token.and_then(|t| state.orders.get_mut(&t.order_id)) {
        order.status = OrderStatus::Cancelled;
    }
    Ok(())
}

pub fn process_payment(state: &mut LedgerState, request: &StepRequest) -> Result<StepReply> {
    let checkout = checkout_request(&request.context)?;
    let order_ref: OrderRef = step_output(&request.context, CREATE_ORDER)?;
    state.ensure_gateway(checkout.payment_method)?;

    let order = state
        .orders
        .get_mut(&order_ref.order_id)
        .ok_or_else(|| rejected(format!("unknown order {}", order_ref.order_id)))?;
    if order.status != OrderStatus::Pending {
        return Err(rejected(format!(
            "order {} is {:?}, expected PENDING",
            order.id, order.status
        )));
    }
    order.status = OrderStatus::Paid;

    let payment = Payment {
        id: new_id("pay"),
        order_id: order.id.clone(),
        method: checkout.payment_method,
        amount_cents: order.final_total_cents,
        status: PaymentStatus::Completed,
    };
    let reply = StepReply::new(json!({
        "paymentId": payment.id,
        "method": payment.method,
        "amountCents": payment.amount_cents,
        "status": payment.status,
    }))
    .with_token(json!({ "paymentId": payment.id }));
    state.payments.insert(payment.id.clone(), payment);

    Ok(reply)
}

pub fn refund_payment(state: &mut LedgerState, request: &CompensationRequest) -> Result<()> {
    let token: Option<PaymentRef> = token(request)?;
    let Some(payment_id) = token.map(|t| t.payment_id) else {
        return Ok(());
    };
    let Some(method) = state.payments.get(&payment_id).map(|p| p.method) else {
        return Ok(());
    };
    state.ensure_gateway(method)?;

    if let Some(payment) = state.payments.get_mut(&payment_id) {
        payment.status = PaymentStatus::Refunded;
        let order_id = payment.order_id.clone();
        if let Some(order) = state.orders.get_mut(&order_id) {
            order.status = OrderStatus::Pending;
        }
    }
    Ok(())
}

pub fn generate_tickets(state: &mut LedgerState, request: &StepRequest) -> Result<StepReply> {
    if let Some(reason) = &state.ticketing_suspended {
        return Err(rejected(format!("ticket issuing suspended: {reason}")));
    }
    let validated: ValidatedItems = step_output(&request.context, VALIDATE_ITEMS)?;
    let order_ref: OrderRef = step_output(&request.context, CREATE_ORDER)?;

    let mut ticket_ids = Vec::new();
    for item in &validated.items {
        for _ in 0..item.quantity {
            let ticket = Ticket {
                id: new_id("tkt"),
                order_id: order_ref.order_id.clone(),
                item_id: item.item_id.clone(),
                ticket_type: item.ticket_type,
                status: TicketStatus::Active,
            };
            ticket_ids.push(ticket.id.clone());
            state.tickets.insert(ticket.id.clone(), ticket);
        }
    }

    let refs = to_value(&TicketRefs { ticket_ids })?;
    Ok(StepReply::new(refs.clone()).with_token(refs))
}

pub fn void_tickets(state: &mut LedgerState, request: &CompensationRequest) -> Result<()> {
    let token: TicketRefs = token(request)?;
    for id in token.ticket_ids {
        if let Some(ticket) = state.tickets.get_mut(&id) {
            ticket.status = TicketStatus::Voided;
        }
    }
    Ok(())
}
