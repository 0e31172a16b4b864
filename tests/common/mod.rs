//! Domain fixtures shared by the integration tests: a counter aggregate, a
//! shopping cart aggregate, and a cross-cart read model.
#![allow(dead_code)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use streamfold::{Aggregate, EventRecord, Options, Projection, Version};

// --- counter ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub id: Option<u64>,
    pub value: u64,
}

#[derive(Debug, Clone)]
pub enum CounterCommand {
    Create { id: u64 },
    Increment { amount: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CounterEvent {
    Created { id: u64 },
    Incremented { amount: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    #[error("counter already created")]
    AlreadyCreated,
    #[error("counter does not exist yet")]
    NotCreated,
}

impl Aggregate for Counter {
    const AGGREGATE_TYPE: &'static str = "counter";

    type Command = CounterCommand;
    type DomainEvent = CounterEvent;
    type Error = CounterError;

    fn handle(&self, cmd: Self::Command) -> Result<Vec<Self::DomainEvent>, Self::Error> {
        match cmd {
            CounterCommand::Create { id } => {
                if self.id.is_some() {
                    return Err(CounterError::AlreadyCreated);
                }
                Ok(vec![CounterEvent::Created { id }])
            }
            CounterCommand::Increment { amount } => {
                if self.id.is_none() {
                    return Err(CounterError::NotCreated);
                }
                Ok(vec![CounterEvent::Incremented { amount }])
            }
        }
    }

    fn apply(mut self, event: &Self::DomainEvent) -> Self {
        match event {
            CounterEvent::Created { id } => self.id = Some(*id),
            CounterEvent::Incremented { amount } => self.value += amount,
        }
        self
    }
}

// --- shopping cart ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub created: bool,
    pub items: HashMap<String, u32>,
}

#[derive(Debug, Clone)]
pub enum CartCommand {
    Create,
    Add { sku: String, quantity: u32 },
    Remove { sku: String, quantity: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CartEvent {
    Created,
    ItemAdded { sku: String, quantity: u32 },
    ItemRemoved { sku: String, quantity: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum CartError {
    #[error("cart already created")]
    AlreadyCreated,
    #[error("cart does not exist yet")]
    NotCreated,
    #[error("cart does not hold {quantity} of {sku}")]
    InsufficientQuantity { sku: String, quantity: u32 },
}

impl Aggregate for Cart {
    const AGGREGATE_TYPE: &'static str = "cart";

    type Command = CartCommand;
    type DomainEvent = CartEvent;
    type Error = CartError;

    fn handle(&self, cmd: Self::Command) -> Result<Vec<Self::DomainEvent>, Self::Error> {
        match cmd {
            CartCommand::Create => {
                if self.created {
                    return Err(CartError::AlreadyCreated);
                }
                Ok(vec![CartEvent::Created])
            }
            CartCommand::Add { sku, quantity } => {
                if !self.created {
                    return Err(CartError::NotCreated);
                }
                Ok(vec![CartEvent::ItemAdded { sku, quantity }])
            }
            CartCommand::Remove { sku, quantity } => {
                if !self.created {
                    return Err(CartError::NotCreated);
                }
                if self.items.get(&sku).copied().unwrap_or(0) < quantity {
                    return Err(CartError::InsufficientQuantity { sku, quantity });
                }
                Ok(vec![CartEvent::ItemRemoved { sku, quantity }])
            }
        }
    }

    fn apply(mut self, event: &Self::DomainEvent) -> Self {
        match event {
            CartEvent::Created => self.created = true,
            CartEvent::ItemAdded { sku, quantity } => {
                *self.items.entry(sku.clone()).or_insert(0) += quantity;
            }
            CartEvent::ItemRemoved { sku, quantity } => {
                if let Some(held) = self.items.get_mut(sku) {
                    *held = held.saturating_sub(*quantity);
                    if *held == 0 {
                        self.items.remove(sku);
                    }
                }
            }
        }
        self
    }
}

// --- carts read model ---

/// Per-cart item quantities across every cart stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CartsState {
    pub carts: HashMap<String, HashMap<String, u32>>,
}

impl Projection for CartsState {
    const NAME: &'static str = "carts-state";

    fn init(_opts: &Options) -> (Self, Version) {
        (Self::default(), Version::ALL)
    }

    fn apply(&mut self, record: &EventRecord) {
        if record.aggregate_ref.aggregate_type != Cart::AGGREGATE_TYPE {
            return;
        }
        // Reconstruct the adjacently tagged event from the envelope.
        let tagged = if record.payload.is_null() {
            serde_json::json!({"type": record.event_type})
        } else {
            serde_json::json!({"type": record.event_type, "data": record.payload})
        };
        let Ok(event) = serde_json::from_value::<CartEvent>(tagged) else {
            return;
        };

        let cart = self
            .carts
            .entry(record.aggregate_ref.instance_id.clone())
            .or_default();
        match event {
            CartEvent::Created => {}
            CartEvent::ItemAdded { sku, quantity } => {
                *cart.entry(sku).or_insert(0) += quantity;
            }
            CartEvent::ItemRemoved { sku, quantity } => {
                if let Some(held) = cart.get_mut(&sku) {
                    *held = held.saturating_sub(quantity);
                    if *held == 0 {
                        cart.remove(&sku);
                    }
                }
            }
        }
    }
}
