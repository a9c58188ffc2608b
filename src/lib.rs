//! Pull-based queue consumer with bounded in-flight messages, a fixed worker
//! pool, and optional cross-instance de-duplication through leases.
//!
//! The pieces, leaf first:
//! - [`MessageSource`]: whatever queue the messages come from (SQS behind the `sqs` feature)
//! - [`Poller`]: single-message receive / delete on top of a source
//! - [`lease::LeaseStore`]: in-memory, or Redis behind the `redis` feature
//! - [`Runner`]: the worker pool tying them to a [`MessageConsumer`]

mod client;
pub mod config;
mod consumer;
mod error;
pub mod impls;
pub mod lease;
mod message;
mod poller;
mod runner;

#[cfg(test)]
mod test_utils;

pub use client::MessageSource;
pub use consumer::{
    consumer_fn, ConsumerFn, MessageConsumer, MessageConsumptionError, MessageConsumptionOutcome,
};
pub use error::{LeaseError, MessageClientError, PollerError, RunnerError};
pub use message::{DeliveryToken, Message};
pub use poller::Poller;
pub use runner::{AdmissionGate, AdmissionSlot, Runner, RunnerConfig};
