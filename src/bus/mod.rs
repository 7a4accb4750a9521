// NATS bus integration: state mirroring and remote commands

mod client;
mod publisher;

pub use client::{subject_token, BusClient, BusConfig};
pub use publisher::{StateMessage, StatePublisher};
