//! Flow blockchain adapters for the ownership oracle and the event source.

pub mod cadence;
pub mod client;
pub mod events;
pub mod ownership;

pub use client::FlowAccessClient;
pub use events::FlowEventSource;
pub use ownership::FlowOwnershipOracle;
