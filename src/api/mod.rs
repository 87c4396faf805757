//! Broker access: the MT5 bridge client and a paper broker for dry runs.

mod bridge_client;
mod broker;
mod paper;
mod types;

pub use bridge_client::BridgeClient;
pub use broker::Broker;
pub use paper::PaperBroker;
