//! Testing utilities and mock implementations
//!
//! [`mocks`] lets the client be exercised without a network; [`broker`] is a
//! minimal in-process MQTT broker for driving the rumqttc transport.

pub mod broker;
pub mod mocks;

pub use broker::{wait_for, BrokerLog, FakeBroker};
pub use mocks::*;
