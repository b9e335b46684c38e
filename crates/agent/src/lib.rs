//! Client half of the notification subsystem.
//!
//! `RegistrationAgent` asks for notification permission and keeps this
//! device's endpoint registered for the signed-in user. The receiver types
//! render incoming messages as an in-app banner or a system notification.
//! Platform capabilities (push client, identity, system notifications,
//! navigation, preference storage) are injected through the traits in
//! [`platform`] and [`preferences`].

pub mod agent;
pub mod client;
pub mod config;
pub mod platform;
pub mod preferences;
pub mod receiver;

pub use agent::{AgentState, RegistrationAgent, RegistrationError};
pub use config::AgentConfig;
