//! HTTP surface of the notification subsystem: endpoint registration for
//! signed-in users and the delivery-created hook.

pub mod middleware;
pub mod routes;
pub mod state;
