//! Link layer: negotiation state machine, reliable delivery, facade.

mod inbound;
mod shared;
mod state;
mod transport;
mod worker;

pub use state::LinkState;
pub use transport::H5Transport;
