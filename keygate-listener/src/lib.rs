pub mod handler;
pub mod identity;
mod metrics;
pub mod secret;
pub mod server;

pub use handler::{ConnectionHandler, PingHandler};
pub use secret::ActivationState;
pub use server::KeyServer;
