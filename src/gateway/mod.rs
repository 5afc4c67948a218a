//! Interaction intake: decoding, dispatch and the HTTP endpoint.

pub mod command;
pub mod custom_id;
pub mod dispatcher;
pub mod interaction;
pub mod registration;
pub mod responder;
pub mod server;

pub use command::{decode, DecodeError, GatewayCommand};
pub use dispatcher::Gateway;
pub use interaction::{Interaction, InteractionKind};
pub use responder::{HttpResponder, Responder};
pub use server::{router, serve, ServerState, SignatureVerifier};
