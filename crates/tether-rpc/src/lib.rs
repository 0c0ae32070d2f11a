//! # tether-rpc
//!
//! Protocol layer of the Tether command channel, independent of any transport:
//!
//! - [`types`]: JSON-RPC 2.0 request/response/notification envelopes and the
//!   legacy `{type, data}` command frame
//! - [`frame`]: one-pass classification of an inbound text frame
//! - [`errors`]: numeric error codes and the [`HandlerError`] handlers return
//! - [`registry`]: method-name → handler table and the inbound [`Dispatcher`]
//! - [`commands`]: the fire-and-forget legacy [`CommandBus`]

#![deny(unsafe_code)]

pub mod commands;
pub mod errors;
pub mod frame;
pub mod registry;
pub mod types;

pub use commands::{CommandBus, CommandError, CommandHandler, CommandOutcome};
pub use errors::HandlerError;
pub use frame::{Frame, FrameError};
pub use registry::{Dispatcher, HandlerRegistry, MethodHandler};
pub use types::{
    LegacyCommand, RequestId, ResponseOutcome, RpcErrorObject, RpcNotification, RpcRequest,
    RpcResponse,
};
