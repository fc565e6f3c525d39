//! `ffee-hal` – command endpoints of the F-FEE test setup.
//!
//! # Modules
//!
//! - [`endpoint`] – The [`Connector`]/[`Session`] contract every command
//!   target implements.
//! - [`registry`] – [`EndpointRegistry`]: explicit operation tables per
//!   target, validated at registration, and the scoped [`SessionSet`].
//! - [`operations`] – DPU and CM_CS operation tables plus one builder per
//!   user action.
//! - [`ws_rpc`] – JSON request/response sessions over WebSocket.
//! - [`sim`] – [`SimFee`], an in-process front-end for tests and the
//!   simulated console.

pub mod endpoint;
pub mod operations;
pub mod registry;
pub mod sim;
pub mod ws_rpc;

pub use endpoint::{Connector, OperationSpec, Session};
pub use registry::{EndpointRegistry, SessionSet};
pub use sim::{SimConnector, SimFee};
pub use ws_rpc::WsControlConnector;
