//! # cascade-transport
//!
//! Transport layer for Cascade: owns the outbound side of every live
//! connection and implements the push capability the fanout engine
//! delivers through.

pub mod gateway;

pub use gateway::{GatewayConfig, WebSocketGateway};
