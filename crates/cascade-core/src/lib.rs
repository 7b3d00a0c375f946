//! # cascade-core
//!
//! Core logic for the Cascade webhook-to-connection broadcast bridge.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Verifier** - Multi-scheme signature verification for inbound webhooks
//! - **Registry** - Connection identity storage with paginated enumeration
//! - **FanoutEngine** - Broadcast delivery with stale-connection eviction
//! - **BroadcastQueue** - Latest-wins queue between webhook intake and fanout
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │   Webhook   │────▶│  Verifier   │────▶│ BroadcastQueue│
//! └─────────────┘     └─────────────┘     └──────────────┘
//!                                                │
//!                                                ▼
//!                     ┌─────────────┐     ┌──────────────┐
//!                     │  Registry   │◀────│ FanoutEngine │
//!                     └─────────────┘     └──────────────┘
//! ```

pub mod fanout;
pub mod push;
pub mod queue;
pub mod registry;
pub mod verify;

pub use fanout::{FanoutConfig, FanoutEngine, FanoutReport};
pub use push::{ConnectionPush, PushError};
pub use queue::{broadcast_queue, BroadcastDrain, BroadcastMessage, BroadcastQueue};
pub use registry::{
    ConnectionId, ConnectionRegistry, ConnectionStore, MemoryStore, ScanPage, StoreError,
};
pub use verify::{Headers, SignatureScheme, VerificationResult, Verifier};
