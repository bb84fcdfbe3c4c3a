//! tablegrid-flows: everything that talks about flows on switches.
//!
//! # Components
//!
//! - **`types`**: flow bodies as the flow manager stores and accepts them
//! - **`cookie`**: the 64-bit cookie codec used to tag and recognise our flows
//! - **`transport`**: the `FlowTransport` seam the reconciler dispatches through
//! - **`client`**: `HttpFlowTransport`, a hyper client for the flow-manager REST API
//! - **`memory`**: `MemoryTransport`, a recording in-process transport
//! - **`retry`**: `RetryPolicy`, bounded retry of transient transport errors

pub mod client;
pub mod cookie;
pub mod error;
pub mod memory;
pub mod retry;
pub mod transport;
pub mod types;

pub use client::{FlowManagerConfig, HttpFlowTransport};
pub use cookie::{CookieCodec, InvalidSwitchId, COOKIE_MASK_ALL, OWNER_TAG_MASK};
pub use error::{TransportError, TransportResult};
pub use memory::{Dispatch, MemoryTransport};
pub use retry::{Backoff, RetryPolicy};
pub use transport::FlowTransport;
pub use types::*;
