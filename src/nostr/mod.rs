//! Nostr protocol layer
//!
//! Event model with canonical ids and Schnorr signatures, one websocket
//! client per relay, and a pool that gives the wallet quorum publishes and
//! best-effort union fetches across its relay set.

pub mod event;
pub mod pool;
pub mod relay;

pub use event::{Event, EventTemplate, Filter};
pub use pool::RelayPool;
pub use relay::{RelayConnection, RelayError};

/// Event kinds used by the wallet.
pub mod kind {
    /// Wallet metadata, replaceable.
    pub const WALLET: u32 = 17375;
    /// Encrypted token bundle.
    pub const TOKEN: u32 = 7375;
    /// Encrypted spending history, append-only.
    pub const HISTORY: u32 = 7376;
    /// Encrypted mint-quote tracker.
    pub const QUOTE: u32 = 7374;
    /// Relay recommendations, plaintext tags.
    pub const RELAY_LIST: u32 = 10019;
    /// Deletion request.
    pub const DELETE: u32 = 5;
}
