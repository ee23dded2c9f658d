//! # Agora Cache
//!
//! Process-local ephemeral key/value store with optional per-key expiry.
//!
//! One [`EphemeralCache`] is created per process at boot and a handle is
//! attached to every request's context, so handlers share it across
//! concurrent requests. Expiry uses an injectable [`Clock`]; tests drive it
//! with a [`ManualClock`].

#![doc(html_root_url = "https://docs.rs/agora-cache/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod cache;
mod clock;

pub use cache::{CacheConfig, CacheStats, EphemeralCache};
pub use clock::{Clock, ManualClock, SystemClock};
