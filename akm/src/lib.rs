//! Authenticated key management: establishing, rotating, and falling back
//! between symmetric keys shared by the peers in a relationship.
//!
//! # Overview
//!
//! A [`Relationship`] tracks one multi-peer key-sharing agreement: a sorted
//! table of raw peer addresses, a shared secret parameter data vector
//! (`PDV`), and four key slots (current/next session key, current/next
//! fallback session key). Peers advertise a system state (`SE`/`SEI`/`SEC`/
//! `SEF`) to each other; once every peer has been observed advertising the
//! same state, the relationship's own state advances, regenerating keys as
//! it cycles back through `SE`. If decryption with the current key fails
//! too often, or an establishment round runs too long, the relationship
//! falls back to its fallback key family instead of stalling.
//!
//! The whole thing is driven by [`Relationship::process`]: feed it one
//! event (a received advertisement, a decrypt failure, a timer firing, or a
//! local request to re-establish) and it returns exactly one [`Command`]
//! for the host to act on — install a key, retry a decrypt, arm a timer,
//! advertise a state, or report that this call is done. Internally this is
//! a small continuation-passing state machine: one `process` call can pump
//! through several internal steps (generating four keys back to back, say)
//! before anything needs to go back out to the host, so the command stream
//! can include several yields between host-visible events.
//!
//! # Example
//!
//! ```
//! use akm::{Config, Relationship};
//! use akm_types::{Command, Event, KeySlot, Status};
//!
//! let config = Config {
//!     n: 2,
//!     srna: 2,
//!     sk: 16,
//!     nnrt: 60_000,
//!     nset: 30_000,
//!     fbset: 30_000,
//!     fsset: 30_000,
//!     css: 1,
//!     nss: 2,
//!     sfss: 3,
//!     nsfss: 4,
//!     fss: 5,
//!     nfss: 6,
//! };
//! let pdv = [7u8; akm_keygen::PDV_SIZE];
//! let addresses = vec![1, 0, 2, 0]; // two 2-byte addresses, sorted
//! let mut rel = Relationship::init(config, pdv, addresses, &[1, 0], 0).unwrap();
//!
//! // Pump until the first `process` call completes.
//! loop {
//!     match rel.process(Event::None, None, 0) {
//!         Command::Return(Status::Success) => break,
//!         _other => continue,
//!     }
//! }
//! ```
//!
//! # Ambient concerns
//!
//! Errors from malformed configuration surface as [`akm_types::AkmError`];
//! everything past construction reports through [`akm_types::Status`] on
//! `Command::Return` rather than panicking or returning `Result` — matching
//! the host-driven, event-loop shape of the API. State transitions, peer
//! removal, and fallback switches log through `tracing` at `info`/`debug`.
//!
//! # Non-goals
//!
//! This crate does not perform encryption, transport, or framing — it only
//! decides *which* key slot to use and *when* to change it. It also does
//! not persist relationship state across process restarts; a host that
//! needs that serializes [`Config`] (via `serde`) and re-derives the rest
//! from a fresh [`Relationship::init`] call plus replayed events.

mod config;
mod counters;
mod process;
mod relationship;

pub use akm_addr::AddressList;
pub use akm_types::{AkmError, Command, Event, KeySlot, MachState, Status, SysState};
pub use config::Config;
pub use relationship::Relationship;
