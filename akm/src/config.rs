//! Host-supplied, host-serializable configuration for a relationship.
//!
//! `Config` doubles as the spec's `AKMConfigParams`: most fields are fixed
//! at `init` (`srna`, `sk`, the timeouts) but `n` and the six seeds mutate
//! at runtime (`n` shrinks as silent peers are removed; the seeds advance
//! each time a key is regenerated). This mirrors the original design one
//! to one rather than splitting "static config" from "runtime state" —
//! see DESIGN.md.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Relationship configuration, mutable at runtime in the fields the spec
/// itself treats as mutable (`n`, the seeds).
///
/// `Debug` is hand-rolled rather than derived: the six seed fields
/// parameterize `akm_keygen::process_random_data_set`'s key derivation, so
/// they're redacted the same way `Command::SetKey`'s key bytes are.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Config {
    /// Number of peers in the relationship, including self.
    pub n: u32,
    /// Size of a raw node address, in bytes.
    pub srna: u32,
    /// Session key length, in bytes.
    pub sk: u32,
    /// Non-receiving node removal timeout, in milliseconds.
    pub nnrt: u64,
    /// Normal-establishment overall timeout, in milliseconds.
    pub nset: u64,
    /// Fallback-establishment overall timeout, in milliseconds.
    pub fbset: u64,
    /// Fallback-session establishment timeout, in milliseconds.
    ///
    /// Carried for configuration fidelity; like the original, nothing in
    /// the state machine currently reads it.
    pub fsset: u64,
    /// Seed for the current session key family.
    pub css: u32,
    /// Seed for the next session key family.
    pub nss: u32,
    /// Seed for the current fallback-session key family.
    pub sfss: u32,
    /// Seed for the next fallback-session key family.
    pub nsfss: u32,
    /// Seed for the fallback session key family.
    pub fss: u32,
    /// Seed for the next fallback session key family.
    pub nfss: u32,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("n", &self.n)
            .field("srna", &self.srna)
            .field("sk", &self.sk)
            .field("nnrt", &self.nnrt)
            .field("nset", &self.nset)
            .field("fbset", &self.fbset)
            .field("fsset", &self.fsset)
            .field("css", &"<redacted>")
            .field("nss", &"<redacted>")
            .field("sfss", &"<redacted>")
            .field("nsfss", &"<redacted>")
            .field("fss", &"<redacted>")
            .field("nfss", &"<redacted>")
            .finish()
    }
}
