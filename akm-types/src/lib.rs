//! Shared enums and small value types for the AKM relationship state machine.
//!
//! Nothing in this crate carries logic beyond const helpers and small
//! `From`/relation conversions — the state machine itself lives in `akm`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// One of the four symmetric key slots a relationship juggles.
///
/// `Csk`/`Nsk` are the current/next *session* keys; `Cfsk`/`Nfsk` are their
/// fallback counterparts. The discriminants are load-bearing: they are the
/// `p1`/`p2` values a host sees on `Command::UseKeys`/`SetKey`/`MoveKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum KeySlot {
    Csk = 0,
    Nsk = 1,
    Cfsk = 2,
    Nfsk = 3,
}

/// Whether a key slot belongs to the fallback family.
#[must_use]
pub const fn is_fallback_key(key: KeySlot) -> bool {
    matches!(key, KeySlot::Cfsk | KeySlot::Nfsk)
}

/// System state a relationship (or a peer) is advertising.
///
/// States are cyclic: `next`/`prev`/`cross` all wrap modulo 4. The
/// discriminants double as the `Event::RecvS*` payload a peer observation
/// carries — see [`recv_to_sys_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SysState {
    Se = 0,
    Sei = 1,
    Sec = 2,
    Sef = 3,
}

impl SysState {
    const STATES: [SysState; 4] = [SysState::Se, SysState::Sei, SysState::Sec, SysState::Sef];

    #[must_use]
    pub const fn next(self) -> Self {
        Self::STATES[((self as u8) + 1) as usize % 4]
    }

    #[must_use]
    pub const fn prev(self) -> Self {
        Self::STATES[((self as u8) + 3) as usize % 4]
    }

    #[must_use]
    pub const fn cross(self) -> Self {
        Self::STATES[((self as u8) + 2) as usize % 4]
    }
}

/// The relation of an observed state to a base (self) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysStateRel {
    Same,
    Next,
    Cross,
    Prev,
}

/// `(observed - base) mod 4`, classified.
#[must_use]
pub const fn states_relation(base: SysState, observed: SysState) -> SysStateRel {
    match ((observed as u8) as i32 - (base as u8) as i32).rem_euclid(4) {
        0 => SysStateRel::Same,
        1 => SysStateRel::Next,
        2 => SysStateRel::Cross,
        _ => SysStateRel::Prev,
    }
}

/// Inverse of [`states_relation`]: the state `rel` away from `base`.
#[must_use]
pub const fn related_state(base: SysState, rel: SysStateRel) -> SysState {
    let offset = match rel {
        SysStateRel::Same => 0,
        SysStateRel::Next => 1,
        SysStateRel::Cross => 2,
        SysStateRel::Prev => 3,
    };
    SysState::STATES[((base as u8) as usize + offset) % 4]
}

/// Overall machine state a relationship is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachState {
    Offline,
    Established,
    NormalEstablishing,
    FallbackEstablishing,
}

/// External event fed into `Relationship::process`.
///
/// The four `Recv*` variants are numerically aligned with [`SysState`] — a
/// received advertisement of system state `s` arrives as `Event::RecvS(s)`.
/// `recv_to_sys_state` relies on that alignment; the static assertions below
/// pin it down so a future reordering fails to compile rather than silently
/// breaking convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Event {
    RecvSe = 0,
    RecvSei = 1,
    RecvSec = 2,
    RecvSef = 3,
    CannotDecrypt = 4,
    TimeOut = 5,
    LocalSei = 6,
    /// The "resume" event: pumps a multi-step sequence with no new input.
    None = 7,
}

const _: () = assert!(Event::RecvSe as u8 == SysState::Se as u8);
const _: () = assert!(Event::RecvSei as u8 == SysState::Sei as u8);
const _: () = assert!(Event::RecvSec as u8 == SysState::Sec as u8);
const _: () = assert!(Event::RecvSef as u8 == SysState::Sef as u8);

/// Maps a `Recv*` event to the system state it carries.
///
/// # Panics
///
/// Panics if called with a non-`Recv*` event; callers are expected to have
/// already dispatched on the event kind.
#[must_use]
pub const fn recv_to_sys_state(ev: Event) -> SysState {
    match ev {
        Event::RecvSe => SysState::Se,
        Event::RecvSei => SysState::Sei,
        Event::RecvSec => SysState::Sec,
        Event::RecvSef => SysState::Sef,
        _ => panic!("recv_to_sys_state called with a non-Recv event"),
    }
}

#[must_use]
pub const fn is_recv_event(ev: Event) -> bool {
    matches!(
        ev,
        Event::RecvSe | Event::RecvSei | Event::RecvSec | Event::RecvSef
    )
}

/// Outcome reported to the host on `Command::Return`, and returned by `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    FatalError,
    UnknownSource,
    NoMemory,
}

/// A command yielded by `Relationship::process` for the host to act on.
///
/// This is the Rust reshaping of the C `{opcode, p1, p2, data}` triad:
/// opcodes stay an enum (sum types over function pointers, per the
/// continuation-stack design) but now carry typed payloads directly.
///
/// `Debug` is hand-rolled rather than derived: `SetKey` carries freshly
/// derived key bytes, and those must never show up in a log line or a
/// panic message (see `akm::tests::assert_set_key`, which deliberately
/// only inspects the slot).
#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    /// Install these key slots as active for encrypt and decrypt.
    UseKeys { enc: KeySlot, dec: KeySlot },
    /// Re-attempt decryption of the most recent frame using this key slot.
    RetryDec { try_key: KeySlot },
    /// Copy the given key bytes into a slot.
    SetKey { slot: KeySlot, key: Zeroizing<Vec<u8>> },
    /// Move (take ownership of) `src`'s key into `dst`.
    MoveKey { dst: KeySlot, src: KeySlot },
    /// Arm a one-shot timer for this absolute instant.
    SetTimer { at_ms: u64 },
    /// Disarm the timer.
    ResetTimer,
    /// The host should advertise `event` when `send_ok`.
    SetSendEvent { send_ok: bool, event: SysState },
    /// One `process` call is complete.
    Return(Status),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UseKeys { enc, dec } => {
                f.debug_struct("UseKeys").field("enc", enc).field("dec", dec).finish()
            }
            Self::RetryDec { try_key } => {
                f.debug_struct("RetryDec").field("try_key", try_key).finish()
            }
            Self::SetKey { slot, key } => f
                .debug_struct("SetKey")
                .field("slot", slot)
                .field("key", &format_args!("<{} bytes redacted>", key.len()))
                .finish(),
            Self::MoveKey { dst, src } => {
                f.debug_struct("MoveKey").field("dst", dst).field("src", src).finish()
            }
            Self::SetTimer { at_ms } => f.debug_struct("SetTimer").field("at_ms", at_ms).finish(),
            Self::ResetTimer => f.write_str("ResetTimer"),
            Self::SetSendEvent { send_ok, event } => f
                .debug_struct("SetSendEvent")
                .field("send_ok", send_ok)
                .field("event", event)
                .finish(),
            Self::Return(status) => f.debug_tuple("Return").field(status).finish(),
        }
    }
}

/// Failure constructing a [`Relationship`](../akm/struct.Relationship.html).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AkmError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("self node address not found in the node address list")]
    UnknownSource,
    #[error("allocation failure during init")]
    NoMemory,
}

impl From<AkmError> for Status {
    fn from(err: AkmError) -> Self {
        match err {
            AkmError::InvalidConfig(_) => Status::FatalError,
            AkmError::UnknownSource => Status::UnknownSource,
            AkmError::NoMemory => Status::NoMemory,
        }
    }
}
