//! The `Relationship` struct: persistent state for one AKM relationship,
//! plus construction and peer bookkeeping.
//!
//! The continuation-stack engine that drives `process` lives in
//! [`crate::process`]; this module owns the data the engine operates on.

use akm_keygen::PDV_SIZE;
use akm_types::{AkmError, Event, KeySlot, MachState, Status, SysState};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::config::Config;
use crate::counters::{uncount_node_counters, NodeCounters, RelCounters};
use crate::process::Step;

/// Bound on the continuation stack's depth. Each establishment round pushes
/// at most a handful of steps; 16 is generous headroom, not a tuned budget.
pub(crate) const CONTINUATION_STACK_DEPTH: usize = 16;

/// Transient, per-`process`-call state. Reset piece by piece as each
/// continuation runs; fully quiesced once a `Return` is yielded.
pub(crate) struct ProcessingInfo {
    pub(crate) cont_stack: Vec<Step>,
    pub(crate) mach_state: MachState,
    pub(crate) sys_state: SysState,
    pub(crate) status: Status,
    pub(crate) enc_key: KeySlot,
    pub(crate) dec_key: KeySlot,
    pub(crate) dec_try_key: KeySlot,
    pub(crate) recv_frame_event: Event,
    pub(crate) recv_frame_src_node_idx: Option<usize>,
    pub(crate) key_buffer: Zeroizing<Vec<u8>>,
    pub(crate) send_ok: bool,
    pub(crate) send_event: SysState,
    pub(crate) next_timeout: u64,
    pub(crate) valid_next_timeout: bool,
    pub(crate) skip_timeout_nodes_removal: bool,
    pub(crate) skip_timeout_sched: bool,
    pub(crate) yield_pending: bool,
    pub(crate) pending_command: Option<akm_types::Command>,
}

/// One peer-to-peer key management relationship: the address book, the
/// shared secret material, and the establishment state machine.
pub struct Relationship {
    pub(crate) self_idx: usize,
    pub(crate) config: Config,
    pub(crate) pdv: Zeroizing<[u8; PDV_SIZE]>,
    pub(crate) addresses: akm_addr::AddressList,
    pub(crate) last_state_change_time: u64,
    pub(crate) node_last_rcv: Vec<u64>,
    pub(crate) rel_counters: RelCounters,
    pub(crate) node_counters: Vec<NodeCounters>,
    pub(crate) proc: ProcessingInfo,
}

impl Relationship {
    /// Builds a relationship from a host-supplied configuration, shared
    /// parameter data vector, sorted peer address list (including self),
    /// and this node's own address.
    ///
    /// # Errors
    ///
    /// Returns [`AkmError::InvalidConfig`] if `config.n`/`config.srna` don't
    /// agree with `node_addresses`' actual layout, or
    /// [`AkmError::UnknownSource`] if `self_node_address` isn't present in
    /// `node_addresses`.
    pub fn init(
        config: Config,
        pdv: [u8; PDV_SIZE],
        node_addresses: Vec<u8>,
        self_node_address: &[u8],
        now_ms: u64,
    ) -> Result<Self, AkmError> {
        let addr_size = config.srna as usize;
        let addr_num = config.n as usize;
        if !akm_addr::check_params(addr_num, addr_size) {
            return Err(AkmError::InvalidConfig("n/srna out of range"));
        }
        if node_addresses.len() != addr_num * addr_size {
            return Err(AkmError::InvalidConfig(
                "node address buffer length disagrees with n * srna",
            ));
        }
        let addresses = akm_addr::AddressList::new(node_addresses, addr_size)
            .map_err(AkmError::InvalidConfig)?;
        let self_idx = addresses
            .find(self_node_address)
            .ok_or(AkmError::UnknownSource)?;

        let mut rel = Relationship {
            self_idx,
            config,
            pdv: Zeroizing::new(pdv),
            addresses,
            last_state_change_time: now_ms,
            node_last_rcv: vec![now_ms; addr_num],
            rel_counters: RelCounters::default(),
            node_counters: vec![NodeCounters::default(); addr_num],
            proc: ProcessingInfo {
                cont_stack: vec![Step::Init0],
                mach_state: MachState::Offline,
                sys_state: SysState::Se,
                status: Status::Success,
                enc_key: KeySlot::Csk,
                dec_key: KeySlot::Csk,
                dec_try_key: KeySlot::Csk,
                recv_frame_event: Event::None,
                recv_frame_src_node_idx: None,
                key_buffer: Zeroizing::new(Vec::new()),
                send_ok: false,
                send_event: SysState::Se,
                next_timeout: 0,
                valid_next_timeout: false,
                skip_timeout_nodes_removal: false,
                skip_timeout_sched: false,
                yield_pending: false,
                pending_command: None,
            },
        };
        tracing::debug!(self_idx, n = rel.config.n, "relationship initialized");
        rel.proc.sys_state = SysState::Se;
        Ok(rel)
    }

    /// The relationship's current configuration (`n` and the seeds reflect
    /// live, post-establishment state, not just the values passed to
    /// [`Relationship::init`]).
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The current peer address table, including self.
    #[must_use]
    pub fn node_addresses(&self) -> &akm_addr::AddressList {
        &self.addresses
    }

    /// This node's index into [`Relationship::node_addresses`].
    #[must_use]
    pub fn self_idx(&self) -> usize {
        self.self_idx
    }

    /// The system state currently being advertised or pursued.
    #[must_use]
    pub fn sys_state(&self) -> SysState {
        self.proc.sys_state
    }

    /// The overall establishment state.
    #[must_use]
    pub fn mach_state(&self) -> MachState {
        self.proc.mach_state
    }

    pub(crate) fn reset_counters(&mut self) {
        self.rel_counters = RelCounters::default();
        for nc in &mut self.node_counters {
            *nc = NodeCounters::default();
        }
    }

    pub(crate) fn remove_node_by_idx(&mut self, idx: usize) {
        uncount_node_counters(&mut self.rel_counters, &self.node_counters[idx]);
        self.addresses.remove(idx);
        self.node_last_rcv.remove(idx);
        self.node_counters.remove(idx);
        self.config.n -= 1;
        if idx < self.self_idx {
            self.self_idx -= 1;
        }
        match self.proc.recv_frame_src_node_idx {
            Some(j) if idx < j => self.proc.recv_frame_src_node_idx = Some(j - 1),
            Some(j) if idx == j => self.proc.recv_frame_src_node_idx = None,
            _ => {}
        }
        tracing::info!(idx, remaining = self.config.n, "peer removed for silence");
    }
}

impl Zeroize for Relationship {
    fn zeroize(&mut self) {
        self.pdv.zeroize();
        self.config.zeroize();
        self.proc.key_buffer.zeroize();
        self.proc.enc_key = KeySlot::Csk;
        self.proc.dec_key = KeySlot::Csk;
        self.proc.dec_try_key = KeySlot::Csk;
    }
}

impl ZeroizeOnDrop for Relationship {}
