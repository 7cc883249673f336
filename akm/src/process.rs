//! The continuation-stack engine: `Relationship::process` and every
//! continuation it can resume into.
//!
//! Each call to `process` feeds in one event (and, for `Recv*` events, the
//! sender's raw address) and pumps continuations until one of them yields a
//! [`Command`] for the host to act on. Internally that's a `do`/`while`
//! loop: run the continuation on top of the stack, then clear the event back
//! to `None` before the next iteration, exactly as the original event loop
//! does — a continuation that wants to see the *next* event again pushes
//! itself back on, it doesn't read the same event twice.

use akm_types::{Command, Event, KeySlot, MachState, Status, SysState, SysStateRel};

use crate::counters::{node_sub_counters_mut, rel_sub_counters, rel_sub_counters_mut};
use crate::relationship::{Relationship, CONTINUATION_STACK_DEPTH};

/// One frame of the continuation stack: "what to do when next resumed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Runs once, on the very first `process` call: enters normal
    /// establishment and replaces itself with `Main`.
    Init0,
    /// The idle continuation: dispatches directly on the incoming event.
    Main,
    DoHandleRecvEv0,
    DoHandleRecvEv1,
    RetryDec,
    RetryDecTryFb,
    DoUseDecTryKeyAsDecKey,
    /// Installs `KeySlot` as both the encrypt and decrypt key.
    UseKey(KeySlot),
    DoMoveNskToCsk,
    DoMoveNfskToCsk,
    DoGenNsk,
    DoGenNfsk,
    DoGenCfsk,
    DoClearKeyBuffer,
    DoUpdateSendEvent,
}

impl Relationship {
    /// Advances the relationship with one event, returning the next
    /// [`Command`] for the host to act on.
    ///
    /// `src_addr` is only consulted for `Event::RecvS*` events; pass `None`
    /// otherwise. `now_ms` is the host's current time, in the same units as
    /// every configured timeout.
    pub fn process(&mut self, event: Event, src_addr: Option<&[u8]>, now_ms: u64) -> Command {
        let mut cur_event = event;
        let mut cur_src = src_addr;
        loop {
            self.run_top(cur_event, cur_src, now_ms);
            cur_event = Event::None;
            cur_src = None;
            if self.proc.yield_pending {
                break;
            }
        }
        self.proc.yield_pending = false;
        self.proc
            .pending_command
            .take()
            .expect("a continuation yielded without setting a command")
    }

    fn push_step(&mut self, step: Step) {
        assert!(
            self.proc.cont_stack.len() < CONTINUATION_STACK_DEPTH,
            "continuation stack overflow"
        );
        self.proc.cont_stack.push(step);
    }

    fn pop_step(&mut self) {
        self.proc.cont_stack.pop();
    }

    fn set_top(&mut self, step: Step) {
        *self
            .proc
            .cont_stack
            .last_mut()
            .expect("continuation stack is empty") = step;
    }

    fn yield_process(&mut self, cmd: Command) {
        assert!(
            !self.proc.yield_pending,
            "a continuation yielded a second command before the host consumed the first"
        );
        self.proc.yield_pending = true;
        self.proc.pending_command = Some(cmd);
    }

    fn yield_use_keys(&mut self, enc: KeySlot, dec: KeySlot) {
        self.proc.dec_try_key = dec;
        if self.proc.enc_key != enc || self.proc.dec_key != dec {
            self.proc.enc_key = enc;
            self.proc.dec_key = dec;
            self.yield_process(Command::UseKeys { enc, dec });
        }
    }

    fn yield_retry_dec(&mut self, try_key: KeySlot) {
        self.proc.dec_try_key = try_key;
        self.yield_process(Command::RetryDec { try_key });
    }

    fn run_top(&mut self, event: Event, src_addr: Option<&[u8]>, now_ms: u64) {
        let step = *self
            .proc
            .cont_stack
            .last()
            .expect("continuation stack is empty");
        match step {
            Step::Init0 => {
                self.set_top(Step::Main);
                self.switch_to_normal_establishing(now_ms);
            }
            Step::Main => self.dispatch_main(event, src_addr, now_ms),
            Step::DoHandleRecvEv0 => {
                self.set_top(Step::DoHandleRecvEv1);
                self.handle_local_sei(now_ms);
            }
            Step::DoHandleRecvEv1 => {
                self.pop_step();
                self.do_handle_recv_ev1(now_ms);
            }
            Step::RetryDec => {
                self.pop_step();
                self.c_retry_dec(event, src_addr, now_ms);
            }
            Step::RetryDecTryFb => {
                self.pop_step();
                self.c_retry_dec_try_fb(event, src_addr, now_ms);
            }
            Step::DoUseDecTryKeyAsDecKey => {
                self.pop_step();
                let (enc, dec) = (self.proc.enc_key, self.proc.dec_try_key);
                self.yield_use_keys(enc, dec);
            }
            Step::UseKey(key) => {
                self.pop_step();
                self.yield_use_keys(key, key);
            }
            Step::DoMoveNskToCsk => {
                self.pop_step();
                self.do_move_nsk_to_csk();
            }
            Step::DoMoveNfskToCsk => {
                self.pop_step();
                self.do_move_nfsk_to_csk();
            }
            Step::DoGenNsk => {
                self.pop_step();
                self.do_gen_nsk();
            }
            Step::DoGenNfsk => {
                self.pop_step();
                self.do_gen_nfsk();
            }
            Step::DoGenCfsk => {
                self.pop_step();
                self.do_gen_cfsk();
            }
            Step::DoClearKeyBuffer => {
                self.pop_step();
                self.do_clear_key_buffer();
            }
            Step::DoUpdateSendEvent => {
                self.pop_step();
                self.do_update_send_event();
            }
        }
    }

    fn dispatch_main(&mut self, event: Event, src_addr: Option<&[u8]>, now_ms: u64) {
        match event {
            Event::None | Event::TimeOut => self.handle_proc_fin(now_ms),
            Event::RecvSe | Event::RecvSei | Event::RecvSec | Event::RecvSef => {
                self.handle_ev_recv(event, src_addr, now_ms);
            }
            Event::CannotDecrypt => self.handle_ev_cannot_decrypt(),
            Event::LocalSei => self.handle_local_sei(now_ms),
        }
    }

    fn handle_ev_recv(&mut self, event: Event, src_addr: Option<&[u8]>, _now_ms: u64) {
        if self.proc.mach_state == MachState::Offline {
            return;
        }
        if self.proc.mach_state == MachState::Established && event == Event::RecvSe {
            return;
        }
        self.proc.recv_frame_event = event;
        self.proc.recv_frame_src_node_idx = src_addr.and_then(|a| self.addresses.find(a));
        self.push_step(Step::DoHandleRecvEv0);
    }

    fn handle_local_sei(&mut self, now_ms: u64) {
        if self.proc.mach_state == MachState::Established {
            self.switch_to_normal_establishing(now_ms);
        }
    }

    fn do_handle_recv_ev1(&mut self, now_ms: u64) {
        match self.proc.recv_frame_src_node_idx {
            None => self.proc.status = Status::UnknownSource,
            Some(idx) => {
                self.node_last_rcv[idx] = now_ms;
                let observed = akm_types::recv_to_sys_state(self.proc.recv_frame_event);
                self.count_node_state(idx, observed);
            }
        }
    }

    fn count_node_state(&mut self, node_idx: usize, observed: SysState) {
        let base = self.proc.sys_state;
        match akm_types::states_relation(base, observed) {
            SysStateRel::Prev => {
                if observed != SysState::Se {
                    self.increment_node_cnt(node_idx, observed);
                }
            }
            SysStateRel::Same => self.increment_node_cnt(node_idx, observed),
            SysStateRel::Next | SysStateRel::Cross => {
                self.increment_node_cnt(node_idx, base);
                self.increment_node_cnt(node_idx, base.next());
            }
        }
    }

    fn increment_node_cnt(&mut self, node_idx: usize, state: SysState) {
        let mach = self.proc.mach_state;
        let cnts = node_sub_counters_mut(&mut self.node_counters[node_idx], mach);
        let slot = &mut cnts.cnts[state as usize];
        let was_zero = *slot == 0;
        *slot += 1;
        if was_zero {
            rel_sub_counters_mut(&mut self.rel_counters, mach).nodes[state as usize] += 1;
        }
    }

    pub(crate) fn switch_to_fallback_establishing(&mut self, now_ms: u64) {
        if self.proc.mach_state == MachState::FallbackEstablishing {
            return;
        }
        self.reset_counters();
        self.proc.mach_state = MachState::FallbackEstablishing;
        self.proc.sys_state = SysState::Sei;
        self.last_state_change_time = now_ms;
        let self_idx = self.self_idx;
        self.increment_node_cnt(self_idx, SysState::Sei);
        self.yield_use_keys(KeySlot::Cfsk, KeySlot::Cfsk);
        tracing::info!("switched to fallback establishing");
    }

    pub(crate) fn switch_to_normal_establishing(&mut self, now_ms: u64) {
        if self.proc.mach_state == MachState::NormalEstablishing {
            return;
        }
        self.reset_counters();
        self.proc.mach_state = MachState::NormalEstablishing;
        self.proc.sys_state = SysState::Sei;
        self.last_state_change_time = now_ms;
        for t in &mut self.node_last_rcv {
            *t = now_ms;
        }
        let self_idx = self.self_idx;
        self.increment_node_cnt(self_idx, SysState::Sei);
        tracing::info!("switched to normal establishing");
    }

    fn handle_ev_cannot_decrypt(&mut self) {
        match self.proc.mach_state {
            MachState::Offline => self.proc.status = Status::FatalError,
            MachState::Established => self.retry_with_fallback_key(),
            MachState::NormalEstablishing => match self.proc.sys_state {
                SysState::Sei | SysState::Sec => {
                    let try_key = if self.proc.dec_key == KeySlot::Csk {
                        KeySlot::Nsk
                    } else {
                        KeySlot::Csk
                    };
                    self.push_step(Step::RetryDec);
                    self.yield_retry_dec(try_key);
                }
                _ => self.retry_with_fallback_key(),
            },
            MachState::FallbackEstablishing => match self.proc.sys_state {
                SysState::Sei | SysState::Sec => {
                    let try_key = if self.proc.dec_key == KeySlot::Cfsk {
                        KeySlot::Nfsk
                    } else {
                        KeySlot::Cfsk
                    };
                    self.push_step(Step::RetryDec);
                    self.yield_retry_dec(try_key);
                }
                _ => self.handle_cannot_decrypt_fin(),
            },
        }
    }

    fn retry_with_fallback_key(&mut self) {
        self.push_step(Step::RetryDecTryFb);
        self.yield_retry_dec(KeySlot::Cfsk);
    }

    fn handle_cannot_decrypt_fin(&mut self) {
        if self.proc.mach_state == MachState::FallbackEstablishing {
            self.rel_counters.fallback.decrypt_fails += 1;
        } else {
            self.rel_counters.normal.decrypt_fails += 1;
        }
        self.proc.dec_try_key = self.proc.dec_key;
    }

    fn c_retry_dec(&mut self, event: Event, src_addr: Option<&[u8]>, now_ms: u64) {
        match event {
            Event::RecvSe | Event::RecvSei | Event::RecvSec | Event::RecvSef => {
                self.push_step(Step::DoUseDecTryKeyAsDecKey);
                self.handle_ev_recv(event, src_addr, now_ms);
            }
            Event::CannotDecrypt => {
                if self.proc.mach_state == MachState::FallbackEstablishing {
                    self.handle_cannot_decrypt_fin();
                } else {
                    self.push_step(Step::RetryDecTryFb);
                    self.yield_retry_dec(KeySlot::Cfsk);
                }
            }
            _ => self.proc.status = Status::FatalError,
        }
    }

    fn c_retry_dec_try_fb(&mut self, event: Event, src_addr: Option<&[u8]>, now_ms: u64) {
        match event {
            Event::RecvSe | Event::RecvSei | Event::RecvSec | Event::RecvSef => {
                self.switch_to_fallback_establishing(now_ms);
                self.handle_ev_recv(event, src_addr, now_ms);
            }
            Event::CannotDecrypt => self.handle_cannot_decrypt_fin(),
            _ => self.proc.status = Status::FatalError,
        }
    }

    pub(crate) fn update_state(&mut self, now_ms: u64) {
        let mach = self.proc.mach_state;
        if mach == MachState::Offline || mach == MachState::Established {
            return;
        }
        let mut state = self.proc.sys_state;
        for _ in 0..4 {
            let count = rel_sub_counters(&self.rel_counters, mach).nodes[state as usize];
            if count >= self.config.n as i32 {
                if state == SysState::Se {
                    self.proc.mach_state = MachState::Established;
                    self.reset_counters();
                    break;
                }
                state = state.next();
                if state == SysState::Se {
                    if mach == MachState::FallbackEstablishing {
                        self.regenerate_keys_during_fallback_establishment();
                    } else {
                        self.regenerate_keys_during_normal_establishment();
                    }
                }
            } else {
                break;
            }
        }
        if self.proc.sys_state != state {
            let self_idx = self.self_idx;
            self.increment_node_cnt(self_idx, state);
            if state == SysState::Sec || state == SysState::Sef {
                let use_key = if self.proc.mach_state == MachState::FallbackEstablishing {
                    KeySlot::Nfsk
                } else {
                    KeySlot::Nsk
                };
                self.push_step(Step::UseKey(use_key));
            }
            self.proc.sys_state = state;
            self.last_state_change_time = now_ms;
        }
    }

    fn regenerate_keys_during_normal_establishment(&mut self) {
        self.push_step(Step::DoClearKeyBuffer);
        self.push_step(Step::DoGenNfsk);
        self.push_step(Step::DoGenNsk);
        self.push_step(Step::UseKey(KeySlot::Csk));
        self.push_step(Step::DoMoveNskToCsk);
    }

    fn regenerate_keys_during_fallback_establishment(&mut self) {
        self.push_step(Step::DoClearKeyBuffer);
        self.push_step(Step::DoGenNfsk);
        self.push_step(Step::DoGenNsk);
        self.push_step(Step::DoGenCfsk);
        self.push_step(Step::UseKey(KeySlot::Csk));
        self.push_step(Step::DoMoveNfskToCsk);
    }

    fn do_move_nsk_to_csk(&mut self) {
        self.yield_process(Command::MoveKey {
            dst: KeySlot::Csk,
            src: KeySlot::Nsk,
        });
        self.config.css = self.config.nss;
    }

    fn do_move_nfsk_to_csk(&mut self) {
        self.yield_process(Command::MoveKey {
            dst: KeySlot::Csk,
            src: KeySlot::Nfsk,
        });
        self.config.css = self.config.nfss;
        self.config.sfss = self.config.nsfss;
        self.config.nsfss = self.config.fss;
    }

    fn do_gen_nsk(&mut self) {
        let (key, new_seed) = akm_keygen::process_random_data_set(
            &self.pdv,
            self.config.css,
            self.config.sk as usize,
        );
        self.config.nss = new_seed;
        self.proc.key_buffer = key.clone();
        self.yield_process(Command::SetKey {
            slot: KeySlot::Nsk,
            key,
        });
    }

    fn do_gen_nfsk(&mut self) {
        let (key, new_seed) = akm_keygen::process_random_data_set(
            &self.pdv,
            self.config.fss,
            self.config.sk as usize,
        );
        self.config.nfss = new_seed;
        self.proc.key_buffer = key.clone();
        self.yield_process(Command::SetKey {
            slot: KeySlot::Nfsk,
            key,
        });
    }

    fn do_gen_cfsk(&mut self) {
        let (key, new_seed) = akm_keygen::process_random_data_set(
            &self.pdv,
            self.config.sfss,
            self.config.sk as usize,
        );
        self.config.fss = new_seed;
        self.proc.key_buffer = key.clone();
        self.yield_process(Command::SetKey {
            slot: KeySlot::Cfsk,
            key,
        });
    }

    fn do_clear_key_buffer(&mut self) {
        self.proc.key_buffer = zeroize::Zeroizing::new(vec![0u8; self.config.sk as usize]);
    }

    pub(crate) fn check_decr_fail_limit(&mut self, now_ms: u64) {
        const FAIL_LIMIT_FACTOR: i32 = 10;
        let limit = FAIL_LIMIT_FACTOR * self.config.n as i32;
        match self.proc.mach_state {
            MachState::Offline | MachState::Established => {}
            MachState::NormalEstablishing => {
                if self.rel_counters.normal.decrypt_fails >= limit {
                    self.switch_to_fallback_establishing(now_ms);
                }
            }
            MachState::FallbackEstablishing => {
                // No escalation past fallback is defined; mirrors the
                // original's unfilled handling of this case.
            }
        }
    }

    pub(crate) fn check_state_change_timeout(&mut self, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.last_state_change_time);
        match self.proc.mach_state {
            MachState::Offline | MachState::Established => {}
            MachState::NormalEstablishing => {
                if elapsed > self.config.nset {
                    self.switch_to_fallback_establishing(now_ms);
                }
            }
            MachState::FallbackEstablishing => {
                // As in checkDecrFailLimit: no further escalation defined.
            }
        }
    }

    fn check_update_send_event(&self) -> (bool, SysState) {
        let send_ok = self.proc.mach_state != MachState::Offline;
        let event = match self.proc.mach_state {
            MachState::Offline | MachState::Established => SysState::Se,
            MachState::NormalEstablishing | MachState::FallbackEstablishing => {
                self.proc.sys_state
            }
        };
        (send_ok, event)
    }

    pub(crate) fn update_send_event(&mut self) {
        let (send_ok, event) = self.check_update_send_event();
        if send_ok != self.proc.send_ok || event != self.proc.send_event {
            self.push_step(Step::DoUpdateSendEvent);
        }
    }

    fn do_update_send_event(&mut self) {
        let (send_ok, event) = self.check_update_send_event();
        self.yield_process(Command::SetSendEvent { send_ok, event });
        self.proc.send_ok = send_ok;
        self.proc.send_event = event;
    }

    pub(crate) fn remove_timed_out_nodes(&mut self, now_ms: u64) {
        if self.proc.skip_timeout_nodes_removal {
            return;
        }
        self.proc.skip_timeout_nodes_removal = true;
        let timeout = self.config.nnrt;
        let mut i = 0usize;
        while i < self.config.n as usize {
            if i == self.self_idx {
                i += 1;
                continue;
            }
            if now_ms.saturating_sub(self.node_last_rcv[i]) > timeout {
                self.remove_node_by_idx(i);
            } else {
                i += 1;
            }
        }
    }

    fn handle_proc_fin(&mut self, now_ms: u64) {
        self.remove_timed_out_nodes(now_ms);
        self.update_state(now_ms);
        if self.stack_has_pending_work() {
            return;
        }
        self.check_decr_fail_limit(now_ms);
        if self.stack_has_pending_work() {
            return;
        }
        self.check_state_change_timeout(now_ms);
        if self.stack_has_pending_work() {
            return;
        }
        self.sched_next_timeout(now_ms);
        if self.stack_has_pending_work() {
            return;
        }
        self.update_send_event();
        if self.stack_has_pending_work() {
            return;
        }
        self.proc.skip_timeout_nodes_removal = false;
        self.proc.skip_timeout_sched = false;
        let status = self.proc.status;
        self.yield_process(Command::Return(status));
        self.proc.status = Status::Success;
        self.proc.recv_frame_src_node_idx = None;
        self.proc.recv_frame_event = Event::None;
        debug_assert_eq!(self.proc.dec_key, self.proc.dec_try_key);
    }

    fn stack_has_pending_work(&self) -> bool {
        self.proc.yield_pending || self.proc.cont_stack.len() > 1
    }

    pub(crate) fn sched_next_timeout(&mut self, now_ms: u64) {
        if self.proc.skip_timeout_sched {
            return;
        }
        self.proc.skip_timeout_sched = true;
        match self.calc_next_timeout() {
            Some(next) => {
                if !self.proc.valid_next_timeout || next != self.proc.next_timeout {
                    self.proc.next_timeout = next;
                    self.proc.valid_next_timeout = true;
                    self.yield_process(Command::SetTimer { at_ms: next });
                }
            }
            None => {
                if self.proc.valid_next_timeout {
                    self.proc.valid_next_timeout = false;
                    self.yield_process(Command::ResetTimer);
                }
            }
        }
        let _ = now_ms;
    }

    fn calc_next_timeout(&self) -> Option<u64> {
        let mut next = match self.proc.mach_state {
            MachState::Offline | MachState::Established => return None,
            MachState::NormalEstablishing => self.last_state_change_time + self.config.nset,
            MachState::FallbackEstablishing => self.last_state_change_time + self.config.fbset,
        };
        for (i, &t) in self.node_last_rcv.iter().enumerate() {
            if i == self.self_idx {
                continue;
            }
            let node_timeout = t + self.config.nnrt;
            if node_timeout < next {
                next = node_timeout;
            }
        }
        Some(next + 1)
    }
}
