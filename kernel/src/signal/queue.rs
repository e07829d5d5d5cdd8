//! Per-process signal queue
//!
//! Pending and blocked masks, the 32-slot action table, and an ordered
//! [`SigInfo`] FIFO. The queue is spin-locked; blocking operations never run
//! under the lock. SIGKILL and SIGSTOP bypass the blocked mask and their
//! actions cannot be changed.

use alloc::collections::VecDeque;

use spin::Mutex;

use crate::error::{KernelResult, SignalError};

use super::{is_unblockable, is_valid_signal, SigSet, NSIG, SIGKILL, SIGSTOP};

/// What to do when a signal is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigHandler {
    /// Take the signal's default action.
    #[default]
    Default,
    /// Discard the signal.
    Ignore,
    /// Jump to a userland handler at this address.
    Handler(u64),
}

/// Flag: restart interrupted syscalls automatically.
pub const SA_RESTART: u32 = 0x1000_0000;
/// Flag: pass extended [`SigInfo`] to the handler.
pub const SA_SIGINFO: u32 = 0x0000_0004;
/// Flag: reset the handler to default on entry.
pub const SA_RESETHAND: u32 = 0x8000_0000;
/// Flag: do not add the signal to the mask while its handler runs.
pub const SA_NODEFER: u32 = 0x4000_0000;

/// Installed disposition for one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SigAction {
    /// Handler selection.
    pub handler: SigHandler,
    /// Signals blocked while the handler runs.
    pub mask: SigSet,
    /// SA_* flags.
    pub flags: u32,
}

/// `si_code`: sent by a user process via kill().
pub const SI_USER: i32 = 0;
/// `si_code`: originated inside the kernel.
pub const SI_KERNEL: i32 = 0x80;
/// `si_code` for SIGSEGV: no mapping at the faulting address.
pub const SEGV_MAPERR: i32 = 1;
/// `si_code` for SIGSEGV: mapping exists but access was denied.
pub const SEGV_ACCERR: i32 = 2;
/// `si_code` for SIGCHLD: child exited.
pub const CLD_EXITED: i32 = 1;
/// `si_code` for SIGCHLD: child stopped.
pub const CLD_STOPPED: i32 = 5;
/// `si_code` for SIGCHLD: child continued.
pub const CLD_CONTINUED: i32 = 6;

/// Payload accompanying a queued signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigInfo {
    /// Signal number.
    pub signal: u8,
    /// SI_* / SEGV_* / CLD_* code describing the origin.
    pub code: i32,
    /// Signal-specific value: faulting address for SIGSEGV, exit status for
    /// SIGCHLD, sigqueue payload otherwise.
    pub value: u64,
    /// Pid of the sender (zero for kernel-originated signals).
    pub sender_pid: u64,
}

impl SigInfo {
    /// A bare record carrying only the signal number.
    pub const fn bare(signal: u8) -> Self {
        Self {
            signal,
            code: SI_KERNEL,
            value: 0,
            sender_pid: 0,
        }
    }
}

struct QueueInner {
    pending: SigSet,
    blocked: SigSet,
    actions: [SigAction; NSIG],
    info_queue: VecDeque<SigInfo>,
}

impl QueueInner {
    /// Signals that may be delivered right now: pending minus blocked, with
    /// SIGKILL and SIGSTOP always allowed through.
    fn deliverable(&self) -> SigSet {
        let mut bypass = SigSet::empty();
        bypass.add(SIGKILL);
        bypass.add(SIGSTOP);
        self.pending
            .without(self.blocked)
            .merge(self.pending.intersect(bypass))
    }
}

/// The per-process signal state.
pub struct SignalQueue {
    inner: Mutex<QueueInner>,
}

impl Default for SignalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalQueue {
    /// An empty queue with default dispositions and nothing blocked.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                pending: SigSet::empty(),
                blocked: SigSet::empty(),
                actions: [SigAction::default(); NSIG],
                info_queue: VecDeque::new(),
            }),
        }
    }

    /// Record a signal. Blocked signals stay pending until unblocked;
    /// SIGKILL and SIGSTOP are deliverable regardless of the mask.
    pub fn queue(&self, sig: u8, info: SigInfo) -> KernelResult<()> {
        if !is_valid_signal(sig) {
            return Err(SignalError::InvalidSignal.into());
        }
        let mut inner = self.inner.lock();
        inner.pending.add(sig);
        inner.info_queue.push_back(SigInfo { signal: sig, ..info });
        Ok(())
    }

    /// Whether any signal is deliverable against the current blocked mask.
    pub fn has_pending(&self) -> bool {
        !self.inner.lock().deliverable().is_empty()
    }

    /// Take the lowest-numbered deliverable signal, consuming the first
    /// matching record in the FIFO (or synthesizing a bare one).
    pub fn dequeue(&self) -> Option<SigInfo> {
        let mut inner = self.inner.lock();
        let sig = inner.deliverable().first_signal()?;
        inner.pending.remove(sig);
        let position = inner.info_queue.iter().position(|i| i.signal == sig);
        let info = match position {
            Some(index) => inner.info_queue.remove(index).unwrap_or(SigInfo::bare(sig)),
            None => SigInfo::bare(sig),
        };
        Some(info)
    }

    /// Install a disposition for `sig`, returning the previous one.
    pub fn set_action(&self, sig: u8, action: SigAction) -> KernelResult<SigAction> {
        if !is_valid_signal(sig) {
            return Err(SignalError::InvalidSignal.into());
        }
        if is_unblockable(sig) {
            return Err(SignalError::CannotCatch.into());
        }
        let mut inner = self.inner.lock();
        let old = inner.actions[sig as usize];
        inner.actions[sig as usize] = action;
        Ok(old)
    }

    /// The installed disposition for `sig`.
    pub fn get_action(&self, sig: u8) -> KernelResult<SigAction> {
        if !is_valid_signal(sig) {
            return Err(SignalError::InvalidSignal.into());
        }
        Ok(self.inner.lock().actions[sig as usize])
    }

    /// Add `mask` to the blocked set. SIGKILL and SIGSTOP never block.
    pub fn block(&self, mask: SigSet) {
        let mut inner = self.inner.lock();
        inner.blocked = Self::sanitize(inner.blocked.merge(mask));
    }

    /// Remove `mask` from the blocked set.
    pub fn unblock(&self, mask: SigSet) {
        let mut inner = self.inner.lock();
        inner.blocked = inner.blocked.without(mask);
    }

    /// Replace the blocked set.
    pub fn set_blocked(&self, mask: SigSet) {
        self.inner.lock().blocked = Self::sanitize(mask);
    }

    /// The current blocked set.
    pub fn blocked(&self) -> SigSet {
        self.inner.lock().blocked
    }

    /// The current pending set.
    pub fn pending(&self) -> SigSet {
        self.inner.lock().pending
    }

    /// Queue state for a forked child: dispositions and the blocked mask are
    /// inherited, pending signals are not.
    pub fn clone_for_fork(&self) -> SignalQueue {
        let inner = self.inner.lock();
        SignalQueue {
            inner: Mutex::new(QueueInner {
                pending: SigSet::empty(),
                blocked: inner.blocked,
                actions: inner.actions,
                info_queue: VecDeque::new(),
            }),
        }
    }

    /// Reset for exec: user handlers revert to default, ignored dispositions
    /// survive, the blocked mask is cleared, pending signals are kept.
    pub fn exec_reset(&self) {
        let mut inner = self.inner.lock();
        for action in inner.actions.iter_mut() {
            if matches!(action.handler, SigHandler::Handler(_)) {
                *action = SigAction::default();
            }
        }
        inner.blocked = SigSet::empty();
    }

    fn sanitize(mask: SigSet) -> SigSet {
        let mut mask = mask;
        mask.remove(SIGKILL);
        mask.remove(SIGSTOP);
        mask
    }
}
