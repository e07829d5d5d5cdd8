//! Signal delivery
//!
//! Applies a dequeued signal to a process: runs the default action, or
//! arranges a userland handler frame on the user stack via checked copies
//! and redirects the saved context. `sigreturn` restores the context from
//! that frame.

use alloc::sync::Arc;

use crate::error::{KernelResult, MemoryError};
use crate::mm::VirtualAddress;
use crate::process::{exit, Process};

use super::queue::{SigHandler, SigInfo, SA_NODEFER, SA_RESETHAND};
use super::{
    SigAction, SigSet, SIGABRT, SIGBUS, SIGCHLD, SIGCONT, SIGFPE, SIGILL, SIGKILL, SIGQUIT,
    SIGSEGV, SIGSTOP, SIGSYS, SIGTRAP, SIGTSTP, SIGTTIN, SIGTTOU, SIGURG, SIGWINCH,
};

/// Default disposition of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    /// Discard the signal.
    Ignore,
    /// Stop the process until SIGCONT.
    Stop,
    /// Resume a stopped process.
    Continue,
    /// Terminate the process.
    Terminate,
    /// Terminate with core-dump intent.
    TerminateCore,
}

/// The default action keyed by signal number.
pub fn default_action(sig: u8) -> DefaultAction {
    match sig {
        SIGCHLD | SIGURG | SIGWINCH => DefaultAction::Ignore,
        SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => DefaultAction::Stop,
        SIGCONT => DefaultAction::Continue,
        SIGQUIT | SIGILL | SIGTRAP | SIGABRT | SIGBUS | SIGFPE | SIGSEGV | SIGSYS => {
            DefaultAction::TerminateCore
        }
        _ => DefaultAction::Terminate,
    }
}

/// Saved user-mode execution context, filled in by the trap entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserContext {
    /// Instruction pointer to resume at.
    pub rip: u64,
    /// Stack pointer.
    pub rsp: u64,
    /// Flags register.
    pub rflags: u64,
    /// General-purpose registers, rax..r15 in push order.
    pub regs: [u64; 15],
}

/// The frame the kernel writes to the user stack before entering a handler.
/// `sigreturn` reads it back to restore the interrupted context.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalFrame {
    /// Signal number being delivered.
    pub signal: u32,
    /// si_code of the delivered signal.
    pub code: i32,
    /// Fault address or payload value.
    pub value: u64,
    /// Sender pid.
    pub sender_pid: u64,
    /// Saved instruction pointer.
    pub rip: u64,
    /// Saved stack pointer.
    pub rsp: u64,
    /// Saved flags.
    pub rflags: u64,
    /// Saved general-purpose registers.
    pub regs: [u64; 15],
    /// Blocked mask to restore on sigreturn.
    pub saved_mask: u32,
    _pad: u32,
}

impl SignalFrame {
    const SIZE: usize = core::mem::size_of::<SignalFrame>();

    fn to_bytes(self) -> [u8; Self::SIZE] {
        // SAFETY: SignalFrame is repr(C) plain data with no padding holes
        // that could leak kernel memory (explicit _pad field).
        unsafe { core::mem::transmute(self) }
    }

    fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        // SAFETY: every bit pattern is a valid SignalFrame.
        unsafe { core::mem::transmute(bytes) }
    }
}

/// Outcome of delivering one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A userland handler frame was arranged; resume at the handler.
    HandlerInvoked {
        /// Handler entry point.
        handler: u64,
        /// Address of the frame written to the user stack.
        frame_addr: u64,
    },
    /// The signal was discarded.
    Ignored,
    /// The process was stopped.
    Stopped,
    /// The process was continued.
    Continued,
    /// The process was terminated.
    Terminated {
        /// Whether the default action carried core-dump intent.
        core_dump: bool,
        /// Exit code recorded (128 + signal).
        exit_code: i32,
    },
}

/// Deliver `info` to `process`, mutating `ctx` when a handler is invoked.
pub fn deliver(
    process: &Arc<Process>,
    info: SigInfo,
    ctx: &mut UserContext,
) -> KernelResult<Delivery> {
    let sig = info.signal;
    let action = process.signals.get_action(sig)?;

    // SIGKILL and SIGSTOP always take their default action.
    let handler = if sig == SIGKILL || sig == SIGSTOP {
        SigHandler::Default
    } else {
        action.handler
    };

    match handler {
        SigHandler::Handler(entry) => invoke_handler(process, info, action, entry, ctx),
        SigHandler::Ignore => Ok(Delivery::Ignored),
        SigHandler::Default => Ok(apply_default(process, info)),
    }
}

/// Restore the context saved in the frame at `frame_addr` (sigreturn).
pub fn restore_frame(
    process: &Arc<Process>,
    frame_addr: u64,
    ctx: &mut UserContext,
) -> KernelResult<()> {
    let mut bytes = [0u8; SignalFrame::SIZE];
    process
        .address_space
        .read_bytes(VirtualAddress::new(frame_addr), &mut bytes)?;
    let frame = SignalFrame::from_bytes(bytes);

    ctx.rip = frame.rip;
    ctx.rsp = frame.rsp;
    ctx.rflags = frame.rflags;
    ctx.regs = frame.regs;
    process
        .signals
        .set_blocked(SigSet::from_bits(frame.saved_mask));
    Ok(())
}

fn invoke_handler(
    process: &Arc<Process>,
    info: SigInfo,
    action: SigAction,
    entry: u64,
    ctx: &mut UserContext,
) -> KernelResult<Delivery> {
    let saved_mask = process.signals.blocked();

    let frame = SignalFrame {
        signal: info.signal as u32,
        code: info.code,
        value: info.value,
        sender_pid: info.sender_pid,
        rip: ctx.rip,
        rsp: ctx.rsp,
        rflags: ctx.rflags,
        regs: ctx.regs,
        saved_mask: saved_mask.bits(),
        _pad: 0,
    };

    // Push the frame below the current stack pointer, 16-byte aligned.
    let frame_addr = ctx
        .rsp
        .checked_sub(SignalFrame::SIZE as u64)
        .ok_or(MemoryError::InvalidAddress)?
        & !0xF;
    process
        .address_space
        .write_bytes(VirtualAddress::new(frame_addr), &frame.to_bytes())?;

    // Block the handler's mask, plus the signal itself unless SA_NODEFER.
    let mut handler_mask = action.mask;
    if action.flags & SA_NODEFER == 0 {
        handler_mask.add(info.signal);
    }
    process.signals.block(handler_mask);

    if action.flags & SA_RESETHAND != 0 {
        process
            .signals
            .set_action(info.signal, SigAction::default())
            .ok();
    }

    ctx.rip = entry;
    ctx.rsp = frame_addr;

    Ok(Delivery::HandlerInvoked {
        handler: entry,
        frame_addr,
    })
}

fn apply_default(process: &Arc<Process>, info: SigInfo) -> Delivery {
    match default_action(info.signal) {
        DefaultAction::Ignore => Delivery::Ignored,
        DefaultAction::Stop => {
            exit::stop_process(process);
            Delivery::Stopped
        }
        DefaultAction::Continue => {
            exit::continue_process(process);
            Delivery::Continued
        }
        DefaultAction::Terminate => {
            exit::exit_on_signal(process, info.signal);
            Delivery::Terminated {
                core_dump: false,
                exit_code: process.exit_code(),
            }
        }
        DefaultAction::TerminateCore => {
            exit::exit_on_signal(process, info.signal);
            Delivery::Terminated {
                core_dump: true,
                exit_code: process.exit_code(),
            }
        }
    }
}

/// Deliver every currently deliverable signal to `process`. Returns the
/// number delivered. Called on the way back to user mode.
pub fn deliver_pending(process: &Arc<Process>, ctx: &mut UserContext) -> KernelResult<usize> {
    let mut delivered = 0;
    while let Some(info) = process.signals.dequeue() {
        let outcome = deliver(process, info, ctx)?;
        delivered += 1;
        match outcome {
            Delivery::Terminated { .. } | Delivery::Stopped | Delivery::HandlerInvoked { .. } => {
                break;
            }
            _ => {}
        }
    }
    Ok(delivered)
}
