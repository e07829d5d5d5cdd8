//! Process management
//!
//! The process control block, the global process table, fork (which drives
//! the copy-on-write engine), exit and reaping, per-process resource
//! accounting with UID quotas, and hierarchical resource groups with
//! throttles.

pub mod accounting;
pub mod exit;
pub mod fork;
pub mod pcb;
pub mod rgroup;
pub mod table;

pub use accounting::{ResourceUsage, RusageSnapshot};
pub use pcb::{Process, ProcessId, ProcessState};
pub use rgroup::ResourceGroup;
pub use table::{current_process, set_current};

/// Pid of the init process; orphans are reparented to it.
pub const INIT_PID: ProcessId = ProcessId(1);
