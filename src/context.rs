//! Execution-context identifiers
//!
//! An [`ExecutionContext`] names "where in the program" a memory access
//! happened: a call-stack signature, the program counter, the caller's return
//! address and the privilege mode. Contexts are produced by an external
//! resolver and used here purely as map keys, so equality is field-wise and
//! ordering is lexicographic over the fields in declaration order.

use serde::{Deserialize, Serialize};

/// How the call-stack signature of a context was captured
///
/// The discriminants are part of the report format and must not change.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum StackKind {
    /// Signature keyed on the address-space identifier only
    #[default]
    Asid = 0,
    /// Signature recovered by a stack-pointer heuristic
    Heuristic = 1,
    /// Signature keyed on address space and guest thread
    Threaded = 2,
}

impl StackKind {
    /// Width in bytes of a stack kind when written to a report
    pub const ENCODED_WIDTH: u32 = std::mem::size_of::<StackKind>() as u32;

    /// Raw on-disk value
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Decode a raw on-disk value, returning `None` for unknown kinds
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(StackKind::Asid),
            1 => Some(StackKind::Heuristic),
            2 => Some(StackKind::Threaded),
            _ => None,
        }
    }
}

/// Canonical identifier of the program point of a memory access
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ExecutionContext {
    /// How `sid_first`/`sid_second` were derived
    pub stack_kind: StackKind,
    /// Return address of the calling frame
    pub caller: u64,
    /// Program counter of the accessing instruction
    pub pc: u64,
    /// First half of the call-stack signature
    pub sid_first: u64,
    /// Second half of the call-stack signature
    pub sid_second: u64,
    /// Whether the access happened in kernel mode
    pub is_kernel_mode: bool,
}

impl ExecutionContext {
    /// Create a user-mode context
    pub fn new(stack_kind: StackKind, caller: u64, pc: u64, sid: (u64, u64)) -> Self {
        Self {
            stack_kind,
            caller,
            pc,
            sid_first: sid.0,
            sid_second: sid.1,
            is_kernel_mode: false,
        }
    }

    /// Mark the context as kernel mode
    pub fn in_kernel(mut self) -> Self {
        self.is_kernel_mode = true;
        self
    }

    /// Address-sized fields in report order
    pub fn address_fields(&self) -> [(&'static str, u64); 4] {
        [
            ("caller", self.caller),
            ("pc", self.pc),
            ("sid_first", self.sid_first),
            ("sid_second", self.sid_second),
        ]
    }
}

impl std::fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} pc={:#x} caller={:#x} sid=({:#x}, {:#x}){}",
            self.stack_kind,
            self.pc,
            self.caller,
            self.sid_first,
            self.sid_second,
            if self.is_kernel_mode { " [kernel]" } else { "" }
        )
    }
}
