// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error axes.
//!
//! Architectural faults are *not* represented here: they are recovered
//! in-place by the exception machinery and never escape `Core::step` as an
//! `Err`. What remains are UNPREDICTABLE conditions and host-level errors.

use thiserror::Error;

/// A UNPREDICTABLE condition per the ARMv7-M ARM. Aborts the current `step`
/// without advancing PC or touching architectural state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Unpredictable {
    #[error("SP accessed with CONTROL.SPSEL set while in Handler mode")]
    SpInHandlerWithSpsel,
    #[error("MPU enabled with HFNMIENA set while execution priority < 0")]
    MpuHfnmienaWithNegativePriority,
    #[error("MPU region AP encoding 0b100 is reserved")]
    ReservedMpuAp,
    #[error("thumb_expand_imm replication pattern used a zero byte")]
    ThumbExpandImmZeroByte,
    #[error("decoder reached an encoding reserved as UNPREDICTABLE: {0:#06x}")]
    ReservedEncoding(u32),
    #[error("EXC_RETURN pattern has a reserved low nibble: {0:#03x}")]
    ReservedExcReturn(u8),
    #[error("branch-with-link-and-exchange target has EPSR.T == 0")]
    InterworkingToArm,
    #[error("register list for load/store-multiple was empty")]
    EmptyRegisterList,
    #[error("writeback register also appears in the loaded/stored register list")]
    WritebackRegisterInList,
}

/// Internal fault classification. Consumed by the exception machinery;
/// converted into a vector fetch + stack frame, never surfaced as an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    UsageFault(UsageFaultReason),
    MemManage(MemManageReason),
    BusFault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageFaultReason {
    Undefined,
    Unaligned,
    InvalidState,
    NoCoprocessor,
    DivideByZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemManageReason {
    InstructionAccessViolation,
    DataAccessViolation { fault_address: u32 },
}

/// Unrecoverable internal inconsistency. `Core::step` returns this only when
/// the emulator itself cannot continue (e.g. a double-fault escalation that
/// would itself re-fault with no handler bank to stack to); ordinary
/// architectural faults are HardFault entries, not this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("fault occurred while the processor was already at its lowest priority bank and could not be escalated further")]
    UnrecoverableDoubleFault,
}

/// Host-level errors: never touch core architectural state.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("firmware image of {size} bytes exceeds flash capacity of {capacity} bytes")]
    ImageTooLarge { size: usize, capacity: usize },
    #[error(transparent)]
    Unpredictable(#[from] Unpredictable),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}
