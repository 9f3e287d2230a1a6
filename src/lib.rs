// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! An instruction-level emulator for the ARMv7-M (Thumb/Thumb-2) instruction
//! set: decode, execute, and exception entry/return, driven one instruction
//! at a time through [`engine::Core::step`].

pub mod bits;
pub mod decode;
pub mod engine;
pub mod error;
pub mod exception;
pub mod exec;
pub mod memory;
pub mod mpu;
pub mod nvic;
pub mod registers;
pub mod scb;
pub mod systick;

pub use engine::{Core, CoreConfig, ExceptionTaken, FaultSnapshot, StepOutcome};
pub use error::{CoreError, FatalError, FaultKind, MemManageReason, UsageFaultReason, Unpredictable};
pub use memory::{BootMode, MemoryConfig};
