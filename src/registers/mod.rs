// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Register file: general registers, banked SPs, the xPSR views, masks,
//! CONTROL, and IT-state.

pub mod control;
pub mod file;
pub mod psr;

pub use control::{Control, PriorityMasks};
pub use file::{Mode, PcWrite, RegisterFile, StackBank};
pub use psr::{Flags, ItState, ProgramStatus};
