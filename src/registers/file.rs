// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The general-purpose register file: R0-R12, banked SPs, LR, PC, and the
//! execution-mode/PC-write disciplines layered over them.

use super::control::{Control, PriorityMasks};
use super::psr::{Flags, ItState, ProgramStatus};

/// {Thread, Handler} execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Thread,
    Handler,
}

/// Which of the two banked stack pointers is architecturally selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackBank {
    Main,
    Process,
}

/// Outcome of writing the PC through one of the three discipline-specific
/// writers. `step` consumes this to decide whether to also run the
/// EXC_RETURN protocol, and always sets the "don't auto-increment PC"
/// latch once any of these has been used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcWrite {
    /// Ordinary branch; PC updated, nothing else to do.
    Branch,
    /// `BXWritePC`/`BLXWritePC` target looked like an EXC_RETURN pattern
    /// (`x[31:28] == 0b1111`) while in Handler mode. Carries the low 28
    /// bits (the pattern) for the exception machinery to interpret.
    ExcReturn(u32),
}

pub struct RegisterFile {
    gpr: [u32; 13],
    sp_main: u32,
    sp_process: u32,
    lr: u32,
    pc: u32,
    pub psr: ProgramStatus,
    pub control: Control,
    pub masks: PriorityMasks,
    mode: Mode,
    /// Set by a PC writer during the current instruction; consumed by
    /// `Core::step` to suppress the default post-increment.
    skip_pc_increment: bool,
}

impl Default for RegisterFile {
    fn default() -> Self {
        RegisterFile {
            gpr: [0; 13],
            sp_main: 0,
            sp_process: 0,
            lr: 0xFFFF_FFFF,
            pc: 0,
            psr: ProgramStatus::default(),
            control: Control::default(),
            masks: PriorityMasks::default(),
            mode: Mode::Thread,
            skip_pc_increment: false,
        }
    }
}

impl RegisterFile {
    /// Resets banks, LR, mode and the PC-discipline latch. Does not set SP
    /// or PC from the vector table; the caller (`Core::reset`) does that
    /// after reading the vector table through the MPU.
    pub fn reset(&mut self) {
        self.gpr = [0; 13];
        self.sp_process = 0;
        self.lr = 0xFFFF_FFFF;
        self.pc = 0;
        self.control.reset();
        self.masks.reset();
        self.mode = Mode::Thread;
        self.skip_pc_increment = false;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Which stack bank SP reads/writes currently select.
    ///
    /// Accessing SP with `CONTROL.SPSEL` set while in Handler mode is
    /// UNPREDICTABLE; callers that must surface that should check
    /// `mode()`/`control.spsel()` themselves before calling
    /// `sp()`/`set_sp()` -- those two always resolve to *some* bank so
    /// internal code (e.g. stack-frame push/pop, which picks its bank
    /// explicitly) never needs this ambiguity resolved for it.
    pub fn current_stack_bank(&self) -> StackBank {
        if self.control.spsel() && self.mode == Mode::Thread {
            StackBank::Process
        } else {
            StackBank::Main
        }
    }

    pub fn sp(&self) -> u32 {
        match self.current_stack_bank() {
            StackBank::Main => self.sp_main,
            StackBank::Process => self.sp_process,
        }
    }

    pub fn set_sp(&mut self, value: u32) {
        match self.current_stack_bank() {
            StackBank::Main => self.sp_main = value,
            StackBank::Process => self.sp_process = value,
        }
    }

    pub fn sp_bank(&self, bank: StackBank) -> u32 {
        match bank {
            StackBank::Main => self.sp_main,
            StackBank::Process => self.sp_process,
        }
    }

    pub fn set_sp_bank(&mut self, bank: StackBank, value: u32) {
        match bank {
            StackBank::Main => self.sp_main = value,
            StackBank::Process => self.sp_process = value,
        }
    }

    /// Sets SP_main directly; used during reset to load the initial value
    /// from the vector table, forcing bits[1:0] to zero.
    pub fn set_initial_sp_main(&mut self, value: u32) {
        self.sp_main = value & !0b11;
    }

    pub fn lr(&self) -> u32 {
        self.lr
    }

    pub fn set_lr(&mut self, value: u32) {
        self.lr = value;
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Raw PC set, bypassing the write disciplines. Used only by
    /// `Core::step`'s post-instruction `pc += width` advance and by reset.
    pub fn set_pc_raw(&mut self, value: u32) {
        self.pc = value;
    }

    pub fn reg(&self, index: u8) -> u32 {
        match index {
            0..=12 => self.gpr[index as usize],
            13 => self.sp(),
            14 => self.lr,
            15 => self.pc,
            _ => panic!("register index {index} out of range"),
        }
    }

    pub fn set_reg(&mut self, index: u8, value: u32) {
        match index {
            0..=12 => self.gpr[index as usize] = value,
            13 => self.set_sp(value),
            14 => self.lr = value,
            15 => self.branch_write_pc(value),
            _ => panic!("register index {index} out of range"),
        }
    }

    pub fn flags(&self) -> Flags {
        self.psr.flags()
    }

    pub fn set_flags(&mut self, flags: Flags) {
        self.psr.set_flags(flags)
    }

    pub fn it_state(&self) -> ItState {
        self.psr.it_state()
    }

    pub fn set_it_state(&mut self, it: ItState) {
        self.psr.set_it_state(it)
    }

    /// Consumes (and clears) the "a PC writer already ran this instruction"
    /// latch that `Core::step` checks before its default post-increment.
    pub fn take_skip_pc_increment(&mut self) -> bool {
        let skip = self.skip_pc_increment;
        self.skip_pc_increment = false;
        skip
    }

    /// `BranchWritePC(address)`: clears bit 0, no interworking.
    pub fn branch_write_pc(&mut self, address: u32) -> PcWrite {
        self.pc = address & !1;
        self.skip_pc_increment = true;
        PcWrite::Branch
    }

    /// `BXWritePC(address)`: clears bit 0, copies bit 0 into EPSR.T, and
    /// recognizes the Handler-mode EXC_RETURN pattern.
    pub fn bx_write_pc(&mut self, address: u32) -> PcWrite {
        if self.mode == Mode::Handler && (address >> 28) == 0b1111 {
            self.skip_pc_increment = true;
            return PcWrite::ExcReturn(address & 0x0FFF_FFFF);
        }
        self.psr.set_thumb((address & 1) != 0);
        self.pc = address & !1;
        self.skip_pc_increment = true;
        PcWrite::Branch
    }

    /// `BLXWritePC(address)`: as `BXWritePC`, but never interpreted as
    /// EXC_RETURN (BLX always keeps executing; a resulting EPSR.T == 0 is
    /// instead caught as UsageFault(InvalidState) on the *next* step).
    pub fn blx_write_pc(&mut self, address: u32) -> PcWrite {
        self.psr.set_thumb((address & 1) != 0);
        self.pc = address & !1;
        self.skip_pc_increment = true;
        PcWrite::Branch
    }
}
