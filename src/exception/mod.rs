// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Exception priority, entry and return.

use crate::error::Unpredictable;
use crate::memory::AddressSpace;
use crate::mpu::{read_bytes, write_bytes};
use crate::nvic::NvicRegisters;
use crate::registers::file::{Mode, PcWrite, StackBank};
use crate::registers::psr::ItState;
use crate::registers::RegisterFile;
use crate::scb::{system_exception, ScbRegisters, Vtor};
use log::debug;
use tock_registers::interfaces::Readable;

/// The set of architecturally-defined exception numbers, plus external
/// interrupts as an offset from NVIC line 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    Nmi,
    HardFault,
    MemManage,
    BusFault,
    UsageFault,
    SvCall,
    PendSv,
    SysTick,
    External(u32),
}

impl ExceptionKind {
    pub fn number(self) -> u32 {
        match self {
            ExceptionKind::Nmi => 2,
            ExceptionKind::HardFault => 3,
            ExceptionKind::MemManage => 4,
            ExceptionKind::BusFault => 5,
            ExceptionKind::UsageFault => 6,
            ExceptionKind::SvCall => 11,
            ExceptionKind::PendSv => 14,
            ExceptionKind::SysTick => 15,
            ExceptionKind::External(n) => 16 + n,
        }
    }

    pub fn from_number(number: u32) -> Option<ExceptionKind> {
        Some(match number {
            2 => ExceptionKind::Nmi,
            3 => ExceptionKind::HardFault,
            4 => ExceptionKind::MemManage,
            5 => ExceptionKind::BusFault,
            6 => ExceptionKind::UsageFault,
            11 => ExceptionKind::SvCall,
            14 => ExceptionKind::PendSv,
            15 => ExceptionKind::SysTick,
            n if n >= 16 => ExceptionKind::External(n - 16),
            _ => return None,
        })
    }

    /// Whether `return_address` is the current (not next) instruction: true
    /// for the synchronous fault exceptions, which return to the faulting
    /// instruction rather than past it.
    fn is_synchronous(self) -> bool {
        matches!(
            self,
            ExceptionKind::MemManage | ExceptionKind::UsageFault | ExceptionKind::BusFault
        )
    }
}

/// Exceptions currently active (stacked), most-recently-entered last.
#[derive(Debug, Default, Clone)]
pub struct ActiveExceptions {
    stack: Vec<u32>,
}

impl ActiveExceptions {
    pub fn new() -> Self {
        ActiveExceptions { stack: Vec::new() }
    }

    pub fn push(&mut self, exception_number: u32) {
        self.stack.push(exception_number);
    }

    pub fn pop(&mut self) -> Option<u32> {
        self.stack.pop()
    }

    pub fn contains(&self, exception_number: u32) -> bool {
        self.stack.contains(&exception_number)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.stack.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// The address to stack as the return address for an exception of this kind.
pub fn return_address_for(kind: ExceptionKind, current_instruction: u32, next_instruction: u32) -> u32 {
    if kind.is_synchronous() {
        current_instruction
    } else {
        next_instruction
    }
}

/// Masks off the sub-priority bits of an 8-bit configurable priority
/// according to `AIRCR.PRIGROUP`, leaving only the pre-empt-priority field.
pub fn group_priority(raw: u8, prigroup: u8) -> u8 {
    let prigroup = prigroup.min(7);
    let group_bits = prigroup + 1;
    let shift = 8 - group_bits;
    raw & (0xFFu8 << shift)
}

/// The configured priority for an exception number, before PRIGROUP
/// grouping. Fixed-priority exceptions (NMI, HardFault) are exempt from
/// grouping; see `execution_priority`.
fn configured_priority(kind: ExceptionKind, scb: &ScbRegisters, nvic: &NvicRegisters) -> i16 {
    match kind {
        ExceptionKind::Nmi => -2,
        ExceptionKind::HardFault => -1,
        ExceptionKind::External(n) => nvic.priority(n) as i16,
        _ => scb.system_priority(kind.number()).unwrap_or(0) as i16,
    }
}

/// The processor's current execution priority: the smallest of 256, each
/// active exception's grouped priority, grouped BASEPRI if non-zero, 0 if
/// PRIMASK, and -1 if FAULTMASK.
pub fn execution_priority(
    active: &ActiveExceptions,
    scb: &ScbRegisters,
    nvic: &NvicRegisters,
    masks: &crate::registers::control::PriorityMasks,
) -> i16 {
    let prigroup = scb.prigroup();
    let mut best: i16 = 256;
    for number in active.iter() {
        if let Some(kind) = ExceptionKind::from_number(number) {
            let raw = configured_priority(kind, scb, nvic);
            let grouped = if matches!(kind, ExceptionKind::Nmi | ExceptionKind::HardFault) {
                raw
            } else {
                group_priority(raw as u8, prigroup) as i16
            };
            best = best.min(grouped);
        }
    }
    if masks.basepri != 0 {
        best = best.min(group_priority(masks.basepri, prigroup) as i16);
    }
    if masks.primask {
        best = best.min(0);
    }
    if masks.faultmask {
        best = best.min(-1);
    }
    best
}

/// Chooses the frame bank, stacks the 8 words, and encodes EXC_RETURN into
/// LR. `return_address` is precomputed by the caller via `return_address_for`.
pub fn push_stack(
    regs: &mut RegisterFile,
    mem: &mut AddressSpace,
    scb: &ScbRegisters,
    return_address: u32,
) {
    let bank = if regs.control.spsel() && regs.mode() == Mode::Thread {
        StackBank::Process
    } else {
        StackBank::Main
    };
    let sp = regs.sp_bank(bank);
    let align = sp & 0b100 != 0 && scb.stkalign();
    let frame_sp = sp.wrapping_sub(0x20) & !0b100u32;
    regs.set_sp_bank(bank, frame_sp);

    let big_endian = scb.endianness_big();
    let xpsr_frame = (regs.psr.as_u32() & !(1 << 9)) | ((align as u32) << 9);
    let words = [
        regs.reg(0),
        regs.reg(1),
        regs.reg(2),
        regs.reg(3),
        regs.reg(12),
        regs.lr(),
        return_address,
        xpsr_frame,
    ];
    for (i, word) in words.iter().enumerate() {
        write_bytes(mem, frame_sp + (i as u32) * 4, *word, 4, big_endian);
    }

    let exc_return = if regs.mode() == Mode::Handler {
        0xFFFF_FFF1
    } else if bank == StackBank::Process {
        0xFFFF_FFFD
    } else {
        0xFFFF_FFF9
    };
    regs.set_lr(exc_return);
}

/// Vector fetch, mode switch, IPSR update, IT-state clear, CONTROL.SPSEL
/// clear, and active-set mark for a taken exception.
pub fn exception_taken(
    kind: ExceptionKind,
    regs: &mut RegisterFile,
    mem: &AddressSpace,
    scb: &ScbRegisters,
    active: &mut ActiveExceptions,
) {
    let table_base = scb.vtor.read(Vtor::TBLOFF) << 7;
    let entry_addr = table_base + kind.number() * 4;
    let handler = read_bytes(mem, entry_addr, 4, scb.endianness_big());

    debug!(
        "exception_taken: kind={:?} vector={:#010x} handler={:#010x}",
        kind, entry_addr, handler
    );

    regs.branch_write_pc(handler);
    regs.set_mode(Mode::Handler);
    regs.psr.set_exception_number(kind.number() as u16);
    regs.psr.set_thumb(handler & 1 != 0);
    regs.set_it_state(ItState(0));
    regs.control.set_spsel(false);
    active.push(kind.number());
}

/// `exception_entry(kind)`: `push_stack` then `exception_taken`.
pub fn exception_entry(
    kind: ExceptionKind,
    regs: &mut RegisterFile,
    mem: &mut AddressSpace,
    scb: &ScbRegisters,
    active: &mut ActiveExceptions,
    current_instruction: u32,
    next_instruction: u32,
) {
    let return_address = return_address_for(kind, current_instruction, next_instruction);
    push_stack(regs, mem, scb, return_address);
    exception_taken(kind, regs, mem, scb, active);
}

/// Unstacks an exception frame and restores the interrupted context.
/// `pattern` is the low 28 bits carried by `PcWrite::ExcReturn`.
pub fn exc_return(
    pattern: u32,
    regs: &mut RegisterFile,
    mem: &AddressSpace,
    scb: &ScbRegisters,
    active: &mut ActiveExceptions,
) -> Result<(), Unpredictable> {
    let nibble = (pattern & 0xF) as u8;
    let (mode, bank) = match nibble {
        0b0001 => (Mode::Handler, StackBank::Main),
        0b1001 => (Mode::Thread, StackBank::Main),
        0b1101 => (Mode::Thread, StackBank::Process),
        other => return Err(Unpredictable::ReservedExcReturn(other)),
    };

    let sp = regs.sp_bank(bank);
    let big_endian = scb.endianness_big();
    let word = |offset: u32| read_bytes(mem, sp + offset, 4, big_endian);

    let r0 = word(0x00);
    let r1 = word(0x04);
    let r2 = word(0x08);
    let r3 = word(0x0C);
    let r12 = word(0x10);
    let lr = word(0x14);
    let pc = word(0x18);
    let xpsr_frame = word(0x1C);

    let align = (xpsr_frame >> 9) & 1;
    let new_sp = sp.wrapping_add(0x20).wrapping_add(align << 2);
    regs.set_sp_bank(bank, new_sp);

    regs.set_reg(0, r0);
    regs.set_reg(1, r1);
    regs.set_reg(2, r2);
    regs.set_reg(3, r3);
    regs.set_reg(12, r12);
    regs.set_lr(lr);
    regs.psr.set_u32(xpsr_frame & !(1 << 9));
    regs.set_mode(mode);
    regs.control.set_spsel(bank == StackBank::Process);

    match regs.branch_write_pc(pc) {
        PcWrite::Branch => {}
        PcWrite::ExcReturn(_) => unreachable!("BranchWritePC never re-enters EXC_RETURN"),
    }

    active.pop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConfig;

    #[test]
    fn group_priority_masks_subpriority_bits() {
        assert_eq!(group_priority(0b1010_1010, 0), 0b1000_0000);
        assert_eq!(group_priority(0b1010_1010, 7), 0b1010_1010);
        assert_eq!(group_priority(0b1010_1010, 3), 0b1010_0000);
    }

    #[test]
    fn execution_priority_reflects_faultmask_and_primask() {
        let scb = ScbRegisters::default();
        let nvic = NvicRegisters::default();
        let active = ActiveExceptions::new();
        let mut masks = crate::registers::control::PriorityMasks::default();
        assert_eq!(execution_priority(&active, &scb, &nvic, &masks), 256);
        masks.primask = true;
        assert_eq!(execution_priority(&active, &scb, &nvic, &masks), 0);
        masks.faultmask = true;
        assert_eq!(execution_priority(&active, &scb, &nvic, &masks), -1);
    }

    #[test]
    fn active_nmi_dominates_configurable_exceptions() {
        let scb = ScbRegisters::default();
        let nvic = NvicRegisters::default();
        let mut active = ActiveExceptions::new();
        active.push(system_exception::SVCALL);
        active.push(ExceptionKind::Nmi.number());
        let masks = crate::registers::control::PriorityMasks::default();
        assert_eq!(execution_priority(&active, &scb, &nvic, &masks), -2);
    }

    #[test]
    fn push_then_exc_return_restores_registers_and_sp() {
        let mut regs = RegisterFile::default();
        let mut mem = AddressSpace::new(MemoryConfig::default());
        let scb = ScbRegisters::default();
        let mut active = ActiveExceptions::new();

        regs.set_initial_sp_main(0x2000_1000);
        regs.set_reg(0, 0x1111_1111);
        regs.set_reg(4, 0x2222_2222); // not stacked; should survive untouched
        regs.set_lr(0x0800_0123);

        let original_sp = regs.sp();
        exception_entry(
            ExceptionKind::SvCall,
            &mut regs,
            &mut mem,
            &scb,
            &mut active,
            0x0800_0010,
            0x0800_0012,
        );
        assert_eq!(regs.mode(), Mode::Handler);
        assert_eq!(regs.sp(), original_sp - 0x20);

        let pattern = regs.lr() & 0x0FFF_FFFF;
        exc_return(pattern, &mut regs, &mem, &scb, &mut active).unwrap();
        assert_eq!(regs.mode(), Mode::Thread);
        assert_eq!(regs.sp(), original_sp);
        assert_eq!(regs.reg(0), 0x1111_1111);
        assert_eq!(regs.reg(4), 0x2222_2222);
        assert!(active.is_empty());
    }

    #[test]
    fn exc_return_rejects_reserved_nibble() {
        let mut regs = RegisterFile::default();
        let mem = AddressSpace::new(MemoryConfig::default());
        let scb = ScbRegisters::default();
        let mut active = ActiveExceptions::new();
        assert_eq!(
            exc_return(0x0FFF_FFF0, &mut regs, &mem, &scb, &mut active),
            Err(Unpredictable::ReservedExcReturn(0))
        );
    }
}
