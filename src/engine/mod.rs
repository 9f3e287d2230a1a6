// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The top-level `Core`: owns every sub-component and drives `step()`.

use std::collections::HashSet;

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use tock_registers::interfaces::{Readable, Writeable};

use crate::decode::{condition_passed, decode_16, decode_32, is_32bit, Instruction};
use crate::error::{CoreError, FatalError, FaultKind, MemManageReason, UsageFaultReason};
use crate::exception::{self, ActiveExceptions, ExceptionKind};
use crate::exec::{self, ExecContext, ExecEffect};
use crate::memory::{AddressSpace, MemoryConfig};
use crate::mpu::{self, Access, AccessContext, MpuRegisters, ValidateOutcome};
use crate::nvic::NvicRegisters;
use crate::registers::file::Mode;
use crate::registers::RegisterFile;
use crate::scb::{Cfsr, Hfsr, Icsr, ScbRegisters, Shcsr, Vtor};
use crate::systick::SysTickRegisters;

/// Configurable entry point: a `MemoryConfig` plus an optional CPUID
/// override, so tests can target other Cortex-M3/M4 silicon revisions
/// without the emulator hardcoding one value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub memory: MemoryConfig,
    pub cpuid: Option<u32>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            memory: MemoryConfig::default(),
            cpuid: None,
        }
    }
}

/// The exception a `step` took, if any, reported on `StepOutcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTaken {
    pub number: u32,
    pub kind: ExceptionKind,
}

/// What one `step()` retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub address: u32,
    pub width: u8,
    pub exception_taken: Option<ExceptionTaken>,
}

/// A snapshot of the fault-status registers at the moment a fault was
/// raised, so a host can ask "why did it fault" without re-deriving it from
/// raw register reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultSnapshot {
    pub fault: FaultKind,
    pub cfsr: u32,
    pub hfsr: u32,
    pub mmfar: u32,
    pub bfar: u32,
}

/// The instruction-level execution engine. Owns every sub-component
/// exclusively; a host UI only ever holds borrows into it between `step()`
/// calls.
pub struct Core {
    config: CoreConfig,
    regs: RegisterFile,
    mem: AddressSpace,
    mpu: MpuRegisters,
    scb: ScbRegisters,
    nvic: NvicRegisters,
    systick: SysTickRegisters,
    active: ActiveExceptions,
    breakpoints: HashSet<u32>,
    last_fault: Option<FaultSnapshot>,
}

impl Core {
    /// Sugar for `with_config(image, CoreConfig::default())`.
    pub fn load(image: &[u8]) -> Result<Core, CoreError> {
        Core::with_config(image, CoreConfig::default())
    }

    pub fn with_config(image: &[u8], config: CoreConfig) -> Result<Core, CoreError> {
        let mut mem = AddressSpace::new(config.memory.clone());
        mem.load_image(image)
            .map_err(|(size, capacity)| CoreError::ImageTooLarge { size, capacity })?;

        let mut core = Core {
            config,
            regs: RegisterFile::default(),
            mem,
            mpu: MpuRegisters::default(),
            scb: ScbRegisters::default(),
            nvic: NvicRegisters::default(),
            systick: SysTickRegisters::default(),
            active: ActiveExceptions::new(),
            breakpoints: HashSet::new(),
            last_fault: None,
        };
        core.reset();
        Ok(core)
    }

    /// Resets every sub-component to architectural defaults, then loads
    /// SP_main/PC from the boot vector table.
    ///
    /// Code-alias-by-boot-pin behavior is left unresolved for writes below
    /// `flash_start`; the read side is pinned down here by pointing VTOR at
    /// the boot-selected region's base, so the ordinary VTOR-relative vector
    /// fetch in `exception::exception_taken` also lands in the right place
    /// after reset without a separate alias path.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mpu.reset();
        self.scb.reset();
        if let Some(cpuid) = self.config.cpuid {
            self.scb.cpuid.set(cpuid);
        }
        self.nvic.reset();
        self.systick.reset();
        self.active = ActiveExceptions::new();
        self.last_fault = None;

        let boot_base = match self.config.memory.boot_mode {
            crate::memory::BootMode::FlashMemory => self.config.memory.flash_start,
            crate::memory::BootMode::SystemMemory => self.config.memory.system_mem_start,
            crate::memory::BootMode::Sram => self.config.memory.sram_start,
        };
        self.scb.vtor.write(Vtor::TBLOFF.val(boot_base >> 7));

        let big_endian = self.scb.endianness_big();
        let initial_sp = mpu::read_bytes(&self.mem, boot_base, 4, big_endian);
        let initial_pc = mpu::read_bytes(&self.mem, boot_base + 4, 4, big_endian);
        self.regs.set_initial_sp_main(initial_sp);
        self.regs.psr.reset(initial_pc & 1 != 0);
        self.regs.set_pc_raw(initial_pc & !1);

        debug!(
            "reset: boot_base={:#010x} sp_main={:#010x} pc={:#010x}",
            boot_base, initial_sp, initial_pc
        );
    }

    fn privileged(&self) -> bool {
        self.regs.mode() == Mode::Handler || !self.regs.control.npriv()
    }

    fn execution_priority(&self) -> i16 {
        exception::execution_priority(&self.active, &self.scb, &self.nvic, &self.regs.masks)
    }

    fn fetch_halfword(&self, addr: u32, ctx: AccessContext) -> Result<u16, FaultKind> {
        if addr & 1 != 0 {
            return Err(mpu::unaligned_fault());
        }
        match mpu::validate_address(&self.mpu, addr, Access::InstructionFetch, false, ctx) {
            ValidateOutcome::Hit(_) => {
                Ok(mpu::read_bytes(&self.mem, addr, 2, self.scb.endianness_big()) as u16)
            }
            ValidateOutcome::Fault(f) => Err(f),
            ValidateOutcome::ReservedAp => Err(FaultKind::MemManage(
                MemManageReason::InstructionAccessViolation,
            )),
        }
    }

    /// Runs one instruction: fetch, decode, IT-gated dispatch, PC advance,
    /// SysTick tick, and pending-exception dispatch.
    pub fn step(&mut self) -> Result<StepOutcome, CoreError> {
        let pc = self.regs.pc();
        let access_ctx = AccessContext {
            privileged: self.privileged(),
            execution_priority: self.execution_priority(),
        };

        let hw1 = match self.fetch_halfword(pc & !1, access_ctx) {
            Ok(v) => v,
            Err(fault) => return self.enter_fault(fault, pc, 2),
        };

        let wide = is_32bit(hw1);
        let width: u32 = if wide { 4 } else { 2 };
        let hw2 = if wide {
            match self.fetch_halfword((pc & !1).wrapping_add(2), access_ctx) {
                Ok(v) => v,
                Err(fault) => return self.enter_fault(fault, pc, 4),
            }
        } else {
            0
        };

        trace!(
            "step: pc={:#010x} hw1={:#06x} hw2={:#06x} wide={}",
            pc, hw1, hw2, wide
        );

        let inst = if wide { decode_32(hw1, hw2) } else { decode_16(hw1) };
        let inst = match inst {
            Ok(inst) => inst,
            Err(e) => {
                warn!("step: UNPREDICTABLE at pc={:#010x} hw1={:#06x}: {e}", pc, hw1);
                return Err(CoreError::Unpredictable(e));
            }
        };

        let it = self.regs.it_state();
        let skip = it.in_it_block() && !condition_passed(it.condition(), self.regs.flags());

        let mut exception_taken = None;

        if !skip {
            let big_endian = self.scb.endianness_big();
            let unalign_trp = self.scb.unalign_trp();
            let div_0_trp = self.scb.div_0_trp();
            let privileged = access_ctx.privileged;
            let execution_priority = access_ctx.execution_priority;
            let mut ctx = ExecContext {
                regs: &mut self.regs,
                mem: &mut self.mem,
                mpu: &self.mpu,
                big_endian,
                privileged,
                execution_priority,
                unalign_trp,
                div_0_trp,
            };
            match exec::execute(inst, &mut ctx) {
                Ok(ExecEffect::None) | Ok(ExecEffect::Branched) => {}
                Ok(ExecEffect::Svc(imm)) => {
                    debug!("step: SVC #{imm} at pc={:#010x}", pc);
                    let next = pc.wrapping_add(width);
                    self.enter_exception(ExceptionKind::SvCall, pc, next);
                    exception_taken = Some(ExceptionTaken {
                        number: ExceptionKind::SvCall.number(),
                        kind: ExceptionKind::SvCall,
                    });
                }
                Ok(ExecEffect::ExceptionReturn(pattern)) => {
                    if let Err(e) =
                        exception::exc_return(pattern, &mut self.regs, &self.mem, &self.scb, &mut self.active)
                    {
                        warn!("step: EXC_RETURN rejected at pc={:#010x}: {e}", pc);
                        return Err(CoreError::Unpredictable(e));
                    }
                }
                Err(fault) => return self.enter_fault(fault, pc, width as u8),
            }
        }

        if it.in_it_block() && !matches!(inst, Instruction::It { .. }) {
            self.regs.set_it_state(it.advance());
        }

        if !self.regs.take_skip_pc_increment() {
            self.regs.set_pc_raw(pc.wrapping_add(width));
        }

        if self.systick.tick() {
            self.scb.icsr.modify(Icsr::PENDSTSET::SET);
        }

        if exception_taken.is_none() {
            exception_taken = self.try_dispatch_pending();
        }

        Ok(StepOutcome {
            address: pc,
            width: width as u8,
            exception_taken,
        })
    }

    fn enter_exception(&mut self, kind: ExceptionKind, current: u32, next: u32) {
        debug!("exception entry: kind={kind:?} current={current:#010x} next={next:#010x}");
        exception::exception_entry(
            kind,
            &mut self.regs,
            &mut self.mem,
            &self.scb,
            &mut self.active,
            current,
            next,
        );
    }

    fn apply_fault_to_cfsr(&mut self, fault: FaultKind) {
        match fault {
            FaultKind::UsageFault(reason) => match reason {
                UsageFaultReason::Undefined => self.scb.cfsr.modify(Cfsr::UNDEFINSTR::SET),
                UsageFaultReason::Unaligned => self.scb.cfsr.modify(Cfsr::UNALIGNED::SET),
                UsageFaultReason::InvalidState => self.scb.cfsr.modify(Cfsr::INVSTATE::SET),
                UsageFaultReason::NoCoprocessor => self.scb.cfsr.modify(Cfsr::NOCP::SET),
                UsageFaultReason::DivideByZero => self.scb.cfsr.modify(Cfsr::DIVBYZERO::SET),
            },
            FaultKind::MemManage(reason) => match reason {
                MemManageReason::InstructionAccessViolation => {
                    self.scb.cfsr.modify(Cfsr::IACCVIOL::SET)
                }
                MemManageReason::DataAccessViolation { fault_address } => {
                    self.scb.cfsr.modify(Cfsr::DACCVIOL::SET);
                    if !self.scb.cfsr.is_set(Cfsr::MMARVALID) {
                        self.scb.mmfar.set(fault_address);
                        self.scb.cfsr.modify(Cfsr::MMARVALID::SET);
                    }
                }
            },
            FaultKind::BusFault => self.scb.cfsr.modify(Cfsr::PRECISERR::SET),
        }
    }

    /// Resolves a fault into the exception it raises: the fault's own kind
    /// if that kind is enabled and of higher priority than the current
    /// execution priority, otherwise HardFault. Escalating while HardFault
    /// is already active means the processor has nowhere lower to fall back
    /// to: an unrecoverable double fault.
    fn dispatch_fault_exception(&mut self, fault: FaultKind) -> Result<ExceptionKind, FatalError> {
        let base = match fault {
            FaultKind::UsageFault(_) => ExceptionKind::UsageFault,
            FaultKind::MemManage(_) => ExceptionKind::MemManage,
            FaultKind::BusFault => ExceptionKind::BusFault,
        };
        let enabled = match base {
            ExceptionKind::MemManage => self.scb.shcsr.is_set(Shcsr::MEMFAULTENA),
            ExceptionKind::BusFault => self.scb.shcsr.is_set(Shcsr::BUSFAULTENA),
            ExceptionKind::UsageFault => self.scb.shcsr.is_set(Shcsr::USGFAULTENA),
            _ => true,
        };
        let configured = self.scb.system_priority(base.number()).unwrap_or(0);
        let grouped = exception::group_priority(configured, self.scb.prigroup()) as i16;
        if enabled && grouped < self.execution_priority() {
            Ok(base)
        } else if self.active.contains(ExceptionKind::HardFault.number()) {
            Err(FatalError::UnrecoverableDoubleFault)
        } else {
            self.scb.hfsr.modify(Hfsr::FORCED::SET);
            Ok(ExceptionKind::HardFault)
        }
    }

    fn enter_fault(&mut self, fault: FaultKind, current: u32, width: u8) -> Result<StepOutcome, CoreError> {
        warn!("step: fault {fault:?} at pc={current:#010x}");
        self.apply_fault_to_cfsr(fault);
        let kind = self.dispatch_fault_exception(fault)?;

        self.last_fault = Some(FaultSnapshot {
            fault,
            cfsr: self.scb.cfsr.get(),
            hfsr: self.scb.hfsr.get(),
            mmfar: self.scb.mmfar.get(),
            bfar: self.scb.bfar.get(),
        });

        // current is also the return address: every FaultKind this path
        // handles is synchronous (UsageFault/MemManage/BusFault).
        self.enter_exception(kind, current, current);

        Ok(StepOutcome {
            address: current,
            width,
            exception_taken: Some(ExceptionTaken {
                number: kind.number(),
                kind,
            }),
        })
    }

    /// Finds and, if higher priority than the current execution priority,
    /// takes the highest-priority pending system exception or external
    /// interrupt.
    fn try_dispatch_pending(&mut self) -> Option<ExceptionTaken> {
        let prigroup = self.scb.prigroup();
        let exec_prio = self.execution_priority();

        let mut best: Option<(ExceptionKind, i16)> = None;
        let mut consider = |kind: ExceptionKind, raw: u8, best: &mut Option<(ExceptionKind, i16)>| {
            let grouped = exception::group_priority(raw, prigroup) as i16;
            if best.map(|(_, p)| grouped < p).unwrap_or(true) {
                *best = Some((kind, grouped));
            }
        };

        if self.scb.icsr.is_set(Icsr::PENDSTSET)
            && !self.active.contains(ExceptionKind::SysTick.number())
        {
            let raw = self.scb.system_priority(ExceptionKind::SysTick.number()).unwrap_or(0);
            consider(ExceptionKind::SysTick, raw, &mut best);
        }
        if self.scb.icsr.is_set(Icsr::PENDSVSET)
            && !self.active.contains(ExceptionKind::PendSv.number())
        {
            let raw = self.scb.system_priority(ExceptionKind::PendSv.number()).unwrap_or(0);
            consider(ExceptionKind::PendSv, raw, &mut best);
        }
        if let Some(n) = self.nvic.highest_priority_pending() {
            consider(ExceptionKind::External(n), self.nvic.priority(n), &mut best);
        }

        let (kind, grouped) = best?;
        if grouped >= exec_prio {
            return None;
        }

        match kind {
            ExceptionKind::SysTick => self.scb.icsr.modify(Icsr::PENDSTSET::CLEAR),
            ExceptionKind::PendSv => self.scb.icsr.modify(Icsr::PENDSVSET::CLEAR),
            ExceptionKind::External(n) => self.nvic.set_pending(n, false),
            _ => {}
        }

        let pc = self.regs.pc();
        self.enter_exception(kind, pc, pc);
        Some(ExceptionTaken {
            number: kind.number(),
            kind,
        })
    }

    pub fn add_breakpoint(&mut self, address: u32) {
        self.breakpoints.insert(address);
    }

    pub fn remove_breakpoint(&mut self, address: u32) {
        self.breakpoints.remove(&address);
    }

    pub fn is_breakpoint(&self, address: u32) -> bool {
        self.breakpoints.contains(&address)
    }

    pub fn last_fault(&self) -> Option<FaultSnapshot> {
        self.last_fault
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn memory(&self) -> &AddressSpace {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut AddressSpace {
        &mut self.mem
    }

    pub fn mpu(&self) -> &MpuRegisters {
        &self.mpu
    }

    pub fn mpu_mut(&mut self) -> &mut MpuRegisters {
        &mut self.mpu
    }

    pub fn scb(&self) -> &ScbRegisters {
        &self.scb
    }

    pub fn scb_mut(&mut self) -> &mut ScbRegisters {
        &mut self.scb
    }

    pub fn nvic(&self) -> &NvicRegisters {
        &self.nvic
    }

    pub fn nvic_mut(&mut self) -> &mut NvicRegisters {
        &mut self.nvic
    }

    pub fn systick(&self) -> &SysTickRegisters {
        &self.systick
    }

    pub fn systick_mut(&mut self) -> &mut SysTickRegisters {
        &mut self.systick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_with_vectors(sp: u32, pc: u32) -> Vec<u8> {
        let mut image = vec![0u8; 0x40];
        image[0..4].copy_from_slice(&sp.to_le_bytes());
        image[4..8].copy_from_slice(&pc.to_le_bytes());
        image
    }

    #[test]
    fn reset_loads_sp_and_pc_from_vector_table() {
        let image = image_with_vectors(0x2000_0400, 0x0800_0009);
        let core = Core::load(&image).unwrap();
        assert_eq!(core.registers().sp(), 0x2000_0400);
        assert_eq!(core.registers().pc(), 0x0800_0008);
        assert!(core.registers().psr.thumb());
    }

    #[test]
    fn step_executes_movs_and_advances_pc() {
        let flash_start = MemoryConfig::default().flash_start;
        let mut image = image_with_vectors(0x2000_0400, flash_start | 1);
        image.extend_from_slice(&0x202Au16.to_le_bytes()); // MOVS R0, #0x2A
        let mut core = Core::load(&image).unwrap();
        let pc_before = core.registers().pc();
        let outcome = core.step().unwrap();
        assert_eq!(outcome.address, pc_before);
        assert_eq!(outcome.width, 2);
        assert_eq!(core.registers().reg(0), 0x2A);
        assert!(!core.registers().flags().n);
        assert!(!core.registers().flags().z);
        assert_eq!(core.registers().pc(), pc_before + 2);
    }

    #[test]
    fn misaligned_word_load_raises_usage_fault_and_enters_handler_mode() {
        let flash_start = MemoryConfig::default().flash_start;
        let mut image = image_with_vectors(0x2000_0400, flash_start | 1);
        // LDR R2, [R1] with R1 misaligned: encoding 0x6809 (LDR R1,[R1,#0])
        // reused with R1 itself holding a misaligned address.
        image.extend_from_slice(&0x2101u16.to_le_bytes()); // MOVS R1, #1
        image.extend_from_slice(&0x6809u16.to_le_bytes()); // LDR R1, [R1, #0]
        let mut core = Core::load(&image).unwrap();
        core.step().unwrap();
        let outcome = core.step().unwrap();
        assert!(outcome.exception_taken.is_some());
        assert_eq!(core.registers().mode(), Mode::Handler);
        assert_eq!(core.registers().lr(), 0xFFFF_FFF9);
        let fault = core.last_fault().unwrap();
        assert_eq!(fault.fault, FaultKind::UsageFault(UsageFaultReason::Unaligned));
    }

    #[test]
    fn breakpoints_are_idempotent() {
        let image = image_with_vectors(0x2000_0400, 0x0800_0009);
        let mut core = Core::load(&image).unwrap();
        core.add_breakpoint(0x0800_0010);
        core.add_breakpoint(0x0800_0010);
        assert!(core.is_breakpoint(0x0800_0010));
        core.remove_breakpoint(0x0800_0010);
        assert!(!core.is_breakpoint(0x0800_0010));
    }
}
