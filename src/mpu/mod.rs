// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The Memory Protection Unit and the access checker wrapping every
//! instruction and data access.

pub mod regs;

pub use regs::{MpuCtrl, MpuRasr, MpuRbar, MpuRegisters, MpuRnr, MpuType, DREGION};

use crate::error::{FaultKind, MemManageReason, UsageFaultReason};
use crate::memory::{map, AddressSpace};
use tock_registers::interfaces::Readable;

/// The kind of access being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Normal,
    Unprivileged,
    VecTable,
    InstructionFetch,
}

/// Memory region attributes (TEX/C/B/S plus AP/XN), independent of the
/// specific MPU region that produced them -- the background/default map
/// produces the same shape of value as a matched region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionAttrs {
    pub ap: u8,
    pub xn: bool,
    pub tex: u8,
    pub c: bool,
    pub b: bool,
    pub s: bool,
}

impl RegionAttrs {
    const NORMAL_RW: RegionAttrs = RegionAttrs {
        ap: 0b011,
        xn: false,
        tex: 0b000,
        c: true,
        b: true,
        s: true,
    };

    const DEVICE_RW_XN: RegionAttrs = RegionAttrs {
        ap: 0b011,
        xn: true,
        tex: 0b000,
        c: false,
        b: true,
        s: true,
    };

    const STRONGLY_ORDERED_XN: RegionAttrs = RegionAttrs {
        ap: 0b011,
        xn: true,
        tex: 0b000,
        c: false,
        b: false,
        s: false,
    };
}

/// Default attributes derived purely from the fixed memory map, used both
/// when the MPU is disabled/bypassed and as the PRIVDEFENA background
/// region.
pub fn default_attributes_for(addr: u32) -> RegionAttrs {
    if addr >= map::PPB_START {
        // PPB, External PPB and System: always execute-never, strongly ordered.
        RegionAttrs::STRONGLY_ORDERED_XN
    } else if addr >= map::PERIPHERAL_START && addr < map::PERIPHERAL_END
        || addr >= map::EXTERNAL_DEVICE_START && addr < map::EXTERNAL_DEVICE_END
    {
        RegionAttrs::DEVICE_RW_XN
    } else {
        // Code, SRAM, External RAM: normal, cacheable, shareable.
        RegionAttrs::NORMAL_RW
    }
}

/// The descriptor produced by a successful `validate_address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressDescriptor {
    pub attrs: RegionAttrs,
}

/// Everything `validate_address` needs about the current processor state
/// that the MPU registers themselves don't carry.
#[derive(Debug, Clone, Copy)]
pub struct AccessContext {
    pub privileged: bool,
    pub execution_priority: i16,
}

/// `True` if a reserved-but-not-architecturally-fatal AP encoding (0b100)
/// was used; callers treat this as `Unpredictable`.
fn ap_is_reserved(ap: u8) -> bool {
    ap == 0b100
}

/// Permission table: returns whether the access faults, or `None` if the AP
/// encoding is the reserved 0b100.
fn ap_faults(ap: u8, privileged: bool, is_write: bool) -> Option<bool> {
    Some(match ap {
        0b000 => true,
        0b001 => !privileged,
        0b010 => !privileged && is_write,
        0b011 => false,
        0b100 => return None,
        0b101 => !privileged || is_write,
        0b110 => is_write,
        0b111 => is_write,
        _ => unreachable!("AP is a 3-bit field"),
    })
}

/// A region matches the addressed subregion, per the MPU's region
/// iteration rule.
fn region_matches(rbar: &regs::MpuRbar::Register, rasr_reg: u32, addr: u32) -> bool {
    use tock_registers::LocalRegisterCopy;
    let rasr = LocalRegisterCopy::<u32, regs::MpuRasr::Register>::new(rasr_reg);
    if !rasr.is_set(regs::MpuRasr::ENABLE) {
        return false;
    }
    let size_field = rasr.read(regs::MpuRasr::SIZE);
    let region_size: u64 = 1u64 << (size_field + 1);
    let base = rbar.read(regs::MpuRbar::ADDR) << 5;
    if region_size == 1u64 << 32 {
        // SIZE+1 == 32: whole address space, base must be 0.
        true
    } else {
        let region_size = region_size as u32;
        let top_mask = !(region_size - 1);
        if (addr & top_mask) != (base & top_mask) {
            return false;
        }
        if region_size >= 256 {
            let subregion_size = region_size >> 3;
            let subregion = ((addr - (base & top_mask)) / subregion_size) & 0b111;
            let srd = rasr.read(regs::MpuRasr::SRD);
            (srd >> subregion) & 1 == 0
        } else {
            true
        }
    }
}

fn region_attrs(rasr_reg: u32) -> RegionAttrs {
    use tock_registers::LocalRegisterCopy;
    let rasr = LocalRegisterCopy::<u32, regs::MpuRasr::Register>::new(rasr_reg);
    RegionAttrs {
        ap: rasr.read(regs::MpuRasr::AP) as u8,
        xn: rasr.is_set(regs::MpuRasr::XN),
        tex: rasr.read(regs::MpuRasr::TEX) as u8,
        c: rasr.is_set(regs::MpuRasr::C),
        b: rasr.is_set(regs::MpuRasr::B),
        s: rasr.is_set(regs::MpuRasr::S),
    }
}

/// Outcome of `validate_address`: computes a hit/miss and, on a hit, checks
/// permissions. Returns the matched attributes or the `FaultKind` to raise.
/// A reserved AP=0b100 match surfaces as its own variant rather than being
/// folded into `Fault`.
pub enum ValidateOutcome {
    Hit(AddressDescriptor),
    Fault(FaultKind),
    ReservedAp,
}

pub fn validate_address(
    mpu: &MpuRegisters,
    addr: u32,
    access: Access,
    is_write: bool,
    ctx: AccessContext,
) -> ValidateOutcome {
    let top12 = addr >> 20;
    if access == Access::VecTable || top12 == 0xE00 {
        return ValidateOutcome::Hit(AddressDescriptor {
            attrs: default_attributes_for(addr),
        });
    }

    let enabled = mpu.ctrl.is_set(regs::MpuCtrl::ENABLE);
    let hfnmiena = mpu.ctrl.is_set(regs::MpuCtrl::HFNMIENA);
    let privdefena = mpu.ctrl.is_set(regs::MpuCtrl::PRIVDEFENA);

    if !enabled {
        return ValidateOutcome::Hit(AddressDescriptor {
            attrs: default_attributes_for(addr),
        });
    }

    if ctx.execution_priority < 0 && !hfnmiena {
        return ValidateOutcome::Hit(AddressDescriptor {
            attrs: default_attributes_for(addr),
        });
    }

    let mut matched: Option<(usize, u32)> = None;
    for region in 0..DREGION as usize {
        let rasr_reg = mpu.rasr[region].get();
        if region_matches(&mpu.rbar[region], rasr_reg, addr) {
            matched = Some((region, rasr_reg));
        }
    }

    let mut attrs = match matched {
        Some((_, rasr_reg)) => region_attrs(rasr_reg),
        None if privdefena && ctx.privileged => default_attributes_for(addr),
        None => {
            return ValidateOutcome::Fault(miss_fault(addr, access));
        }
    };

    if addr >= map::SYSTEM_START {
        attrs.xn = true;
    }

    match ap_faults(attrs.ap, ctx.privileged, is_write) {
        None => ValidateOutcome::ReservedAp,
        Some(fault) => {
            let instr_fault = access == Access::InstructionFetch && attrs.xn;
            if fault || instr_fault {
                ValidateOutcome::Fault(FaultKind::MemManage(if access == Access::InstructionFetch
                {
                    MemManageReason::InstructionAccessViolation
                } else {
                    MemManageReason::DataAccessViolation {
                        fault_address: addr,
                    }
                }))
            } else {
                ValidateOutcome::Hit(AddressDescriptor { attrs })
            }
        }
    }
}

fn miss_fault(addr: u32, access: Access) -> FaultKind {
    match access {
        Access::InstructionFetch => FaultKind::MemManage(MemManageReason::InstructionAccessViolation),
        _ => FaultKind::MemManage(MemManageReason::DataAccessViolation {
            fault_address: addr,
        }),
    }
}

/// Checks natural alignment for `T` (u8 always aligned, u16 needs bit0
/// clear, u32 needs bits[1:0] clear).
pub fn is_aligned<T>(addr: u32) -> bool {
    match core::mem::size_of::<T>() {
        1 => true,
        2 => addr & 0b1 == 0,
        4 => addr & 0b11 == 0,
        _ => unreachable!("only u8/u16/u32 are supported access widths"),
    }
}

/// A byte-wise load/store helper used by both the aligned and the
/// (unaligned, split-into-bytes) access paths.
pub fn read_bytes(mem: &AddressSpace, addr: u32, len: usize, big_endian: bool) -> u32 {
    let mut bytes = [0u8; 4];
    for i in 0..len {
        bytes[i] = mem.read(addr.wrapping_add(i as u32));
    }
    let mut value = u32::from_le_bytes(bytes);
    if big_endian {
        value = match len {
            1 => value,
            2 => (value as u16).swap_bytes() as u32,
            4 => value.swap_bytes(),
            _ => unreachable!(),
        };
    }
    value
}

pub fn write_bytes(mem: &mut AddressSpace, addr: u32, value: u32, len: usize, big_endian: bool) {
    let value = if big_endian {
        match len {
            1 => value,
            2 => (value as u16).swap_bytes() as u32,
            4 => value.swap_bytes(),
            _ => unreachable!(),
        }
    } else {
        value
    };
    let bytes = value.to_le_bytes();
    for i in 0..len {
        mem.write(addr.wrapping_add(i as u32), bytes[i]);
    }
}

/// Raises `UNALIGNED` (as a usage fault) for aligned-but-misaligned
/// accesses.
pub fn unaligned_fault() -> FaultKind {
    FaultKind::UsageFault(UsageFaultReason::Unaligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(privileged: bool) -> AccessContext {
        AccessContext {
            privileged,
            execution_priority: 256,
        }
    }

    #[test]
    fn disabled_mpu_always_hits_with_default_attrs() {
        let mpu = MpuRegisters::default();
        let outcome = validate_address(&mpu, 0x2000_0000, Access::Normal, false, ctx(false));
        assert!(matches!(outcome, ValidateOutcome::Hit(_)));
    }

    #[test]
    fn enabled_mpu_with_no_regions_misses() {
        let mut mpu = MpuRegisters::default();
        mpu.ctrl.write(MpuCtrl::ENABLE::SET);
        let outcome = validate_address(&mpu, 0x2000_0000, Access::Normal, false, ctx(true));
        assert!(matches!(
            outcome,
            ValidateOutcome::Fault(FaultKind::MemManage(MemManageReason::DataAccessViolation {
                ..
            }))
        ));
    }

    #[test]
    fn privdefena_lets_privileged_code_through_on_miss() {
        let mut mpu = MpuRegisters::default();
        mpu.ctrl
            .write(MpuCtrl::ENABLE::SET + MpuCtrl::PRIVDEFENA::SET);
        let outcome = validate_address(&mpu, 0x2000_0000, Access::Normal, false, ctx(true));
        assert!(matches!(outcome, ValidateOutcome::Hit(_)));
        let outcome = validate_address(&mpu, 0x2000_0000, Access::Normal, false, ctx(false));
        assert!(matches!(outcome, ValidateOutcome::Fault(_)));
    }

    #[test]
    fn matching_region_grants_configured_permissions() {
        let mut mpu = MpuRegisters::default();
        mpu.ctrl.write(MpuCtrl::ENABLE::SET);
        // Region 0: base 0x2000_0000, size 2^15 = 32 KiB, AP=0b011 (full RW), enabled.
        mpu.rbar[0].write(MpuRbar::ADDR.val(0x2000_0000 >> 5));
        mpu.rasr[0].write(
            MpuRasr::ENABLE::SET + MpuRasr::SIZE.val(14) + MpuRasr::AP.val(0b011),
        );
        let outcome = validate_address(&mpu, 0x2000_0010, Access::Normal, true, ctx(false));
        assert!(matches!(outcome, ValidateOutcome::Hit(_)));
    }

    #[test]
    fn read_only_region_faults_on_write() {
        let mut mpu = MpuRegisters::default();
        mpu.ctrl.write(MpuCtrl::ENABLE::SET);
        mpu.rbar[0].write(MpuRbar::ADDR.val(0x2000_0000 >> 5));
        mpu.rasr[0].write(
            MpuRasr::ENABLE::SET + MpuRasr::SIZE.val(14) + MpuRasr::AP.val(0b110),
        );
        let outcome = validate_address(&mpu, 0x2000_0010, Access::Normal, true, ctx(true));
        assert!(matches!(outcome, ValidateOutcome::Fault(_)));
        let outcome = validate_address(&mpu, 0x2000_0010, Access::Normal, false, ctx(true));
        assert!(matches!(outcome, ValidateOutcome::Hit(_)));
    }

    #[test]
    fn subregion_disable_excludes_addresses() {
        let mut mpu = MpuRegisters::default();
        mpu.ctrl.write(MpuCtrl::ENABLE::SET);
        mpu.rbar[0].write(MpuRbar::ADDR.val(0x2000_0000 >> 5));
        // 256-byte region (SIZE=7), disable subregion 0 (first 32 bytes).
        mpu.rasr[0].write(
            MpuRasr::ENABLE::SET + MpuRasr::SIZE.val(7) + MpuRasr::AP.val(0b011) + MpuRasr::SRD.val(0b1),
        );
        let outcome = validate_address(&mpu, 0x2000_0000, Access::Normal, false, ctx(true));
        assert!(matches!(outcome, ValidateOutcome::Fault(_)));
        let outcome = validate_address(&mpu, 0x2000_0020, Access::Normal, false, ctx(true));
        assert!(matches!(outcome, ValidateOutcome::Hit(_)));
    }

    #[test]
    fn system_region_is_always_execute_never() {
        let mpu = MpuRegisters::default();
        let outcome = validate_address(
            &mpu,
            map::SYSTEM_START,
            Access::InstructionFetch,
            false,
            ctx(true),
        );
        assert!(matches!(outcome, ValidateOutcome::Fault(_)));
    }

    #[test]
    fn vec_table_access_always_hits() {
        let mut mpu = MpuRegisters::default();
        mpu.ctrl.write(MpuCtrl::ENABLE::SET);
        let outcome = validate_address(&mpu, 0x0000_0000, Access::VecTable, false, ctx(false));
        assert!(matches!(outcome, ValidateOutcome::Hit(_)));
    }
}
