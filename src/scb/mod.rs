// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The System Control Block: CPUID, ICSR, VTOR, AIRCR, SCR, CCR, the
//! system handler priority/control registers, and the fault status
//! registers, held as software-backed `InMemoryRegister`s rather than
//! memory-mapped hardware.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::register_bitfields;
use tock_registers::registers::InMemoryRegister;

register_bitfields![u32,
    pub Icsr [
        NMIPENDSET OFFSET(31) NUMBITS(1) [],
        PENDSVSET OFFSET(28) NUMBITS(1) [],
        PENDSVCLR OFFSET(27) NUMBITS(1) [],
        PENDSTSET OFFSET(26) NUMBITS(1) [],
        PENDSTCLR OFFSET(25) NUMBITS(1) [],
        ISRPREEMPT OFFSET(23) NUMBITS(1) [],
        ISRPENDING OFFSET(22) NUMBITS(1) [],
        VECTPENDING OFFSET(12) NUMBITS(9) [],
        RETTOBASE OFFSET(11) NUMBITS(1) [],
        VECTACTIVE OFFSET(0) NUMBITS(9) [],
    ],
    pub Vtor [
        TBLOFF OFFSET(7) NUMBITS(25) [],
    ],
    pub Aircr [
        VECTKEY OFFSET(16) NUMBITS(16) [],
        ENDIANNESS OFFSET(15) NUMBITS(1) [],
        PRIGROUP OFFSET(8) NUMBITS(3) [],
        SYSRESETREQ OFFSET(2) NUMBITS(1) [],
        VECTCLRACTIVE OFFSET(1) NUMBITS(1) [],
        VECTRESET OFFSET(0) NUMBITS(1) [],
    ],
    pub Scr [
        SEVONPEND OFFSET(4) NUMBITS(1) [],
        SLEEPDEEP OFFSET(2) NUMBITS(1) [],
        SLEEPONEXIT OFFSET(1) NUMBITS(1) [],
    ],
    pub Ccr [
        BP OFFSET(18) NUMBITS(1) [],
        IC OFFSET(17) NUMBITS(1) [],
        DC OFFSET(16) NUMBITS(1) [],
        STKALIGN OFFSET(9) NUMBITS(1) [],
        BFHFNMIGN OFFSET(8) NUMBITS(1) [],
        DIV_0_TRP OFFSET(4) NUMBITS(1) [],
        UNALIGN_TRP OFFSET(3) NUMBITS(1) [],
        USERSETMPEND OFFSET(1) NUMBITS(1) [],
        NONBASETHRDENA OFFSET(0) NUMBITS(1) [],
    ],
    pub Shcsr [
        USGFAULTENA OFFSET(18) NUMBITS(1) [],
        BUSFAULTENA OFFSET(17) NUMBITS(1) [],
        MEMFAULTENA OFFSET(16) NUMBITS(1) [],
        SVCALLPENDED OFFSET(15) NUMBITS(1) [],
        BUSFAULTPENDED OFFSET(14) NUMBITS(1) [],
        MEMFAULTPENDED OFFSET(13) NUMBITS(1) [],
        USGFAULTPENDED OFFSET(12) NUMBITS(1) [],
        SYSTICKACT OFFSET(11) NUMBITS(1) [],
        PENDSVACT OFFSET(10) NUMBITS(1) [],
        MONITORACT OFFSET(8) NUMBITS(1) [],
        SVCALLACT OFFSET(7) NUMBITS(1) [],
        USGFAULTACT OFFSET(3) NUMBITS(1) [],
        BUSFAULTACT OFFSET(1) NUMBITS(1) [],
        MEMFAULTACT OFFSET(0) NUMBITS(1) [],
    ],
    pub Cfsr [
        DIVBYZERO OFFSET(25) NUMBITS(1) [],
        UNALIGNED OFFSET(24) NUMBITS(1) [],
        NOCP OFFSET(19) NUMBITS(1) [],
        INVPC OFFSET(18) NUMBITS(1) [],
        INVSTATE OFFSET(17) NUMBITS(1) [],
        UNDEFINSTR OFFSET(16) NUMBITS(1) [],
        BFARVALID OFFSET(15) NUMBITS(1) [],
        LSPERR OFFSET(13) NUMBITS(1) [],
        STKERR OFFSET(12) NUMBITS(1) [],
        UNSTKERR OFFSET(11) NUMBITS(1) [],
        IMPRECISERR OFFSET(10) NUMBITS(1) [],
        PRECISERR OFFSET(9) NUMBITS(1) [],
        IBUSERR OFFSET(8) NUMBITS(1) [],
        MMARVALID OFFSET(7) NUMBITS(1) [],
        MLSPERR OFFSET(5) NUMBITS(1) [],
        MSTKERR OFFSET(4) NUMBITS(1) [],
        MUNSTKERR OFFSET(3) NUMBITS(1) [],
        DACCVIOL OFFSET(1) NUMBITS(1) [],
        IACCVIOL OFFSET(0) NUMBITS(1) [],
    ],
    pub Hfsr [
        DEBUGEVT OFFSET(31) NUMBITS(1) [],
        FORCED OFFSET(30) NUMBITS(1) [],
        VECTTBL OFFSET(1) NUMBITS(1) [],
    ],
    pub Cpacr [
        CP11 OFFSET(22) NUMBITS(2) [],
        CP10 OFFSET(20) NUMBITS(2) [],
    ],
    pub Ictr [
        INTLINESNUM OFFSET(0) NUMBITS(4) [],
    ],
];

/// CPUID reset value for a Cortex-M3/M4-class implementation: ARM, variant
/// 0xF, partno 0xC23 (Cortex-M4), rev 1.
pub const CPUID_RESET: u32 = 0x412F_C231;
/// ICTR reset value for 8 NVIC register banks (256 external interrupts).
pub const ICTR_RESET: u32 = 0x0000_0111;

/// The System Control Block's registers and their architectural reset values.
#[derive(Debug)]
pub struct ScbRegisters {
    pub cpuid: InMemoryRegister<u32>,
    pub icsr: InMemoryRegister<u32, Icsr::Register>,
    pub vtor: InMemoryRegister<u32, Vtor::Register>,
    pub aircr: InMemoryRegister<u32, Aircr::Register>,
    pub scr: InMemoryRegister<u32, Scr::Register>,
    pub ccr: InMemoryRegister<u32, Ccr::Register>,
    /// SHPR1-3 as three 32-bit registers, each packing four 8-bit priorities.
    pub shpr: [InMemoryRegister<u32>; 3],
    pub shcsr: InMemoryRegister<u32, Shcsr::Register>,
    pub cfsr: InMemoryRegister<u32, Cfsr::Register>,
    pub hfsr: InMemoryRegister<u32, Hfsr::Register>,
    pub afsr: InMemoryRegister<u32>,
    pub mmfar: InMemoryRegister<u32>,
    pub bfar: InMemoryRegister<u32>,
    pub cpacr: InMemoryRegister<u32, Cpacr::Register>,
    pub ictr: InMemoryRegister<u32, Ictr::Register>,
    pub actlr: InMemoryRegister<u32>,
}

impl Default for ScbRegisters {
    fn default() -> Self {
        let cpuid = InMemoryRegister::new(CPUID_RESET);
        let ictr = InMemoryRegister::new(0);
        ictr.write(Ictr::INTLINESNUM.val(ICTR_RESET));
        ScbRegisters {
            cpuid,
            icsr: InMemoryRegister::new(0),
            vtor: InMemoryRegister::new(0),
            aircr: InMemoryRegister::new(0),
            scr: InMemoryRegister::new(0),
            ccr: InMemoryRegister::new(0),
            shpr: core::array::from_fn(|_| InMemoryRegister::new(0)),
            shcsr: InMemoryRegister::new(0),
            cfsr: InMemoryRegister::new(0),
            hfsr: InMemoryRegister::new(0),
            afsr: InMemoryRegister::new(0),
            mmfar: InMemoryRegister::new(0),
            bfar: InMemoryRegister::new(0),
            cpacr: InMemoryRegister::new(0),
            ictr,
            actlr: InMemoryRegister::new(0),
        }
    }
}

/// Handler numbers for the 16 system exceptions (used to index into
/// `SHPR`/`SHCSR`). Exception number itself, not an array index.
pub mod system_exception {
    pub const NMI: u32 = 2;
    pub const HARD_FAULT: u32 = 3;
    pub const MEM_MANAGE: u32 = 4;
    pub const BUS_FAULT: u32 = 5;
    pub const USAGE_FAULT: u32 = 6;
    pub const SVCALL: u32 = 11;
    pub const PENDSV: u32 = 14;
    pub const SYSTICK: u32 = 15;
}

impl ScbRegisters {
    pub fn reset(&mut self) {
        *self = ScbRegisters::default();
    }

    /// Byte lane within `shpr` for configurable-priority system exceptions
    /// 4..=15 (exceptions 0..3 have no configurable priority).
    fn shpr_lane(exception_number: u32) -> Option<(usize, u32)> {
        if !(4..=15).contains(&exception_number) {
            return None;
        }
        let index = exception_number - 4;
        Some(((index / 4) as usize, (index % 4) * 8))
    }

    /// Reads the 8-bit configured priority for a system exception (4..=15),
    /// or `None` for exceptions with a fixed, unconfigurable priority.
    pub fn system_priority(&self, exception_number: u32) -> Option<u8> {
        let (reg, shift) = Self::shpr_lane(exception_number)?;
        Some(((self.shpr[reg].get() >> shift) & 0xFF) as u8)
    }

    pub fn set_system_priority(&mut self, exception_number: u32, priority: u8) {
        if let Some((reg, shift)) = Self::shpr_lane(exception_number) {
            let mask = 0xFFu32 << shift;
            let value = self.shpr[reg].get();
            self.shpr[reg].set((value & !mask) | ((priority as u32) << shift));
        }
    }

    pub fn prigroup(&self) -> u8 {
        self.aircr.read(Aircr::PRIGROUP) as u8
    }

    pub fn endianness_big(&self) -> bool {
        self.aircr.is_set(Aircr::ENDIANNESS)
    }

    pub fn unalign_trp(&self) -> bool {
        self.ccr.is_set(Ccr::UNALIGN_TRP)
    }

    pub fn div_0_trp(&self) -> bool {
        self.ccr.is_set(Ccr::DIV_0_TRP)
    }

    pub fn stkalign(&self) -> bool {
        self.ccr.is_set(Ccr::STKALIGN)
    }
}
