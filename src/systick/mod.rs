// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SysTick: CSR/RVR/CVR/CALIB with side-effectful writes, modeled as a
//! free-running counter decremented once per `Core::step` rather than by a
//! wall clock.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::register_bitfields;
use tock_registers::registers::InMemoryRegister;

register_bitfields![u32,
    pub ControlAndStatus [
        COUNTFLAG OFFSET(16) NUMBITS(1) [],
        CLKSOURCE OFFSET(2) NUMBITS(1) [],
        TICKINT OFFSET(1) NUMBITS(1) [],
        ENABLE OFFSET(0) NUMBITS(1) [],
    ],
    pub ReloadValue [
        RELOAD OFFSET(0) NUMBITS(24) [],
    ],
    pub CurrentValue [
        CURRENT OFFSET(0) NUMBITS(24) [],
    ],
    pub CalibrationValue [
        NOREF OFFSET(31) NUMBITS(1) [],
        SKEW OFFSET(30) NUMBITS(1) [],
        TENMS OFFSET(0) NUMBITS(24) [],
    ],
];

/// A plausible 10 ms calibration reload for a 16 MHz reference clock.
pub const CALIB_RESET: u32 = 0x0001_86A0;

#[derive(Debug)]
pub struct SysTickRegisters {
    pub csr: InMemoryRegister<u32, ControlAndStatus::Register>,
    pub rvr: InMemoryRegister<u32, ReloadValue::Register>,
    pub cvr: InMemoryRegister<u32, CurrentValue::Register>,
    pub calib: InMemoryRegister<u32, CalibrationValue::Register>,
}

impl Default for SysTickRegisters {
    fn default() -> Self {
        let calib = InMemoryRegister::new(0);
        calib.write(CalibrationValue::TENMS.val(CALIB_RESET));
        SysTickRegisters {
            csr: InMemoryRegister::new(0),
            rvr: InMemoryRegister::new(0),
            cvr: InMemoryRegister::new(0),
            calib,
        }
    }
}

impl SysTickRegisters {
    pub fn reset(&mut self) {
        let calib = self.calib.get();
        *self = SysTickRegisters::default();
        self.calib.set(calib);
    }

    /// A write to CVR resets the current value to 0 and clears COUNTFLAG,
    /// regardless of the written value (the real hardware's documented
    /// behavior, preserved here since we have no MMIO write trap to hook).
    pub fn write_cvr(&mut self, _value: u32) {
        self.cvr.set(0);
        self.csr.modify(ControlAndStatus::COUNTFLAG::CLEAR);
    }

    /// Decrements the counter by one tick, reloading from RVR and setting
    /// COUNTFLAG when it wraps past zero. Returns `true` if this tick
    /// reached zero and `TICKINT` is set, meaning SysTick should pend.
    /// Called once per retired instruction by the engine; real SysTick is
    /// clock-driven, but an instruction-stepped emulator has no wall clock
    /// to drive it from, so an instruction tick stands in for one.
    pub fn tick(&mut self) -> bool {
        if !self.csr.is_set(ControlAndStatus::ENABLE) {
            return false;
        }
        let current = self.cvr.read(CurrentValue::CURRENT);
        if current == 0 {
            let reload = self.rvr.read(ReloadValue::RELOAD);
            self.cvr.write(CurrentValue::CURRENT.val(reload));
            self.csr.modify(ControlAndStatus::COUNTFLAG::SET);
            self.csr.is_set(ControlAndStatus::TICKINT)
        } else {
            self.cvr.write(CurrentValue::CURRENT.val(current - 1));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_systick_never_ticks() {
        let mut st = SysTickRegisters::default();
        st.rvr.write(ReloadValue::RELOAD.val(3));
        assert!(!st.tick());
        assert_eq!(st.cvr.read(CurrentValue::CURRENT), 0);
    }

    #[test]
    fn counter_reloads_and_requests_exception_when_tickint_set() {
        let mut st = SysTickRegisters::default();
        st.rvr.write(ReloadValue::RELOAD.val(2));
        st.csr
            .write(ControlAndStatus::ENABLE::SET + ControlAndStatus::TICKINT::SET);
        st.cvr.write(CurrentValue::CURRENT.val(0));
        assert!(st.tick());
        assert_eq!(st.cvr.read(CurrentValue::CURRENT), 2);
        assert!(st.csr.is_set(ControlAndStatus::COUNTFLAG));
    }

    #[test]
    fn write_to_cvr_clears_current_and_countflag() {
        let mut st = SysTickRegisters::default();
        st.csr.modify(ControlAndStatus::COUNTFLAG::SET);
        st.write_cvr(0x1234);
        assert_eq!(st.cvr.get(), 0);
        assert!(!st.csr.is_set(ControlAndStatus::COUNTFLAG));
    }

    #[test]
    fn calibration_value_survives_reset() {
        let mut st = SysTickRegisters::default();
        st.reset();
        assert_eq!(st.calib.read(CalibrationValue::TENMS), CALIB_RESET);
    }
}
