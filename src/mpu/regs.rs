// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! MPU register layout: MPU_TYPE, MPU_CTRL, MPU_RNR and eight parallel
//! MPU_RBAR/MPU_RASR pairs, the Cortex-M3/M4 region-descriptor shape (RBAR
//! paired with RASR, not the Armv8-M split RBAR/RLAR layout).

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::register_bitfields;
use tock_registers::registers::InMemoryRegister;

pub const DREGION: u32 = 8;

register_bitfields![u32,
    pub MpuType [
        IREGION OFFSET(16) NUMBITS(8) [],
        DREGION OFFSET(8) NUMBITS(8) [],
        SEPARATE OFFSET(0) NUMBITS(1) [],
    ],
    pub MpuCtrl [
        PRIVDEFENA OFFSET(2) NUMBITS(1) [],
        HFNMIENA OFFSET(1) NUMBITS(1) [],
        ENABLE OFFSET(0) NUMBITS(1) [],
    ],
    pub MpuRnr [
        REGION OFFSET(0) NUMBITS(8) [],
    ],
    pub MpuRbar [
        ADDR OFFSET(5) NUMBITS(27) [],
        VALID OFFSET(4) NUMBITS(1) [],
        REGION OFFSET(0) NUMBITS(4) [],
    ],
    pub MpuRasr [
        XN OFFSET(28) NUMBITS(1) [],
        AP OFFSET(24) NUMBITS(3) [],
        TEX OFFSET(19) NUMBITS(3) [],
        S OFFSET(18) NUMBITS(1) [],
        C OFFSET(17) NUMBITS(1) [],
        B OFFSET(16) NUMBITS(1) [],
        SRD OFFSET(8) NUMBITS(8) [],
        SIZE OFFSET(1) NUMBITS(5) [],
        ENABLE OFFSET(0) NUMBITS(1) [],
    ]
];

#[derive(Debug)]
pub struct MpuRegisters {
    pub mpu_type: InMemoryRegister<u32, MpuType::Register>,
    pub ctrl: InMemoryRegister<u32, MpuCtrl::Register>,
    pub rnr: InMemoryRegister<u32, MpuRnr::Register>,
    pub rbar: [InMemoryRegister<u32, MpuRbar::Register>; DREGION as usize],
    pub rasr: [InMemoryRegister<u32, MpuRasr::Register>; DREGION as usize],
}

impl Default for MpuRegisters {
    fn default() -> Self {
        let mpu_type = InMemoryRegister::new(0);
        mpu_type.write(MpuType::DREGION.val(DREGION));
        MpuRegisters {
            mpu_type,
            ctrl: InMemoryRegister::new(0),
            rnr: InMemoryRegister::new(0),
            rbar: core::array::from_fn(|_| InMemoryRegister::new(0)),
            rasr: core::array::from_fn(|_| InMemoryRegister::new(0)),
        }
    }
}

impl MpuRegisters {
    pub fn reset(&mut self) {
        self.mpu_type.set(0);
        self.mpu_type.write(MpuType::DREGION.val(DREGION));
        self.ctrl.set(0);
        self.rnr.set(0);
        for r in self.rbar.iter_mut() {
            r.set(0);
        }
        for r in self.rasr.iter_mut() {
            r.set(0);
        }
    }
}
