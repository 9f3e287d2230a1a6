// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CONTROL register and the priority masking registers (PRIMASK, FAULTMASK,
//! BASEPRI).

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::register_bitfields;
use tock_registers::registers::InMemoryRegister;

register_bitfields![u32,
    pub ControlBits [
        SPSEL OFFSET(1) NUMBITS(1) [],
        NPRIV OFFSET(0) NUMBITS(1) [],
    ]
];

#[derive(Debug, Default)]
pub struct Control {
    raw: InMemoryRegister<u32, ControlBits::Register>,
}

impl Control {
    pub fn reset(&mut self) {
        self.raw.set(0);
    }

    pub fn spsel(&self) -> bool {
        self.raw.is_set(ControlBits::SPSEL)
    }

    pub fn set_spsel(&mut self, value: bool) {
        self.raw.modify(ControlBits::SPSEL.val(value as u32));
    }

    pub fn npriv(&self) -> bool {
        self.raw.is_set(ControlBits::NPRIV)
    }

    pub fn set_npriv(&mut self, value: bool) {
        self.raw.modify(ControlBits::NPRIV.val(value as u32));
    }

    pub fn privileged(&self) -> bool {
        !self.npriv()
    }
}

/// PRIMASK (1 bit), FAULTMASK (1 bit), BASEPRI (8-bit level, 0 == disabled).
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityMasks {
    pub primask: bool,
    pub faultmask: bool,
    pub basepri: u8,
}

impl PriorityMasks {
    pub fn reset(&mut self) {
        *self = PriorityMasks::default();
    }
}
