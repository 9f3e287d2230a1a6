// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The program-status word and its three overlapping views (APSR/IPSR/EPSR),
//! plus IT-state.
//!
//! Modeled the way MMIO registers are modeled elsewhere in this crate: a
//! single `u32` (`InMemoryRegister`, software-backed rather than
//! memory-mapped) plus typed field accessors, instead of a bitfield struct
//! the layout of which Rust does not guarantee.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::register_bitfields;
use tock_registers::registers::InMemoryRegister;

register_bitfields![u32,
    pub Xpsr [
        N OFFSET(31) NUMBITS(1) [],
        Z OFFSET(30) NUMBITS(1) [],
        C OFFSET(29) NUMBITS(1) [],
        V OFFSET(28) NUMBITS(1) [],
        Q OFFSET(27) NUMBITS(1) [],
        ICI_IT_HI OFFSET(25) NUMBITS(2) [],
        T OFFSET(24) NUMBITS(1) [],
        ICI_IT_LO OFFSET(10) NUMBITS(6) [],
        EXCEPTION OFFSET(0) NUMBITS(9) [],
    ]
];

/// The four architectural flags plus the sticky saturation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub n: bool,
    pub z: bool,
    pub c: bool,
    pub v: bool,
    pub q: bool,
}

/// An 8-bit IT-state pattern: condition in the high nibble, pending mask in
/// the low nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItState(pub u8);

impl ItState {
    pub fn new(condition: u8, mask: u8) -> Self {
        ItState(((condition & 0xF) << 4) | (mask & 0xF))
    }

    pub fn condition(self) -> u8 {
        (self.0 >> 4) & 0xF
    }

    pub fn mask(self) -> u8 {
        self.0 & 0xF
    }

    /// Whether the processor is currently inside an IT block.
    pub fn in_it_block(self) -> bool {
        self.mask() != 0
    }

    /// Whether the *current* instruction is the last inside its IT block.
    pub fn last_in_it_block(self) -> bool {
        self.mask() == 0b1000
    }

    /// `ITAdvance()`: shifts the mask left within the low 5 bits; clears to
    /// zero once the low 3 bits of the mask are exhausted.
    pub fn advance(self) -> Self {
        if self.0 & 0b111 == 0 {
            ItState(0)
        } else {
            let shifted = (self.0 & 0b1_1111) << 1;
            ItState((self.0 & 0b1110_0000) | (shifted & 0b1_1111))
        }
    }
}

/// The 32-bit program status word, viewed as APSR/IPSR/EPSR.
#[derive(Debug)]
pub struct ProgramStatus {
    raw: InMemoryRegister<u32, Xpsr::Register>,
}

impl Default for ProgramStatus {
    fn default() -> Self {
        ProgramStatus {
            raw: InMemoryRegister::new(0),
        }
    }
}

impl ProgramStatus {
    pub fn reset(&mut self, thumb_bit: bool) {
        self.raw.set(0);
        self.raw.write(Xpsr::T.val(thumb_bit as u32));
    }

    pub fn flags(&self) -> Flags {
        Flags {
            n: self.raw.is_set(Xpsr::N),
            z: self.raw.is_set(Xpsr::Z),
            c: self.raw.is_set(Xpsr::C),
            v: self.raw.is_set(Xpsr::V),
            q: self.raw.is_set(Xpsr::Q),
        }
    }

    pub fn set_flags(&mut self, flags: Flags) {
        self.raw.modify(
            Xpsr::N.val(flags.n as u32)
                + Xpsr::Z.val(flags.z as u32)
                + Xpsr::C.val(flags.c as u32)
                + Xpsr::V.val(flags.v as u32)
                + Xpsr::Q.val(flags.q as u32),
        );
    }

    pub fn thumb(&self) -> bool {
        self.raw.is_set(Xpsr::T)
    }

    pub fn set_thumb(&mut self, thumb: bool) {
        self.raw.modify(Xpsr::T.val(thumb as u32));
    }

    pub fn exception_number(&self) -> u16 {
        self.raw.read(Xpsr::EXCEPTION) as u16
    }

    pub fn set_exception_number(&mut self, number: u16) {
        self.raw.modify(Xpsr::EXCEPTION.val(number as u32));
    }

    /// `lo` holds IT[7:2] (EPSR bits 15:10), `hi` holds IT[1:0] (EPSR bits
    /// 26:25) -- the ARMv7-M ARM splits the 8-bit IT byte across these two
    /// non-adjacent fields.
    pub fn it_state(&self) -> ItState {
        let lo = self.raw.read(Xpsr::ICI_IT_LO) as u8;
        let hi = self.raw.read(Xpsr::ICI_IT_HI) as u8;
        ItState((lo << 2) | hi)
    }

    pub fn set_it_state(&mut self, it: ItState) {
        self.raw.modify(
            Xpsr::ICI_IT_LO.val(((it.0 >> 2) & 0b11_1111) as u32)
                + Xpsr::ICI_IT_HI.val((it.0 & 0b11) as u32),
        );
    }

    /// Raw 32-bit value as would be pushed to an exception stack frame,
    /// without the align bit (the caller inserts that at bit 9 itself).
    pub fn as_u32(&self) -> u32 {
        self.raw.get()
    }

    pub fn set_u32(&mut self, value: u32) {
        self.raw.set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_state_advance_clears_at_low_nibble_exhausted() {
        // 0b1000 (mask top bit only, "last in IT block") -> next is 0
        let it = ItState(0b1110_1000);
        assert!(it.last_in_it_block());
        assert_eq!(it.advance(), ItState(0));
    }

    #[test]
    fn it_state_advance_shifts_mask() {
        // ITET EQ -> mask starts as 0b0110 ("E","T" pending)
        let it = ItState::new(0b0000, 0b0110);
        assert!(it.in_it_block());
        let next = it.advance();
        assert_eq!(next.mask(), 0b1100);
        let last = next.advance();
        assert!(last.last_in_it_block());
        assert_eq!(last.advance(), ItState(0));
    }

    #[test]
    fn in_it_block_iff_mask_nonzero() {
        assert!(!ItState::new(0b1110, 0).in_it_block());
        assert!(ItState::new(0b1110, 0b1000).in_it_block());
    }

    #[test]
    fn program_status_round_trips_flags_and_it() {
        let mut psr = ProgramStatus::default();
        psr.reset(true);
        assert!(psr.thumb());
        psr.set_flags(Flags {
            n: true,
            z: false,
            c: true,
            v: false,
            q: true,
        });
        let f = psr.flags();
        assert!(f.n && f.c && f.q && !f.z && !f.v);

        psr.set_it_state(ItState::new(0b0000, 0b1000));
        assert!(psr.it_state().last_in_it_block());

        psr.set_exception_number(11);
        assert_eq!(psr.exception_number(), 11);
    }
}
