// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end scenarios driving `Core` purely through its public API, one
//! instruction at a time.

use armv7m_emu::engine::Core;
use armv7m_emu::memory::MemoryConfig;
use armv7m_emu::registers::Mode;
use armv7m_emu::scb::Cfsr;
use armv7m_emu::{FaultKind, UsageFaultReason};
use tock_registers::interfaces::Readable;

fn image_with_vectors(sp: u32, pc: u32, code: &[u16]) -> Vec<u8> {
    let mut image = vec![0u8; 8];
    image[0..4].copy_from_slice(&sp.to_le_bytes());
    image[4..8].copy_from_slice(&pc.to_le_bytes());
    for hw in code {
        image.extend_from_slice(&hw.to_le_bytes());
    }
    image
}

#[test]
fn reset_loads_sp_and_pc_from_the_vector_table() {
    let image = image_with_vectors(0x2000_0400, 0x0800_0009, &[]);
    let core = Core::load(&image).unwrap();
    assert_eq!(core.registers().sp(), 0x2000_0400);
    assert_eq!(core.registers().pc(), 0x0800_0008);
    assert!(core.registers().psr.thumb());
}

#[test]
fn movs_sets_register_and_flags_and_advances_pc_by_two() {
    let flash_start = MemoryConfig::default().flash_start;
    let image = image_with_vectors(0x2000_0400, flash_start | 1, &[0x202A]); // MOVS R0, #0x2A
    let mut core = Core::load(&image).unwrap();
    let pc_before = core.registers().pc();

    let outcome = core.step().unwrap();

    assert_eq!(outcome.width, 2);
    assert_eq!(core.registers().reg(0), 0x2A);
    let flags = core.registers().flags();
    assert!(!flags.n);
    assert!(!flags.z);
    assert_eq!(core.registers().pc(), pc_before + 2);
}

#[test]
fn adds_with_immediate_sets_carry_without_overflow() {
    let flash_start = MemoryConfig::default().flash_start;
    let code = [
        0x2002, // MOVS R0, #2
        0x4240, // NEGS R0, R0        -> R0 = 0xFFFFFFFE
        0x1D41, // ADDS R1, R0, #5    -> R1 = 3, C=1
    ];
    let image = image_with_vectors(0x2000_0400, flash_start | 1, &code);
    let mut core = Core::load(&image).unwrap();

    core.step().unwrap();
    assert_eq!(core.registers().reg(0), 0xFFFF_FFFE);
    core.step().unwrap();
    core.step().unwrap();

    assert_eq!(core.registers().reg(1), 3);
    let flags = core.registers().flags();
    assert!(!flags.n);
    assert!(!flags.z);
    assert!(flags.c);
    assert!(!flags.v);
}

#[test]
fn misaligned_word_load_raises_usage_fault_into_handler_mode() {
    let flash_start = MemoryConfig::default().flash_start;
    let code = [
        0x2101, // MOVS R1, #1
        0x680A, // LDR R2, [R1]   -- R1 == 1, misaligned for a word access
    ];
    let image = image_with_vectors(0x2000_0400, flash_start | 1, &code);
    let mut core = Core::load(&image).unwrap();

    core.step().unwrap();
    let pc_before_fault = core.registers().pc();
    let outcome = core.step().unwrap();

    assert!(outcome.exception_taken.is_some());
    assert_eq!(core.registers().mode(), Mode::Handler);
    assert_eq!(core.registers().lr(), 0xFFFF_FFF9);

    let fault = core.last_fault().unwrap();
    assert_eq!(fault.fault, FaultKind::UsageFault(UsageFaultReason::Unaligned));
    assert!(core.scb().cfsr.is_set(Cfsr::UNALIGNED));

    // The synchronous fault's return address is the faulting instruction
    // itself, stacked as the frame's saved PC.
    let frame_sp = core.registers().sp();
    let saved_pc = {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = core.memory().read(frame_sp + 0x18 + i as u32);
        }
        u32::from_le_bytes(bytes)
    };
    assert_eq!(saved_pc, pc_before_fault);
}

#[test]
fn push_then_pop_interworks_back_to_a_thumb_return_address() {
    let flash_start = MemoryConfig::default().flash_start;
    let code = [
        0x2411, // MOVS R4, #0x11     (arbitrary pushed value)
        0xA000, // ADR  R0, [PC, #0]  -> some word-aligned address
        0x3001, // ADDS R0, R0, #1    -> set the Thumb bit
        0x4686, // MOV  LR, R0
        0xB510, // PUSH {R4, LR}
        0xBD10, // POP  {R4, PC}
    ];
    let image = image_with_vectors(0x2000_0400, flash_start | 1, &code);
    let mut core = Core::load(&image).unwrap();

    let sp_before_push = core.registers().sp();
    core.step().unwrap(); // MOVS R4, #0x11
    core.step().unwrap(); // ADR R0, [PC, #0]
    core.step().unwrap(); // ADDS R0, R0, #1
    let target = core.registers().reg(0);
    assert_eq!(target & 1, 1, "ADDS #1 must set the Thumb bit");

    core.step().unwrap(); // MOV LR, R0
    assert_eq!(core.registers().lr(), target);

    core.step().unwrap(); // PUSH {R4, LR}
    assert_eq!(core.registers().sp(), sp_before_push - 8);

    core.step().unwrap(); // POP {R4, PC}
    assert_eq!(core.registers().sp(), sp_before_push);
    assert_eq!(core.registers().pc(), target & !1);
    assert!(core.registers().psr.thumb());
}

#[test]
fn it_block_predicates_the_middle_instruction_and_clears_at_the_end() {
    let flash_start = MemoryConfig::default().flash_start;
    let code = [
        0x2000, // MOVS R0, #0          -> Z=1
        0xBF0A, // ITET EQ              (mask 0b1010: EQ, NE, EQ)
        0x2001, // MOVEQ R0, #1
        0x2102, // MOVNE R1, #2         -- predicated false; must not execute
        0x2003, // MOVEQ R0, #3
    ];
    let image = image_with_vectors(0x2000_0400, flash_start | 1, &code);
    let mut core = Core::load(&image).unwrap();

    for _ in 0..code.len() {
        core.step().unwrap();
    }

    assert_eq!(core.registers().reg(0), 3);
    assert_eq!(core.registers().reg(1), 0, "MOVNE under EQ must be skipped");
    assert!(!core.registers().psr.it_state().in_it_block());
}
