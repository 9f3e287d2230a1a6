// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Instruction semantics: given a decoded `Instruction` and a handle onto the
//! processor state, perform the operation, set flags where the architecture
//! requires it, and report any fault that must be routed back through
//! exception entry.

use crate::bits::{add_with_carry, shift_with_carry, sub_with_carry, thumb_expand_imm_with_carry, ShiftKind};
use crate::decode::{
    condition_passed, AddSubOperand, DpOp, DpRegister16Op, Instruction, MemOperand, MiscUnaryOp,
    MovCmpAddSubOp, PlainImmOp, Reg, SpecReg, SpecialDataKind, Width,
};
use crate::error::{FaultKind, UsageFaultReason};
use crate::memory::AddressSpace;
use crate::mpu::{self, Access, AccessContext, MpuRegisters, ValidateOutcome};
use crate::registers::file::RegisterFile;
use crate::registers::psr::ItState;

/// What an executed instruction asks the engine to do next, beyond the
/// ordinary register/memory side effects already applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecEffect {
    None,
    /// The instruction wrote a new PC (branch or interworking return); the
    /// engine must not apply its own sequential-PC-advance logic.
    Branched,
    Svc(u8),
    ExceptionReturn(u32),
}

/// Everything `execute` needs to read or mutate besides the `Instruction`
/// itself. Borrowed for the duration of a single instruction.
pub struct ExecContext<'a> {
    pub regs: &'a mut RegisterFile,
    pub mem: &'a mut AddressSpace,
    pub mpu: &'a MpuRegisters,
    pub big_endian: bool,
    pub privileged: bool,
    pub execution_priority: i16,
    pub unalign_trp: bool,
    pub div_0_trp: bool,
}

impl<'a> ExecContext<'a> {
    fn width_len(width: Width) -> usize {
        match width {
            Width::Byte => 1,
            Width::Halfword => 2,
            Width::Word => 4,
        }
    }

    fn aligned(addr: u32, width: Width) -> bool {
        match width {
            Width::Byte => true,
            Width::Halfword => addr & 0b1 == 0,
            Width::Word => addr & 0b11 == 0,
        }
    }

    fn load(&mut self, addr: u32, width: Width, sign_extend: bool) -> Result<u32, FaultKind> {
        if !Self::aligned(addr, width) && (width != Width::Word || self.unalign_trp) {
            return Err(mpu::unaligned_fault());
        }
        let ctx = AccessContext {
            privileged: self.privileged,
            execution_priority: self.execution_priority,
        };
        match mpu::validate_address(self.mpu, addr, Access::Normal, false, ctx) {
            ValidateOutcome::Hit(_) => {
                let len = Self::width_len(width);
                let raw = mpu::read_bytes(self.mem, addr, len, self.big_endian);
                Ok(if sign_extend {
                    let bits = (len * 8) as u32;
                    let shift = 32 - bits;
                    (((raw << shift) as i32) >> shift) as u32
                } else {
                    raw
                })
            }
            ValidateOutcome::Fault(f) => Err(f),
            ValidateOutcome::ReservedAp => Err(FaultKind::MemManage(
                crate::error::MemManageReason::DataAccessViolation { fault_address: addr },
            )),
        }
    }

    fn store(&mut self, addr: u32, width: Width, value: u32) -> Result<(), FaultKind> {
        if !Self::aligned(addr, width) && (width != Width::Word || self.unalign_trp) {
            return Err(mpu::unaligned_fault());
        }
        let ctx = AccessContext {
            privileged: self.privileged,
            execution_priority: self.execution_priority,
        };
        match mpu::validate_address(self.mpu, addr, Access::Normal, true, ctx) {
            ValidateOutcome::Hit(_) => {
                mpu::write_bytes(self.mem, addr, value, Self::width_len(width), self.big_endian);
                Ok(())
            }
            ValidateOutcome::Fault(f) => Err(f),
            ValidateOutcome::ReservedAp => Err(FaultKind::MemManage(
                crate::error::MemManageReason::DataAccessViolation { fault_address: addr },
            )),
        }
    }

    fn resolve_address(&self, operand: MemOperand, align_pc: u32) -> (u32, Option<(Reg, u32)>) {
        match operand {
            MemOperand::Immediate {
                rn,
                imm,
                pre_indexed,
                writeback,
            } => {
                let base = self.regs.reg(rn);
                let offset_addr = base.wrapping_add(imm as u32);
                let addr = if pre_indexed { offset_addr } else { base };
                let wb = if writeback { Some((rn, offset_addr)) } else { None };
                (addr, wb)
            }
            MemOperand::Register { rn, rm, shift } => {
                let base = self.regs.reg(rn);
                let offset = self.regs.reg(rm) << shift;
                (base.wrapping_add(offset), None)
            }
            MemOperand::Literal { imm } => (align_pc.wrapping_add(imm as u32), None),
            MemOperand::SpRelative { imm } => (self.regs.sp().wrapping_add(imm as u32), None),
        }
    }
}

fn set_nz(regs: &mut RegisterFile, result: u32) {
    let mut flags = regs.flags();
    flags.n = (result as i32) < 0;
    flags.z = result == 0;
    regs.set_flags(flags);
}

fn set_nzcv(regs: &mut RegisterFile, result: u32, carry: bool, overflow: bool) {
    let mut flags = regs.flags();
    flags.n = (result as i32) < 0;
    flags.z = result == 0;
    flags.c = carry;
    flags.v = overflow;
    regs.set_flags(flags);
}

fn set_nzc(regs: &mut RegisterFile, result: u32, carry: bool) {
    let mut flags = regs.flags();
    flags.n = (result as i32) < 0;
    flags.z = result == 0;
    flags.c = carry;
    regs.set_flags(flags);
}

/// Executes one decoded instruction. `in_it_block` and `unconditional` tell
/// the handler whether NZCV updates from a 16-bit flag-setting form are
/// suppressed by an enclosing IT block (per ARMv7-M: they still execute,
/// but never update flags in that case unless outside one).
pub fn execute(inst: Instruction, ctx: &mut ExecContext) -> Result<ExecEffect, FaultKind> {
    let it = ctx.regs.it_state();

    match inst {
        Instruction::ShiftImmediate { rd, rm, op, set_flags } => {
            let carry_in = ctx.regs.flags().c;
            let outcome = shift_with_carry(ctx.regs.reg(rm), op.kind, op.amount, carry_in);
            ctx.regs.set_reg(rd, outcome.result);
            if !it.in_it_block() && set_flags {
                set_nzc(ctx.regs, outcome.result, outcome.carry_out);
            }
            Ok(ExecEffect::None)
        }

        Instruction::AddSub3 {
            rd,
            rn,
            operand,
            subtract,
            set_flags,
        } => {
            let lhs = ctx.regs.reg(rn);
            let rhs = match operand {
                AddSubOperand::Register(rm) => ctx.regs.reg(rm),
                AddSubOperand::Immediate3(imm) => imm,
            };
            let result = if subtract {
                sub_with_carry(lhs, rhs)
            } else {
                add_with_carry(lhs, rhs, false)
            };
            ctx.regs.set_reg(rd, result.result);
            if !it.in_it_block() && set_flags {
                set_nzcv(ctx.regs, result.result, result.carry_out, result.overflow);
            }
            Ok(ExecEffect::None)
        }

        Instruction::MovCmpAddSubImm8 {
            rdn,
            imm,
            op,
            set_flags,
        } => {
            match op {
                MovCmpAddSubOp::Mov => {
                    ctx.regs.set_reg(rdn, imm);
                    if !it.in_it_block() && set_flags {
                        set_nz(ctx.regs, imm);
                    }
                }
                MovCmpAddSubOp::Cmp => {
                    let lhs = ctx.regs.reg(rdn);
                    let result = sub_with_carry(lhs, imm);
                    set_nzcv(ctx.regs, result.result, result.carry_out, result.overflow);
                }
                MovCmpAddSubOp::Add => {
                    let lhs = ctx.regs.reg(rdn);
                    let result = add_with_carry(lhs, imm, false);
                    ctx.regs.set_reg(rdn, result.result);
                    if !it.in_it_block() && set_flags {
                        set_nzcv(ctx.regs, result.result, result.carry_out, result.overflow);
                    }
                }
                MovCmpAddSubOp::Sub => {
                    let lhs = ctx.regs.reg(rdn);
                    let result = sub_with_carry(lhs, imm);
                    ctx.regs.set_reg(rdn, result.result);
                    if !it.in_it_block() && set_flags {
                        set_nzcv(ctx.regs, result.result, result.carry_out, result.overflow);
                    }
                }
            }
            Ok(ExecEffect::None)
        }

        Instruction::DpRegister16 { rdn, rm, op } => {
            let a = ctx.regs.reg(rdn);
            let b = ctx.regs.reg(rm);
            let carry_in = ctx.regs.flags().c;
            match op {
                DpRegister16Op::And => {
                    let r = a & b;
                    ctx.regs.set_reg(rdn, r);
                    if !it.in_it_block() {
                        set_nz(ctx.regs, r);
                    }
                }
                DpRegister16Op::Eor => {
                    let r = a ^ b;
                    ctx.regs.set_reg(rdn, r);
                    if !it.in_it_block() {
                        set_nz(ctx.regs, r);
                    }
                }
                DpRegister16Op::Lsl => {
                    let out = shift_with_carry(a, ShiftKind::Lsl, b & 0xFF, carry_in);
                    ctx.regs.set_reg(rdn, out.result);
                    if !it.in_it_block() {
                        set_nzc(ctx.regs, out.result, out.carry_out);
                    }
                }
                DpRegister16Op::Lsr => {
                    let out = shift_with_carry(a, ShiftKind::Lsr, b & 0xFF, carry_in);
                    ctx.regs.set_reg(rdn, out.result);
                    if !it.in_it_block() {
                        set_nzc(ctx.regs, out.result, out.carry_out);
                    }
                }
                DpRegister16Op::Asr => {
                    let out = shift_with_carry(a, ShiftKind::Asr, b & 0xFF, carry_in);
                    ctx.regs.set_reg(rdn, out.result);
                    if !it.in_it_block() {
                        set_nzc(ctx.regs, out.result, out.carry_out);
                    }
                }
                DpRegister16Op::Ror => {
                    let out = shift_with_carry(a, ShiftKind::Ror, b & 0xFF, carry_in);
                    ctx.regs.set_reg(rdn, out.result);
                    if !it.in_it_block() {
                        set_nzc(ctx.regs, out.result, out.carry_out);
                    }
                }
                DpRegister16Op::Adc => {
                    let out = add_with_carry(a, b, carry_in);
                    ctx.regs.set_reg(rdn, out.result);
                    if !it.in_it_block() {
                        set_nzcv(ctx.regs, out.result, out.carry_out, out.overflow);
                    }
                }
                DpRegister16Op::Sbc => {
                    let out = add_with_carry(a, !b, carry_in);
                    ctx.regs.set_reg(rdn, out.result);
                    if !it.in_it_block() {
                        set_nzcv(ctx.regs, out.result, out.carry_out, out.overflow);
                    }
                }
                DpRegister16Op::Tst => {
                    let r = a & b;
                    set_nz(ctx.regs, r);
                }
                DpRegister16Op::Rsb => {
                    // RSB Rd, Rn, #0: Rd = 0 - Rn, i.e. NOT(Rn) + 1.
                    let out = add_with_carry(!a, 0, true);
                    ctx.regs.set_reg(rdn, out.result);
                    if !it.in_it_block() {
                        set_nzcv(ctx.regs, out.result, out.carry_out, out.overflow);
                    }
                }
                DpRegister16Op::Cmp => {
                    let out = sub_with_carry(a, b);
                    set_nzcv(ctx.regs, out.result, out.carry_out, out.overflow);
                }
                DpRegister16Op::Cmn => {
                    let out = add_with_carry(a, b, false);
                    set_nzcv(ctx.regs, out.result, out.carry_out, out.overflow);
                }
                DpRegister16Op::Orr => {
                    let r = a | b;
                    ctx.regs.set_reg(rdn, r);
                    if !it.in_it_block() {
                        set_nz(ctx.regs, r);
                    }
                }
                DpRegister16Op::Mul => {
                    let r = a.wrapping_mul(b);
                    ctx.regs.set_reg(rdn, r);
                    if !it.in_it_block() {
                        set_nz(ctx.regs, r);
                    }
                }
                DpRegister16Op::Bic => {
                    let r = a & !b;
                    ctx.regs.set_reg(rdn, r);
                    if !it.in_it_block() {
                        set_nz(ctx.regs, r);
                    }
                }
                DpRegister16Op::Mvn => {
                    let r = !b;
                    ctx.regs.set_reg(rdn, r);
                    if !it.in_it_block() {
                        set_nz(ctx.regs, r);
                    }
                }
            }
            Ok(ExecEffect::None)
        }

        Instruction::SpecialDataOp { rd, rm, op } => {
            let rhs = ctx.regs.reg(rm);
            match op {
                SpecialDataKind::Add => {
                    let lhs = ctx.regs.reg(rd);
                    let result = lhs.wrapping_add(rhs);
                    if rd == 15 {
                        ctx.regs.branch_write_pc(result & !1);
                        return Ok(ExecEffect::Branched);
                    }
                    ctx.regs.set_reg(rd, result);
                }
                SpecialDataKind::Cmp => {
                    let lhs = ctx.regs.reg(rd);
                    let out = sub_with_carry(lhs, rhs);
                    set_nzcv(ctx.regs, out.result, out.carry_out, out.overflow);
                }
                SpecialDataKind::Mov => {
                    if rd == 15 {
                        ctx.regs.branch_write_pc(rhs & !1);
                        return Ok(ExecEffect::Branched);
                    }
                    ctx.regs.set_reg(rd, rhs);
                }
            }
            Ok(ExecEffect::None)
        }

        Instruction::BranchExchange { rm, link } => {
            let target = ctx.regs.reg(rm);
            if link {
                let return_address = ctx.regs.pc() | 1;
                ctx.regs.set_lr(return_address);
            }
            match ctx.regs.bx_write_pc(target) {
                crate::registers::file::PcWrite::Branch => Ok(ExecEffect::Branched),
                crate::registers::file::PcWrite::ExcReturn(pattern) => {
                    Ok(ExecEffect::ExceptionReturn(pattern))
                }
            }
        }

        Instruction::MiscUnary { rd, rm, op } => {
            let src = ctx.regs.reg(rm);
            let result = match op {
                MiscUnaryOp::Sxth => (((src as u16) as i16) as i32) as u32,
                MiscUnaryOp::Sxtb => (((src as u8) as i8) as i32) as u32,
                MiscUnaryOp::Uxth => src as u16 as u32,
                MiscUnaryOp::Uxtb => src as u8 as u32,
                MiscUnaryOp::Rev => src.swap_bytes(),
                MiscUnaryOp::Rev16 => {
                    let lo = (src & 0xFFFF).swap_bytes() >> 16;
                    let hi = (src >> 16).swap_bytes() >> 16;
                    (hi << 16) | lo
                }
                MiscUnaryOp::Revsh => {
                    let halfword = (src as u16).swap_bytes();
                    ((halfword as i16) as i32) as u32
                }
            };
            ctx.regs.set_reg(rd, result);
            Ok(ExecEffect::None)
        }

        Instruction::Cps {
            enable,
            affect_i,
            affect_f,
        } => {
            if !ctx.privileged {
                return Ok(ExecEffect::None);
            }
            if affect_i {
                ctx.regs.masks.primask = !enable;
            }
            if affect_f {
                ctx.regs.masks.faultmask = !enable;
            }
            Ok(ExecEffect::None)
        }

        Instruction::Hint(_) => Ok(ExecEffect::None),

        Instruction::PushPop { registers, pop } => {
            if pop {
                let mut sp = ctx.regs.sp();
                let mut pc_value = None;
                for i in 0..16u8 {
                    if registers & (1 << i) != 0 {
                        let value = ctx.load(sp, Width::Word, false)?;
                        if i == 15 {
                            pc_value = Some(value);
                        } else {
                            ctx.regs.set_reg(i, value);
                        }
                        sp = sp.wrapping_add(4);
                    }
                }
                ctx.regs.set_sp(sp);
                if let Some(value) = pc_value {
                    return match ctx.regs.bx_write_pc(value) {
                        crate::registers::file::PcWrite::Branch => Ok(ExecEffect::Branched),
                        crate::registers::file::PcWrite::ExcReturn(pattern) => {
                            Ok(ExecEffect::ExceptionReturn(pattern))
                        }
                    };
                }
            } else {
                let count = registers.count_ones();
                let start = ctx.regs.sp().wrapping_sub(count * 4);
                let mut addr = start;
                for i in 0..16u8 {
                    if registers & (1 << i) != 0 {
                        let value = if i == 14 { ctx.regs.lr() } else { ctx.regs.reg(i) };
                        ctx.store(addr, Width::Word, value)?;
                        addr = addr.wrapping_add(4);
                    }
                }
                ctx.regs.set_sp(start);
            }
            Ok(ExecEffect::None)
        }

        Instruction::CompareBranchZero { rn, nonzero, imm } => {
            let value = ctx.regs.reg(rn);
            let take = (value == 0) != nonzero;
            if take {
                let target = ctx.regs.pc().wrapping_add(imm);
                ctx.regs.branch_write_pc(target);
                return Ok(ExecEffect::Branched);
            }
            Ok(ExecEffect::None)
        }

        Instruction::It { firstcond, mask } => {
            ctx.regs.set_it_state(ItState::new(firstcond, mask));
            Ok(ExecEffect::None)
        }

        Instruction::Branch { cond, offset, wide: _ } => {
            if condition_passed(cond, ctx.regs.flags()) {
                let target = ctx.regs.pc().wrapping_add(offset as u32);
                ctx.regs.branch_write_pc(target);
                return Ok(ExecEffect::Branched);
            }
            Ok(ExecEffect::None)
        }

        Instruction::BranchLink { offset } => {
            let return_address = ctx.regs.pc() | 1;
            ctx.regs.set_lr(return_address);
            let target = ctx.regs.pc().wrapping_add(offset as u32);
            ctx.regs.branch_write_pc(target);
            Ok(ExecEffect::Branched)
        }

        Instruction::Svc { imm } => Ok(ExecEffect::Svc(imm)),

        Instruction::LoadStore {
            rt,
            operand,
            width,
            is_load,
            sign_extend,
        } => {
            let align_pc = ctx.regs.pc() & !0b11;
            let (addr, writeback) = ctx.resolve_address(operand, align_pc);
            if is_load {
                let value = ctx.load(addr, width, sign_extend)?;
                if let Some((rn, new_base)) = writeback {
                    ctx.regs.set_reg(rn, new_base);
                }
                if rt == 15 {
                    ctx.regs.branch_write_pc(value & !1);
                    return Ok(ExecEffect::Branched);
                }
                ctx.regs.set_reg(rt, value);
            } else {
                let value = ctx.regs.reg(rt);
                ctx.store(addr, width, value)?;
                if let Some((rn, new_base)) = writeback {
                    ctx.regs.set_reg(rn, new_base);
                }
            }
            Ok(ExecEffect::None)
        }

        Instruction::LoadStoreMultiple {
            rn,
            registers,
            is_load,
            writeback,
        } => {
            let base = ctx.regs.reg(rn);
            let mut addr = base;
            if is_load {
                for i in 0..16u8 {
                    if registers & (1 << i) != 0 {
                        let value = ctx.load(addr, Width::Word, false)?;
                        if i == 15 {
                            ctx.regs.branch_write_pc(value & !1);
                        } else {
                            ctx.regs.set_reg(i, value);
                        }
                        addr = addr.wrapping_add(4);
                    }
                }
            } else {
                for i in 0..16u8 {
                    if registers & (1 << i) != 0 {
                        let value = ctx.regs.reg(i);
                        ctx.store(addr, Width::Word, value)?;
                        addr = addr.wrapping_add(4);
                    }
                }
            }
            if writeback {
                ctx.regs.set_reg(rn, addr);
            }
            if is_load && registers & (1 << 15) != 0 {
                return Ok(ExecEffect::Branched);
            }
            Ok(ExecEffect::None)
        }

        Instruction::FormAddress { rd, base_is_sp, imm } => {
            let base = if base_is_sp {
                ctx.regs.sp()
            } else {
                ctx.regs.pc() & !0b11
            };
            ctx.regs.set_reg(rd, base.wrapping_add(imm));
            Ok(ExecEffect::None)
        }

        Instruction::DpModifiedImmediate {
            rd,
            rn,
            op,
            imm12,
            set_flags,
        } => {
            let carry_in = ctx.regs.flags().c;
            let (imm, expand_carry_out) = thumb_expand_imm_with_carry(imm12, carry_in);
            let rn_val = ctx.regs.reg(rn);
            let apply_flags = set_flags;
            match op {
                DpOp::And | DpOp::Tst => {
                    let r = rn_val & imm;
                    if op != DpOp::Tst {
                        ctx.regs.set_reg(rd, r);
                    }
                    if apply_flags || op == DpOp::Tst {
                        set_nzc(ctx.regs, r, expand_carry_out);
                    }
                }
                DpOp::Bic => {
                    let r = rn_val & !imm;
                    ctx.regs.set_reg(rd, r);
                    if apply_flags {
                        set_nzc(ctx.regs, r, expand_carry_out);
                    }
                }
                DpOp::Orr | DpOp::Mov => {
                    let r = if op == DpOp::Mov { imm } else { rn_val | imm };
                    ctx.regs.set_reg(rd, r);
                    if apply_flags {
                        set_nzc(ctx.regs, r, expand_carry_out);
                    }
                }
                DpOp::Orn | DpOp::Mvn => {
                    let r = if op == DpOp::Mvn { !imm } else { rn_val | !imm };
                    ctx.regs.set_reg(rd, r);
                    if apply_flags {
                        set_nzc(ctx.regs, r, expand_carry_out);
                    }
                }
                DpOp::Eor | DpOp::Teq => {
                    let r = rn_val ^ imm;
                    if op != DpOp::Teq {
                        ctx.regs.set_reg(rd, r);
                    }
                    if apply_flags || op == DpOp::Teq {
                        set_nzc(ctx.regs, r, expand_carry_out);
                    }
                }
                DpOp::Add | DpOp::Cmn => {
                    let out = add_with_carry(rn_val, imm, false);
                    if op != DpOp::Cmn {
                        ctx.regs.set_reg(rd, out.result);
                    }
                    if apply_flags || op == DpOp::Cmn {
                        set_nzcv(ctx.regs, out.result, out.carry_out, out.overflow);
                    }
                }
                DpOp::Adc => {
                    let out = add_with_carry(rn_val, imm, carry_in);
                    ctx.regs.set_reg(rd, out.result);
                    if apply_flags {
                        set_nzcv(ctx.regs, out.result, out.carry_out, out.overflow);
                    }
                }
                DpOp::Sbc => {
                    let out = add_with_carry(rn_val, !imm, carry_in);
                    ctx.regs.set_reg(rd, out.result);
                    if apply_flags {
                        set_nzcv(ctx.regs, out.result, out.carry_out, out.overflow);
                    }
                }
                DpOp::Sub | DpOp::Cmp => {
                    let out = sub_with_carry(rn_val, imm);
                    if op != DpOp::Cmp {
                        ctx.regs.set_reg(rd, out.result);
                    }
                    if apply_flags || op == DpOp::Cmp {
                        set_nzcv(ctx.regs, out.result, out.carry_out, out.overflow);
                    }
                }
                DpOp::Rsb => {
                    let out = add_with_carry(!rn_val, imm, true);
                    ctx.regs.set_reg(rd, out.result);
                    if apply_flags {
                        set_nzcv(ctx.regs, out.result, out.carry_out, out.overflow);
                    }
                }
            }
            Ok(ExecEffect::None)
        }

        Instruction::DpPlainImmediate { rd, rn, op, imm } => {
            match op {
                PlainImmOp::AddW => {
                    let base = if rn == 15 { ctx.regs.pc() & !0b11 } else { ctx.regs.reg(rn) };
                    ctx.regs.set_reg(rd, base.wrapping_add(imm));
                }
                PlainImmOp::SubW => {
                    let base = if rn == 15 { ctx.regs.pc() & !0b11 } else { ctx.regs.reg(rn) };
                    ctx.regs.set_reg(rd, base.wrapping_sub(imm));
                }
                PlainImmOp::MovW => {
                    ctx.regs.set_reg(rd, imm);
                }
                PlainImmOp::MovT => {
                    let lower = ctx.regs.reg(rd) & 0xFFFF;
                    ctx.regs.set_reg(rd, (imm << 16) | lower);
                }
            }
            Ok(ExecEffect::None)
        }

        Instruction::MultiplyAccumulate {
            rd,
            rn,
            rm,
            ra,
            subtract,
        } => {
            let product = ctx.regs.reg(rn).wrapping_mul(ctx.regs.reg(rm));
            let result = match ra {
                Some(ra) if subtract => ctx.regs.reg(ra).wrapping_sub(product),
                Some(ra) => ctx.regs.reg(ra).wrapping_add(product),
                None => product,
            };
            ctx.regs.set_reg(rd, result);
            Ok(ExecEffect::None)
        }

        Instruction::Divide { rd, rn, rm, signed } => {
            let divisor = ctx.regs.reg(rm);
            if divisor == 0 && ctx.div_0_trp {
                return Err(FaultKind::UsageFault(UsageFaultReason::DivideByZero));
            }
            let result = if divisor == 0 {
                0
            } else if signed {
                (ctx.regs.reg(rn) as i32).wrapping_div(divisor as i32) as u32
            } else {
                ctx.regs.reg(rn).wrapping_div(divisor)
            };
            ctx.regs.set_reg(rd, result);
            Ok(ExecEffect::None)
        }

        Instruction::Mrs { rd, spec_reg } => {
            let value = match spec_reg {
                SpecReg::Apsr => {
                    let f = ctx.regs.flags();
                    ((f.n as u32) << 31)
                        | ((f.z as u32) << 30)
                        | ((f.c as u32) << 29)
                        | ((f.v as u32) << 28)
                        | ((f.q as u32) << 27)
                }
                SpecReg::Ipsr => ctx.regs.psr.exception_number() as u32,
                SpecReg::Epsr => 0,
                SpecReg::Primask => ctx.regs.masks.primask as u32,
                SpecReg::Basepri => ctx.regs.masks.basepri as u32,
                SpecReg::Faultmask => ctx.regs.masks.faultmask as u32,
                SpecReg::Control => {
                    ((ctx.regs.control.spsel() as u32) << 1) | (ctx.regs.control.npriv() as u32)
                }
            };
            ctx.regs.set_reg(rd, value);
            Ok(ExecEffect::None)
        }

        Instruction::Msr { spec_reg, rn } => {
            let value = ctx.regs.reg(rn);
            if !ctx.privileged
                && matches!(
                    spec_reg,
                    SpecReg::Primask | SpecReg::Basepri | SpecReg::Faultmask | SpecReg::Control
                )
            {
                return Ok(ExecEffect::None);
            }
            match spec_reg {
                SpecReg::Apsr => {
                    let mut f = ctx.regs.flags();
                    f.n = value & (1 << 31) != 0;
                    f.z = value & (1 << 30) != 0;
                    f.c = value & (1 << 29) != 0;
                    f.v = value & (1 << 28) != 0;
                    f.q = value & (1 << 27) != 0;
                    ctx.regs.set_flags(f);
                }
                SpecReg::Ipsr | SpecReg::Epsr => {}
                SpecReg::Primask => ctx.regs.masks.primask = value & 1 != 0,
                SpecReg::Basepri => ctx.regs.masks.basepri = value as u8,
                SpecReg::Faultmask => ctx.regs.masks.faultmask = value & 1 != 0,
                SpecReg::Control => {
                    ctx.regs.control.set_spsel(value & 0b10 != 0);
                    if ctx.regs.mode() == crate::registers::file::Mode::Thread {
                        ctx.regs.control.set_npriv(value & 0b01 != 0);
                    }
                }
            }
            Ok(ExecEffect::None)
        }

        Instruction::Undefined => Err(FaultKind::UsageFault(UsageFaultReason::Undefined)),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AddressSpace, MemoryConfig};
    use crate::mpu::MpuRegisters;
    use crate::registers::file::RegisterFile;

    fn harness() -> (RegisterFile, AddressSpace, MpuRegisters) {
        (
            RegisterFile::default(),
            AddressSpace::new(MemoryConfig::default()),
            MpuRegisters::default(),
        )
    }

    #[test]
    fn movs_sets_zero_flag_for_zero_immediate() {
        let (mut regs, mut mem, mpu) = harness();
        let mut ctx = ExecContext {
            regs: &mut regs,
            mem: &mut mem,
            mpu: &mpu,
            big_endian: false,
            privileged: true,
            execution_priority: 256,
            unalign_trp: false,
            div_0_trp: false,
        };
        execute(
            Instruction::MovCmpAddSubImm8 {
                rdn: 0,
                imm: 0,
                op: MovCmpAddSubOp::Mov,
                set_flags: true,
            },
            &mut ctx,
        )
        .unwrap();
        assert_eq!(ctx.regs.reg(0), 0);
        assert!(ctx.regs.flags().z);
    }

    #[test]
    fn adds_reports_carry_and_overflow() {
        let (mut regs, mut mem, mpu) = harness();
        regs.set_reg(0, 0xFFFF_FFFF);
        let mut ctx = ExecContext {
            regs: &mut regs,
            mem: &mut mem,
            mpu: &mpu,
            big_endian: false,
            privileged: true,
            execution_priority: 256,
            unalign_trp: false,
            div_0_trp: false,
        };
        execute(
            Instruction::AddSub3 {
                rd: 1,
                rn: 0,
                operand: AddSubOperand::Immediate3(1),
                subtract: false,
                set_flags: true,
            },
            &mut ctx,
        )
        .unwrap();
        assert_eq!(ctx.regs.reg(1), 0);
        assert!(ctx.regs.flags().z);
        assert!(ctx.regs.flags().c);
    }

    #[test]
    fn misaligned_word_load_faults() {
        let (mut regs, mut mem, mpu) = harness();
        regs.set_reg(0, 0x2000_0001);
        let mut ctx = ExecContext {
            regs: &mut regs,
            mem: &mut mem,
            mpu: &mpu,
            big_endian: false,
            privileged: true,
            execution_priority: 256,
            unalign_trp: true,
            div_0_trp: false,
        };
        let result = execute(
            Instruction::LoadStore {
                rt: 1,
                operand: MemOperand::Immediate {
                    rn: 0,
                    imm: 0,
                    pre_indexed: true,
                    writeback: false,
                },
                width: Width::Word,
                is_load: true,
                sign_extend: false,
            },
            &mut ctx,
        );
        assert!(matches!(result, Err(FaultKind::UsageFault(UsageFaultReason::Unaligned))));
    }

    #[test]
    fn push_then_pop_round_trips_registers() {
        let (mut regs, mut mem, mpu) = harness();
        regs.set_initial_sp_main(0x2000_1000);
        regs.set_reg(4, 0x1234_5678);
        let mut ctx = ExecContext {
            regs: &mut regs,
            mem: &mut mem,
            mpu: &mpu,
            big_endian: false,
            privileged: true,
            execution_priority: 256,
            unalign_trp: false,
            div_0_trp: false,
        };
        execute(
            Instruction::PushPop {
                registers: 1 << 4,
                pop: false,
            },
            &mut ctx,
        )
        .unwrap();
        ctx.regs.set_reg(4, 0);
        execute(
            Instruction::PushPop {
                registers: 1 << 4,
                pop: true,
            },
            &mut ctx,
        )
        .unwrap();
        assert_eq!(ctx.regs.reg(4), 0x1234_5678);
        assert_eq!(ctx.regs.sp(), 0x2000_1000);
    }

    #[test]
    fn divide_by_zero_yields_zero_when_trap_disabled() {
        let (mut regs, mut mem, mpu) = harness();
        regs.set_reg(1, 10);
        regs.set_reg(2, 0);
        let mut ctx = ExecContext {
            regs: &mut regs,
            mem: &mut mem,
            mpu: &mpu,
            big_endian: false,
            privileged: true,
            execution_priority: 256,
            unalign_trp: false,
            div_0_trp: false,
        };
        execute(
            Instruction::Divide {
                rd: 0,
                rn: 1,
                rm: 2,
                signed: true,
            },
            &mut ctx,
        )
        .unwrap();
        assert_eq!(ctx.regs.reg(0), 0);
    }

    #[test]
    fn divide_by_zero_faults_when_trap_enabled() {
        let (mut regs, mut mem, mpu) = harness();
        regs.set_reg(1, 10);
        regs.set_reg(2, 0);
        let mut ctx = ExecContext {
            regs: &mut regs,
            mem: &mut mem,
            mpu: &mpu,
            big_endian: false,
            privileged: true,
            execution_priority: 256,
            unalign_trp: false,
            div_0_trp: true,
        };
        let result = execute(
            Instruction::Divide {
                rd: 0,
                rn: 1,
                rm: 2,
                signed: true,
            },
            &mut ctx,
        );
        assert!(matches!(
            result,
            Err(FaultKind::UsageFault(UsageFaultReason::DivideByZero))
        ));
    }
}
