//! Instruction execution for the 8080.
//!
//! One `execute()` call performs the whole instruction: operand fetches,
//! memory traffic, flag updates, and the PC effect. The caller has already
//! fetched the opcode byte and advanced PC past it.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_lossless)]

use emu_core::IoBus;

use crate::alu;
use crate::flags::CF;

use super::I8080;

impl I8080 {
    /// Execute a single opcode.
    pub(super) fn execute<B: IoBus>(&mut self, op: u8, bus: &mut B) -> Result<(), String> {
        match op {
            // NOP, plus the undocumented aliases in the 0x08 column
            0x00 | 0x08 | 0x10 | 0x18 | 0x20 | 0x28 | 0x30 | 0x38 => {}

            // LXI rp, d16 (01=BC, 11=DE, 21=HL, 31=SP)
            0x01 | 0x11 | 0x21 | 0x31 => {
                let value = self.fetch_word(bus);
                self.set_rp((op >> 4) & 3, value);
            }

            // STAX B / STAX D
            0x02 => bus.write(self.regs.bc(), self.regs.a),
            0x12 => bus.write(self.regs.de(), self.regs.a),

            // LDAX B / LDAX D
            0x0A => self.regs.a = bus.read(self.regs.bc()),
            0x1A => self.regs.a = bus.read(self.regs.de()),

            // INX rp (03=BC, 13=DE, 23=HL, 33=SP), no flags
            0x03 | 0x13 | 0x23 | 0x33 => {
                let rp = (op >> 4) & 3;
                let value = self.get_rp(rp).wrapping_add(1);
                self.set_rp(rp, value);
            }

            // DCX rp (0B=BC, 1B=DE, 2B=HL, 3B=SP), no flags
            0x0B | 0x1B | 0x2B | 0x3B => {
                let rp = (op >> 4) & 3;
                let value = self.get_rp(rp).wrapping_sub(1);
                self.set_rp(rp, value);
            }

            // INR r (04=B, 0C=C, 14=D, 1C=E, 24=H, 2C=L, 34=M, 3C=A)
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                let r = (op >> 3) & 7;
                let result = if r == 6 {
                    let addr = self.regs.hl();
                    let result = alu::inc8(bus.read(addr));
                    bus.write(addr, result.value);
                    result
                } else {
                    let result = alu::inc8(self.get_reg8(r));
                    self.set_reg8(r, result.value);
                    result
                };
                self.regs.set_f((self.regs.f & CF) | result.flags);
            }

            // DCR r (05=B, 0D=C, 15=D, 1D=E, 25=H, 2D=L, 35=M, 3D=A)
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                let r = (op >> 3) & 7;
                let result = if r == 6 {
                    let addr = self.regs.hl();
                    let result = alu::dec8(bus.read(addr));
                    bus.write(addr, result.value);
                    result
                } else {
                    let result = alu::dec8(self.get_reg8(r));
                    self.set_reg8(r, result.value);
                    result
                };
                self.regs.set_f((self.regs.f & CF) | result.flags);
            }

            // MVI r, d8 (06=B, 0E=C, 16=D, 1E=E, 26=H, 2E=L, 36=M, 3E=A)
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
                let value = self.fetch_byte(bus);
                let r = (op >> 3) & 7;
                if r == 6 {
                    bus.write(self.regs.hl(), value);
                } else {
                    self.set_reg8(r, value);
                }
            }

            // RLC
            0x07 => {
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | carry;
                self.regs.set_f((self.regs.f & !CF) | carry);
            }

            // RRC
            0x0F => {
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | (carry << 7);
                self.regs.set_f((self.regs.f & !CF) | carry);
            }

            // RAL: rotate left through carry
            0x17 => {
                let old_carry = self.regs.f & CF;
                let new_carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | old_carry;
                self.regs.set_f((self.regs.f & !CF) | new_carry);
            }

            // RAR: rotate right through carry
            0x1F => {
                let old_carry = self.regs.f & CF;
                let new_carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | (old_carry << 7);
                self.regs.set_f((self.regs.f & !CF) | new_carry);
            }

            // DAD rp (09=BC, 19=DE, 29=HL, 39=SP), carry from the 17th bit
            0x09 | 0x19 | 0x29 | 0x39 => {
                let sum = u32::from(self.regs.hl()) + u32::from(self.get_rp((op >> 4) & 3));
                self.regs.set_hl(sum as u16);
                let carry = if sum > 0xFFFF { CF } else { 0 };
                self.regs.set_f((self.regs.f & !CF) | carry);
            }

            // SHLD a16
            0x22 => {
                let addr = self.fetch_word(bus);
                bus.write(addr, self.regs.l);
                bus.write(addr.wrapping_add(1), self.regs.h);
            }

            // LHLD a16
            0x2A => {
                let addr = self.fetch_word(bus);
                self.regs.l = bus.read(addr);
                self.regs.h = bus.read(addr.wrapping_add(1));
            }

            // STA a16
            0x32 => {
                let addr = self.fetch_word(bus);
                bus.write(addr, self.regs.a);
            }

            // LDA a16
            0x3A => {
                let addr = self.fetch_word(bus);
                self.regs.a = bus.read(addr);
            }

            // DAA
            0x27 => {
                let result = alu::daa(self.regs.a, self.regs.f);
                self.regs.a = result.value;
                self.regs.set_f(result.flags);
            }

            // CMA: complement A, no flags
            0x2F => self.regs.a = !self.regs.a,

            // STC
            0x37 => self.regs.set_f(self.regs.f | CF),

            // CMC
            0x3F => self.regs.set_f(self.regs.f ^ CF),

            // MOV r, r' (40-7F except 76=HLT); code 6 is the (HL) operand
            0x40..=0x7F if op != 0x76 => {
                let src = op & 7;
                let dst = (op >> 3) & 7;
                if src == 6 {
                    let value = bus.read(self.regs.hl());
                    self.set_reg8(dst, value);
                } else if dst == 6 {
                    bus.write(self.regs.hl(), self.get_reg8(src));
                } else {
                    let value = self.get_reg8(src);
                    self.set_reg8(dst, value);
                }
            }

            // HLT: PC stays on the halt opcode
            0x76 => {
                self.regs.halted = true;
                self.regs.pc = self.regs.pc.wrapping_sub(1);
            }

            // ADD/ADC/SUB/SBB/ANA/XRA/ORA/CMP r (80-BF)
            0x80..=0xBF => {
                let r = op & 7;
                let operand = if r == 6 {
                    bus.read(self.regs.hl())
                } else {
                    self.get_reg8(r)
                };
                self.alu_a(op, operand);
            }

            // Rcc (C0=NZ, C8=Z, D0=NC, D8=C, E0=PO, E8=PE, F0=P, F8=M)
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = self.pop16(bus);
                }
            }

            // POP rp (C1=BC, D1=DE, E1=HL, F1=PSW)
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let value = self.pop16(bus);
                match (op >> 4) & 3 {
                    0 => self.regs.set_bc(value),
                    1 => self.regs.set_de(value),
                    2 => self.regs.set_hl(value),
                    _ => {
                        self.regs.a = (value >> 8) as u8;
                        self.regs.set_f(value as u8);
                    }
                }
            }

            // Jcc a16
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let target = self.fetch_word(bus);
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = target;
                }
            }

            // JMP a16 (CB is an undocumented alias)
            0xC3 | 0xCB => self.regs.pc = self.fetch_word(bus),

            // Ccc a16
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let target = self.fetch_word(bus);
                if self.condition((op >> 3) & 7) {
                    self.push16(bus, self.regs.pc);
                    self.regs.pc = target;
                }
            }

            // PUSH rp (C5=BC, D5=DE, E5=HL, F5=PSW)
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let value = match (op >> 4) & 3 {
                    0 => self.regs.bc(),
                    1 => self.regs.de(),
                    2 => self.regs.hl(),
                    _ => self.regs.psw(),
                };
                self.push16(bus, value);
            }

            // ADI/ACI/SUI/SBI/ANI/XRI/ORI/CPI d8
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let operand = self.fetch_byte(bus);
                self.alu_a(op, operand);
            }

            // RST n: vector at op & 0x38
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                self.push16(bus, self.regs.pc);
                self.regs.pc = u16::from(op & 0x38);
            }

            // RET (D9 is an undocumented alias)
            0xC9 | 0xD9 => self.regs.pc = self.pop16(bus),

            // CALL a16 (DD/ED/FD are undocumented aliases)
            0xCD | 0xDD | 0xED | 0xFD => {
                let target = self.fetch_word(bus);
                self.push16(bus, self.regs.pc);
                self.regs.pc = target;
            }

            // OUT d8
            0xD3 => {
                let port = self.fetch_byte(bus);
                bus.write_io(port, self.regs.a);
            }

            // IN d8
            0xDB => {
                let port = self.fetch_byte(bus);
                self.regs.a = bus.read_io(port);
            }

            // XTHL: swap HL with the top of stack
            0xE3 => {
                let sp = self.regs.sp;
                let lo = bus.read(sp);
                let hi = bus.read(sp.wrapping_add(1));
                bus.write(sp, self.regs.l);
                bus.write(sp.wrapping_add(1), self.regs.h);
                self.regs.l = lo;
                self.regs.h = hi;
            }

            // PCHL
            0xE9 => self.regs.pc = self.regs.hl(),

            // XCHG: swap DE with HL
            0xEB => {
                core::mem::swap(&mut self.regs.d, &mut self.regs.h);
                core::mem::swap(&mut self.regs.e, &mut self.regs.l);
            }

            // DI / EI; the one-instruction EI delay is not modelled
            0xF3 => self.regs.ie = false,
            0xFB => self.regs.ie = true,

            // SPHL
            0xF9 => self.regs.sp = self.regs.hl(),

            _ => {
                let at = self.regs.pc.wrapping_sub(1);
                return Err(format!("unrecognised instruction 0x{op:02X} at 0x{at:04X}"));
            }
        }

        Ok(())
    }

    /// Accumulator ALU dispatch for the 80-BF block and its immediates:
    /// bits 3-5 select ADD ADC SUB SBB ANA XRA ORA CMP.
    fn alu_a(&mut self, op: u8, operand: u8) {
        let a = self.regs.a;
        let carry = self.regs.f & CF != 0;
        let result = match (op >> 3) & 7 {
            0 => alu::add(a, operand, false),
            1 => alu::add(a, operand, carry),
            2 => alu::sub(a, operand, false),
            3 => alu::sub(a, operand, carry),
            4 => alu::and(a, operand),
            5 => alu::xor(a, operand),
            6 => alu::or(a, operand),
            _ => {
                // CMP: flags only, A preserved
                let result = alu::sub(a, operand, false);
                self.regs.set_f(result.flags);
                return;
            }
        };
        self.regs.a = result.value;
        self.regs.set_f(result.flags);
    }
}
