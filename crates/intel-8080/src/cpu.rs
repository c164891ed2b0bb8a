//! 8080 CPU core with per-instruction execution.

#![allow(clippy::cast_possible_truncation)] // Intentional truncation for low byte extraction.

use emu_core::{Cpu, IoBus};

use crate::flags::{CF, PF, SF, ZF};
use crate::registers::Registers;

mod execute;

/// Intel 8080 CPU.
pub struct I8080 {
    /// All CPU registers.
    pub regs: Registers,
    /// Pending interrupt request.
    int_pending: bool,
    /// Opcode latched with the pending request (typically an RST).
    int_opcode: u8,
}

impl I8080 {
    /// Create a new 8080 in the reset state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::default(),
            int_pending: false,
            int_opcode: 0,
        }
    }

    /// Execute one instruction against the bus.
    ///
    /// Returns the decode error for an opcode outside the instruction set,
    /// leaving every register (PC included) as it was before the fetch.
    ///
    /// A halted CPU re-executes HLT: PC stays on the halt opcode, so the
    /// caller observes an unchanged PC for as long as the halt lasts.
    ///
    /// # Errors
    ///
    /// `Err` carries an "unrecognised instruction" message with the opcode
    /// and the address it was fetched from.
    pub fn step<B: IoBus>(&mut self, bus: &mut B) -> Result<(), String> {
        let pc0 = self.regs.pc;
        let opcode = self.fetch_byte(bus);
        self.execute(opcode, bus).map_err(|e| {
            self.regs.pc = pc0;
            e
        })
    }

    /// Overwrite PC, releasing a halt.
    pub fn force_pc(&mut self, addr: u16) {
        self.regs.pc = addr;
        self.regs.halted = false;
    }

    /// True if an interrupt is latched and the master enable is set.
    #[must_use]
    pub fn interrupt_ready(&self) -> bool {
        self.int_pending && self.regs.ie
    }

    /// Acknowledge a ready interrupt: clear enable and pending, then run
    /// the latched opcode as if it had been fetched.
    ///
    /// Does nothing unless `interrupt_ready()`. Only called between
    /// instructions, so the latched opcode never splits one.
    pub fn service_interrupt<B: IoBus>(&mut self, bus: &mut B) -> Result<(), String> {
        if !self.interrupt_ready() {
            return Ok(());
        }
        self.regs.ie = false;
        self.int_pending = false;
        self.regs.halted = false;
        self.execute(self.int_opcode, bus)
    }

    /// Fetch next byte at PC and increment PC.
    fn fetch_byte<B: IoBus>(&mut self, bus: &mut B) -> u8 {
        let value = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    /// Fetch a little-endian 16-bit operand at PC.
    fn fetch_word<B: IoBus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.fetch_byte(bus);
        let hi = self.fetch_byte(bus);
        u16::from(lo) | (u16::from(hi) << 8)
    }

    /// Push a word onto the stack, high byte at the higher address.
    fn push16<B: IoBus>(&mut self, bus: &mut B, value: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp, (value >> 8) as u8);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp, value as u8);
    }

    /// Pop a word from the stack.
    fn pop16<B: IoBus>(&mut self, bus: &mut B) -> u16 {
        let lo = bus.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = bus.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        u16::from(lo) | (u16::from(hi) << 8)
    }

    /// Read the register selected by a 3-bit field (B C D E H L - A).
    ///
    /// Code 6 is the memory operand (HL); decode arms handle it before
    /// calling here.
    fn get_reg8(&self, code: u8) -> u8 {
        match code {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            7 => self.regs.a,
            _ => unreachable!("memory operand handled by the decode arm"),
        }
    }

    /// Write the register selected by a 3-bit field.
    fn set_reg8(&mut self, code: u8, value: u8) {
        match code {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            7 => self.regs.a = value,
            _ => unreachable!("memory operand handled by the decode arm"),
        }
    }

    /// Read the register pair selected by a 2-bit field (BC DE HL SP).
    fn get_rp(&self, code: u8) -> u16 {
        match code & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    /// Write the register pair selected by a 2-bit field.
    fn set_rp(&mut self, code: u8, value: u16) {
        match code & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            _ => self.regs.sp = value,
        }
    }

    /// Evaluate a 3-bit condition code: NZ Z NC C PO PE P M.
    fn condition(&self, code: u8) -> bool {
        let f = self.regs.f;
        match code & 7 {
            0 => f & ZF == 0,
            1 => f & ZF != 0,
            2 => f & CF == 0,
            3 => f & CF != 0,
            4 => f & PF == 0,
            5 => f & PF != 0,
            6 => f & SF == 0,
            _ => f & SF != 0,
        }
    }
}

impl Default for I8080 {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu for I8080 {
    type Registers = Registers;

    fn pc(&self) -> u16 {
        self.regs.pc
    }

    fn registers(&self) -> Self::Registers {
        self.regs
    }

    fn is_halted(&self) -> bool {
        self.regs.halted
    }

    fn interrupt(&mut self, opcode: u8) -> bool {
        self.int_pending = true;
        self.int_opcode = opcode;
        true
    }

    fn reset(&mut self) {
        self.regs = Registers::default();
        self.int_pending = false;
        self.int_opcode = 0;
    }
}
