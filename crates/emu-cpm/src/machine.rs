//! Top-level CP/M machine.
//!
//! Couples the 8080 core to the machine bus and traps guest calls to the
//! BDOS entry vector. The host drives execution one instruction at a time
//! through `step`, polling `is_waiting_for_input` to feed the console when
//! a guest input call starves.

#![allow(clippy::cast_possible_truncation)]

use emu_core::Cpu;
use intel_8080::{CF, I8080, PF, SF, ZF};

use crate::bdos::{self, BdosAction};
use crate::bus::CpmBus;
use crate::config::{CpmConfig, default_disk_dir};
use crate::console::Console;
use crate::disk::DiskController;
use crate::memory::Memory;

/// The BDOS entry vector trapped by the machine.
const BDOS_ENTRY: u16 = 0x0005;

/// CP/M machine: 8080 core, 64 KiB RAM, console, and two disk drives.
pub struct CpmMachine {
    cpu: I8080,
    bus: CpmBus,
    /// Three opcode bytes at PC before the last step, then three at the
    /// new PC. Debugger food.
    instr_window: [u8; 6],
    mirror_output: bool,
}

impl CpmMachine {
    /// Build a machine, loading (or seeding) the disk images.
    #[must_use]
    pub fn new(config: &CpmConfig) -> Self {
        let mut disk = DiskController::new(config.disk_dir.clone());
        disk.init();
        let bus = CpmBus::new(
            Memory::new(),
            Console::new(config.mirror_output),
            disk,
        );
        let mut machine = Self {
            cpu: I8080::new(),
            bus,
            instr_window: [0; 6],
            mirror_output: config.mirror_output,
        };
        machine.refresh_window();
        machine
    }

    /// Load a string of hex digit pairs into memory at `origin`.
    ///
    /// Whitespace between pairs is tolerated.
    ///
    /// # Errors
    ///
    /// An odd number of digits or a non-hex character is a load error;
    /// nothing is written.
    pub fn load(&mut self, hex: &str, origin: u16) -> Result<(), String> {
        let digits: Vec<char> = hex.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        if digits.len() % 2 != 0 {
            return Err(format!("odd number of hex digits ({})", digits.len()));
        }

        let mut bytes = Vec::with_capacity(digits.len() / 2);
        for pair in digits.chunks(2) {
            let hi = pair[0]
                .to_digit(16)
                .ok_or_else(|| format!("invalid hex digit '{}'", pair[0]))?;
            let lo = pair[1]
                .to_digit(16)
                .ok_or_else(|| format!("invalid hex digit '{}'", pair[1]))?;
            bytes.push((hi * 16 + lo) as u8);
        }

        for (i, &byte) in bytes.iter().enumerate() {
            self.bus.memory.poke(origin.wrapping_add(i as u16), byte);
        }
        self.refresh_window();
        Ok(())
    }

    /// Execute one instruction (or one BDOS service) and return the
    /// register dump.
    ///
    /// # Errors
    ///
    /// A decode failure reports the unrecognised opcode and leaves the
    /// machine unchanged.
    pub fn step(&mut self) -> Result<String, String> {
        let pc_before = self.cpu.pc();
        let before = self.peek3(pc_before);

        if self.traps_bdos_call() {
            match bdos::dispatch(&mut self.cpu.regs, &mut self.bus) {
                BdosAction::Continue => self.cpu.regs.pc = pc_before.wrapping_add(3),
                // PC stays on the CALL; it replays once input arrives.
                BdosAction::Waiting => {}
            }
        } else {
            self.cpu.step(&mut self.bus)?;
        }

        let after = self.peek3(self.cpu.pc());
        self.instr_window = [before[0], before[1], before[2], after[0], after[1], after[2]];
        Ok(self.register_dump())
    }

    /// Perform two steps. Retained for backward compatibility; new code
    /// should loop `step`.
    ///
    /// # Errors
    ///
    /// Propagates the first decode failure.
    pub fn run(&mut self) -> Result<String, String> {
        self.step()?;
        self.step()
    }

    /// Reset the machine: registers and flags to zero, memory cleared,
    /// console and disks reinitialised. Returns the register dump.
    pub fn reset(&mut self) -> String {
        self.cpu.reset();
        self.bus.memory.clear();
        self.bus.console = Console::new(self.mirror_output);
        self.bus.disk.init();
        self.refresh_window();
        self.register_dump()
    }

    /// Overwrite PC and refresh the lookahead window.
    pub fn set_pc(&mut self, addr: u16) {
        self.cpu.force_pc(addr);
        self.refresh_window();
    }

    /// Current program counter.
    #[must_use]
    pub fn current_address(&self) -> u16 {
        self.cpu.pc()
    }

    /// The byte at the current program counter.
    #[must_use]
    pub fn current_data(&self) -> u8 {
        self.bus.memory.peek(self.cpu.pc())
    }

    /// Last address touched by guest memory traffic.
    #[must_use]
    pub fn current_address_bus(&self) -> u16 {
        self.bus.memory.address_bus()
    }

    /// Three bytes at PC before the last step, three bytes after.
    #[must_use]
    pub fn instructions(&self) -> [u8; 6] {
        self.instr_window
    }

    /// True while a BDOS input call is starved.
    #[must_use]
    pub fn is_waiting_for_input(&self) -> bool {
        self.bus.console.is_waiting()
    }

    pub fn clear_waiting(&mut self) {
        self.bus.console.clear_waiting();
    }

    /// Enqueue a host key. Clears the waiting flag.
    pub fn put_char(&mut self, byte: u8) {
        self.bus.console.put_char(byte);
    }

    /// Dequeue one console output byte, 0 if none.
    pub fn get_char(&mut self) -> u8 {
        self.bus.console.get_char()
    }

    /// Console status: 0xFF if a key is pending, else 0.
    #[must_use]
    pub fn console_status(&self) -> u8 {
        self.bus.console.status()
    }

    pub fn set_echo(&mut self, enable: bool) {
        self.bus.console.set_echo(enable);
    }

    /// Latch an interrupt opcode for later delivery.
    pub fn trigger_interrupt(&mut self, opcode: u8) {
        self.cpu.interrupt(opcode);
    }

    /// True if an interrupt is latched and interrupts are enabled.
    #[must_use]
    pub fn check_interrupt(&self) -> bool {
        self.cpu.interrupt_ready()
    }

    /// Deliver a ready interrupt between instructions.
    ///
    /// # Errors
    ///
    /// Reports a decode failure in the latched opcode.
    pub fn process_interrupt(&mut self) -> Result<(), String> {
        self.cpu.service_interrupt(&mut self.bus)
    }

    /// Override the directory holding A.DSK/B.DSK and reload the drives.
    /// An empty path restores the default location.
    pub fn set_disk_base_path(&mut self, path: &str) {
        let dir = if path.is_empty() {
            default_disk_dir()
        } else {
            path.into()
        };
        self.bus.disk.set_disk_dir(dir);
        self.bus.disk.init();
    }

    /// True once the guest has executed HLT.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.cpu.is_halted()
    }

    /// Reference to the bus (memory, console, disks).
    #[must_use]
    pub fn bus(&self) -> &CpmBus {
        &self.bus
    }

    /// Mutable reference to the bus.
    pub fn bus_mut(&mut self) -> &mut CpmBus {
        &mut self.bus
    }

    /// Reference to the CPU.
    #[must_use]
    pub fn cpu(&self) -> &I8080 {
        &self.cpu
    }

    /// Mutable reference to the CPU.
    pub fn cpu_mut(&mut self) -> &mut I8080 {
        &mut self.cpu
    }

    /// The fixed-format register dump.
    #[must_use]
    pub fn register_dump(&self) -> String {
        let r = &self.cpu.regs;
        format!(
            "PC:{:04X}\tA:{:02X} B:{:02X} C:{:02X} D:{:02X} E:{:02X} H:{:02X} L:{:02X} SP:{:04X}\n",
            r.pc, r.a, r.b, r.c, r.d, r.e, r.h, r.l, r.sp
        )
    }

    /// True if the instruction at PC is a CALL that must be serviced by
    /// the BDOS dispatcher instead of the CPU: an unconditional CALL (or
    /// alias) to 0x0005, or a conditional CALL there whose predicate
    /// holds.
    fn traps_bdos_call(&self) -> bool {
        let pc = self.cpu.pc();
        let op = self.bus.memory.peek(pc);
        let target = u16::from(self.bus.memory.peek(pc.wrapping_add(1)))
            | (u16::from(self.bus.memory.peek(pc.wrapping_add(2))) << 8);
        if target != BDOS_ENTRY {
            return false;
        }
        match op {
            0xCD | 0xDD | 0xED | 0xFD => true,
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                self.condition_met((op >> 3) & 7)
            }
            _ => false,
        }
    }

    /// The decoder's condition table: NZ Z NC C PO PE P M.
    fn condition_met(&self, code: u8) -> bool {
        let f = self.cpu.regs.f;
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

    fn peek3(&self, addr: u16) -> [u8; 3] {
        [
            self.bus.memory.peek(addr),
            self.bus.memory.peek(addr.wrapping_add(1)),
            self.bus.memory.peek(addr.wrapping_add(2)),
        ]
    }

    fn refresh_window(&mut self) {
        let here = self.peek3(self.cpu.pc());
        self.instr_window[3] = here[0];
        self.instr_window[4] = here[1];
        self.instr_window[5] = here[2];
    }
}
