//! Machine bus: memory and I/O port routing.
//!
//! Memory traffic goes straight to the 64 KiB RAM. The I/O space carries
//! the port-level BIOS: console status/data ports and the raw disk
//! registers (select, track, sector, DMA pointer, execute).

use emu_core::{Bus, IoBus};

use crate::console::Console;
use crate::disk::DiskController;
use crate::memory::Memory;

/// The CP/M machine bus, implementing `emu_core::Bus` and `IoBus`.
///
/// Owns the memory, console, and disk subsystems. The CPU reaches all of
/// them through the two bus traits; the BDOS dispatcher reaches them as
/// plain fields.
pub struct CpmBus {
    pub memory: Memory,
    pub console: Console,
    pub disk: DiskController,
}

impl CpmBus {
    #[must_use]
    pub fn new(memory: Memory, console: Console, disk: DiskController) -> Self {
        Self {
            memory,
            console,
            disk,
        }
    }
}

impl Bus for CpmBus {
    fn read(&mut self, address: u16) -> u8 {
        self.memory.read(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.memory.write(address, value);
    }
}

impl IoBus for CpmBus {
    fn read_io(&mut self, port: u8) -> u8 {
        match port {
            // Console status
            0x00 | 0x01 | 0xF0 => self.console.status(),
            // Console input (non-blocking)
            0xF1 => self.console.read_input().unwrap_or(0),
            // Last disk operation status
            0x15 => self.disk.status(),
            // Execute sector read / write, returning the status
            0xF8 => self.disk.exec_read(&mut self.memory),
            0xF9 => self.disk.exec_write(&self.memory),
            _ => 0,
        }
    }

    fn write_io(&mut self, port: u8, value: u8) {
        match port {
            // Console output
            0x01 | 0xF2 => self.console.push_output(value),
            // Disk registers
            0x10 | 0xF3 => {
                self.disk.select(value);
            }
            0x11 | 0xF4 => self.disk.set_track(value),
            0x12 | 0xF5 => self.disk.set_sector(value),
            0x13 | 0xF6 => self.disk.set_dma_low(value),
            0x14 | 0xF7 => self.disk.set_dma_high(value),
            // Execute: 0 = read, 1 = write, 2 = home
            0x15 => match value {
                0 => {
                    self.disk.exec_read(&mut self.memory);
                }
                1 => {
                    self.disk.exec_write(&self.memory);
                }
                2 => self.disk.home(),
                _ => {}
            },
            0xFA => self.disk.home(),
            _ => {}
        }
    }
}
