//! BDOS call dispatcher.
//!
//! A guest CALL to 0x0005 is trapped by the machine and serviced here,
//! dispatching on the function number in C. Results land in A and in the
//! caller's FCB, exactly as a resident BDOS would leave them.
//!
//! Console input (functions 1 and 10) is cooperative: when the input ring
//! is empty the dispatcher returns `Waiting` without consuming anything,
//! the machine leaves PC on the CALL, and the same call replays on the
//! next step once the host has pushed keys.

use format_cpm_dsk::{DIR_ENTRIES, DirEntry, ENTRY_SIZE};
use intel_8080::Registers;

use crate::bus::CpmBus;
use crate::memory::Memory;

/// FCB offset of the extent byte.
const FCB_EXTENT: u16 = 12;
/// FCB offset of the record count.
const FCB_RECORD_COUNT: u16 = 15;
/// FCB offset of the allocation map.
const FCB_ALLOCATION: u16 = 16;
/// FCB offset of the current record (sequential I/O cursor).
const FCB_CURRENT_RECORD: u16 = 32;
/// Offset of the new name within a rename FCB.
const FCB_RENAME_TARGET: u16 = 16;

/// Outcome of a BDOS call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BdosAction {
    /// The call completed; the machine advances PC past the CALL.
    Continue,
    /// Input starvation; PC stays on the CALL and it replays next step.
    Waiting,
}

/// Service one BDOS call. Dispatch is on register C.
pub fn dispatch(regs: &mut Registers, bus: &mut CpmBus) -> BdosAction {
    match regs.c {
        1 => return console_input(regs, bus),
        2 => bus.console.push_output(regs.e),
        6 => direct_console(regs, bus),
        9 => print_string(regs, bus),
        10 => return read_console_buffer(regs, bus),
        11 => regs.a = bus.console.status(),
        13 => {
            bus.disk.reset_position();
            regs.a = 0;
        }
        14 => select_disk(regs, bus),
        15 => open_file(regs, bus),
        16 => close_file(regs, bus),
        17 => {
            bus.disk.search_index = 0;
            search(regs, bus);
        }
        18 => search(regs, bus),
        19 => delete_file(regs, bus),
        20 => read_sequential(regs, bus),
        21 => write_sequential(regs, bus),
        22 => make_file(regs, bus),
        23 => rename_file(regs, bus),
        25 => regs.a = bus.disk.current_disk(),
        26 => bus.disk.set_dma(regs.de()),
        _ => regs.a = 0xFF,
    }
    BdosAction::Continue
}

/// Function 1: Console Input.
fn console_input(regs: &mut Registers, bus: &mut CpmBus) -> BdosAction {
    match bus.console.read_input() {
        Some(byte) => {
            regs.a = byte;
            if bus.console.echo() {
                bus.console.push_output(byte);
            }
            bus.console.clear_waiting();
            BdosAction::Continue
        }
        None => {
            bus.console.set_waiting();
            BdosAction::Waiting
        }
    }
}

/// Function 6: Direct Console I/O.
fn direct_console(regs: &mut Registers, bus: &mut CpmBus) {
    match regs.e {
        0xFF => regs.a = bus.console.status(),
        0xFE => regs.a = bus.console.read_input().unwrap_or(0),
        byte => bus.console.push_output(byte),
    }
}

/// Function 9: Print String, memory at (DE) streamed until '$'.
fn print_string(regs: &mut Registers, bus: &mut CpmBus) {
    let mut addr = regs.de();
    for _ in 0..0x10000 {
        let byte = bus.memory.peek(addr);
        if byte == b'$' {
            break;
        }
        bus.console.push_output(byte);
        addr = addr.wrapping_add(1);
    }
}

/// Function 10: Read Console Buffer.
///
/// The buffer at (DE) is `max` at +0, the final count at +1, and the line
/// at +2 onward. Progress across cooperative re-entries is kept in the
/// console's `line_progress`, so a half-typed line survives starvation.
fn read_console_buffer(regs: &mut Registers, bus: &mut CpmBus) -> BdosAction {
    let buf = regs.de();
    let max = bus.memory.peek(buf) as usize;
    let mut count = usize::from(bus.console.line_progress.take().unwrap_or(0));

    loop {
        if count >= max {
            break;
        }
        let Some(byte) = bus.console.read_input() else {
            bus.console.line_progress = Some(count as u8);
            bus.console.set_waiting();
            return BdosAction::Waiting;
        };
        match byte {
            0x0D | 0x0A => {
                bus.console.push_output(0x0D);
                bus.memory.poke(buf.wrapping_add(1), count as u8);
                return BdosAction::Continue;
            }
            // Backspace / DEL: visible erase
            0x08 | 0x7F => {
                if count > 0 {
                    count -= 1;
                    bus.console.push_output(0x08);
                    bus.console.push_output(b' ');
                    bus.console.push_output(0x08);
                }
            }
            _ => {
                bus.memory.poke(buf.wrapping_add(2 + count as u16), byte);
                count += 1;
                bus.console.push_output(byte);
            }
        }
    }

    bus.memory.poke(buf.wrapping_add(1), count as u8);
    BdosAction::Continue
}

/// Function 14: Select Disk.
fn select_disk(regs: &mut Registers, bus: &mut CpmBus) {
    regs.a = if bus.disk.select(regs.e) { 0 } else { 0xFF };
}

/// Function 15: Open File.
fn open_file(regs: &mut Registers, bus: &mut CpmBus) {
    let fcb = regs.de();
    let (name, ext) = fcb_name(&bus.memory, fcb);
    let extent = bus.memory.peek(fcb.wrapping_add(FCB_EXTENT));

    let Some(index) = bus.disk.find_entry(&name, &ext, extent, 0) else {
        regs.a = 0xFF;
        return;
    };
    let entry = bus.disk.read_entry(index);

    // Hand-seeded entries may carry a zero record count; fall back to the
    // allocation map (eight records per block).
    let rc = if entry.record_count > 0 {
        entry.record_count
    } else {
        entry.allocation.iter().filter(|&&b| b != 0).count() as u8 * 8
    };

    bus.memory.poke(fcb.wrapping_add(FCB_RECORD_COUNT), rc);
    for (k, &block) in entry.allocation.iter().enumerate() {
        bus.memory
            .poke(fcb.wrapping_add(FCB_ALLOCATION + k as u16), block);
    }
    bus.memory.poke(fcb.wrapping_add(FCB_CURRENT_RECORD), 0);
    regs.a = 0;
}

/// Function 16: Close File, writing the FCB back over the directory entry.
fn close_file(regs: &mut Registers, bus: &mut CpmBus) {
    let fcb = regs.de();
    let (name, ext) = fcb_name(&bus.memory, fcb);
    let extent = bus.memory.peek(fcb.wrapping_add(FCB_EXTENT));

    let Some(index) = bus.disk.find_entry(&name, &ext, extent, 0) else {
        regs.a = 0xFF;
        return;
    };

    let bytes = bus.memory.copy_out(fcb, ENTRY_SIZE);
    let mut entry = DirEntry::from_bytes(&bytes);
    entry.user = 0;
    entry.name = name;
    entry.ext = ext;
    bus.disk.write_entry(index, &entry);
    regs.a = 0;
}

/// Functions 17/18: Search First / Search Next.
///
/// On a hit the 32-byte entry is copied into the DMA buffer at slot
/// `index mod 4` and A returns that slot, mirroring how a real BDOS
/// exposes the directory sector it just read.
fn search(regs: &mut Registers, bus: &mut CpmBus) {
    let fcb = regs.de();
    let (name, ext) = fcb_name(&bus.memory, fcb);

    for index in bus.disk.search_index..DIR_ENTRIES {
        let entry = bus.disk.read_entry(index);
        if !entry.looks_valid() || !entry.matches(&name, &ext) {
            continue;
        }

        let slot = index % 4;
        let dest = bus.disk.dma().wrapping_add((slot * ENTRY_SIZE) as u16);
        for (k, &byte) in entry.to_bytes().iter().enumerate() {
            bus.memory.poke(dest.wrapping_add(k as u16), byte);
        }
        regs.a = slot as u8;
        bus.disk.search_index = index + 1;
        return;
    }

    bus.disk.search_index = DIR_ENTRIES;
    regs.a = 0xFF;
}

/// Function 19: Delete File; every matching entry is marked deleted.
fn delete_file(regs: &mut Registers, bus: &mut CpmBus) {
    let fcb = regs.de();
    let (name, ext) = fcb_name(&bus.memory, fcb);

    let mut deleted_any = false;
    for index in 0..DIR_ENTRIES {
        let mut entry = bus.disk.read_entry(index);
        if entry.is_deleted() || !entry.matches(&name, &ext) {
            continue;
        }
        entry.user = 0xE5;
        bus.disk.write_entry(index, &entry);
        deleted_any = true;
    }
    regs.a = if deleted_any { 0 } else { 0xFF };
}

/// Function 20: Read Sequential.
fn read_sequential(regs: &mut Registers, bus: &mut CpmBus) {
    let fcb = regs.de();
    let cr = bus.memory.peek(fcb.wrapping_add(FCB_CURRENT_RECORD));
    let rc = bus.memory.peek(fcb.wrapping_add(FCB_RECORD_COUNT));

    if cr >= rc {
        regs.a = 1;
        return;
    }

    let block = bus
        .memory
        .peek(fcb.wrapping_add(FCB_ALLOCATION + u16::from(cr / 8)));
    bus.disk.set_track(block.wrapping_add(1));
    bus.disk.set_sector(cr % 8 + 1);
    let status = bus.disk.exec_read(&mut bus.memory);

    bus.memory
        .poke(fcb.wrapping_add(FCB_CURRENT_RECORD), cr.wrapping_add(1));
    regs.a = status;
}

/// Function 21: Write Sequential, with lazy block allocation.
fn write_sequential(regs: &mut Registers, bus: &mut CpmBus) {
    let fcb = regs.de();
    let cr = bus.memory.peek(fcb.wrapping_add(FCB_CURRENT_RECORD));
    let index = cr / 8;

    let alloc_addr = fcb.wrapping_add(FCB_ALLOCATION + u16::from(index));
    let mut block = bus.memory.peek(alloc_addr);
    if block == 0 {
        block = index + 1;
        bus.memory.poke(alloc_addr, block);
    }

    bus.disk.set_track(block.wrapping_add(1));
    bus.disk.set_sector(cr % 8 + 1);
    let status = bus.disk.exec_write(&bus.memory);

    let next = cr.wrapping_add(1);
    let rc = bus.memory.peek(fcb.wrapping_add(FCB_RECORD_COUNT));
    if next > rc {
        bus.memory.poke(fcb.wrapping_add(FCB_RECORD_COUNT), next);
    }
    bus.memory.poke(fcb.wrapping_add(FCB_CURRENT_RECORD), next);
    regs.a = status;
}

/// Function 22: Make File.
fn make_file(regs: &mut Registers, bus: &mut CpmBus) {
    let fcb = regs.de();
    let (name, ext) = fcb_name(&bus.memory, fcb);
    let extent = bus.memory.peek(fcb.wrapping_add(FCB_EXTENT));

    // Reuse an entry with the same name, else claim the first free slot.
    let slot = bus
        .disk
        .find_entry(&name, &ext, extent, 0)
        .or_else(|| bus.disk.find_free_slot());
    let Some(index) = slot else {
        regs.a = 0xFF;
        return;
    };

    let entry = DirEntry {
        user: 0,
        name,
        ext,
        extent,
        reserved: [0; 2],
        record_count: 0,
        allocation: [0; 16],
    };
    bus.disk.write_entry(index, &entry);

    // Reset the in-memory FCB to match the fresh entry.
    bus.memory.poke(fcb.wrapping_add(FCB_RECORD_COUNT), 0);
    for k in 0..16u16 {
        bus.memory.poke(fcb.wrapping_add(FCB_ALLOCATION + k), 0);
    }
    bus.memory.poke(fcb.wrapping_add(FCB_CURRENT_RECORD), 0);
    regs.a = 0;
}

/// Function 23: Rename File; old name at (DE), new name 16 bytes later.
fn rename_file(regs: &mut Registers, bus: &mut CpmBus) {
    let fcb = regs.de();
    let (old_name, old_ext) = fcb_name(&bus.memory, fcb);
    let (new_name, new_ext) = fcb_name(&bus.memory, fcb.wrapping_add(FCB_RENAME_TARGET));

    let found = (0..DIR_ENTRIES).find(|&i| {
        let entry = bus.disk.read_entry(i);
        !entry.is_deleted() && entry.matches(&old_name, &old_ext)
    });
    let Some(index) = found else {
        regs.a = 0xFF;
        return;
    };

    let mut entry = bus.disk.read_entry(index);
    entry.name = new_name;
    entry.ext = new_ext;
    bus.disk.write_entry(index, &entry);
    regs.a = 0;
}

/// Read the upper-cased name and extension fields of an FCB at `fcb`.
fn fcb_name(mem: &Memory, fcb: u16) -> ([u8; 8], [u8; 3]) {
    let mut name = [0u8; 8];
    for (k, slot) in name.iter_mut().enumerate() {
        *slot = mem.peek(fcb.wrapping_add(1 + k as u16)).to_ascii_uppercase();
    }
    let mut ext = [0u8; 3];
    for (k, slot) in ext.iter_mut().enumerate() {
        *slot = mem.peek(fcb.wrapping_add(9 + k as u16)).to_ascii_uppercase();
    }
    (name, ext)
}
