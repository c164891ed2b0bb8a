//! Machine-level tests: loader, stepper, reset, interrupts, the port
//! BIOS, and image persistence.

use emu_cpm::{CpmConfig, CpmMachine};

fn make_machine() -> (CpmMachine, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = CpmConfig {
        disk_dir: dir.path().to_path_buf(),
        mirror_output: false,
    };
    (CpmMachine::new(&config), dir)
}

fn run_to_halt(machine: &mut CpmMachine, budget: u32) {
    let mut steps = 0;
    while !machine.is_halted() && steps < budget {
        machine.step().expect("program ok");
        steps += 1;
    }
    assert!(machine.is_halted(), "program did not halt in {budget} steps");
}

#[test]
fn register_move_scenario() {
    let (mut machine, _dir) = make_machine();
    machine.load("3E2A477876", 0x0000).expect("program");
    run_to_halt(&mut machine, 10);

    let regs = &machine.cpu().regs;
    assert_eq!(regs.a, 0x2A);
    assert_eq!(regs.b, 0x2A);
    assert_eq!(machine.current_address(), 0x0004);
}

#[test]
fn conditional_branch_scenario() {
    let (mut machine, _dir) = make_machine();
    machine.load("0602" , 0x0100).expect("MVI B,2");
    machine.load("05C2020176", 0x0102).expect("loop body");
    machine.set_pc(0x0100);
    run_to_halt(&mut machine, 20);

    assert_eq!(machine.cpu().regs.b, 0);
    assert_eq!(machine.current_address(), 0x0106);
}

#[test]
fn stack_scenario() {
    let (mut machine, _dir) = make_machine();
    // LXI SP,1000; LXI H,BEEF; PUSH H; LXI H,0000; POP H; HLT
    machine
        .load("31001021EFBEE5210000E176", 0x0000)
        .expect("program");
    run_to_halt(&mut machine, 10);

    let regs = &machine.cpu().regs;
    assert_eq!(regs.h, 0xBE);
    assert_eq!(regs.l, 0xEF);
    assert_eq!(regs.sp, 0x1000);
    assert_eq!(machine.bus().memory.peek(0x0FFE), 0xEF);
    assert_eq!(machine.bus().memory.peek(0x0FFF), 0xBE);
}

#[test]
fn address_bus_witness_tracks_guest_traffic() {
    let (mut machine, _dir) = make_machine();
    assert_eq!(machine.current_address_bus(), 0);

    // MVI A,77; STA 0x1234; HLT
    machine.load("3E7732341276", 0x0000).expect("program");
    machine.step().expect("MVI A,77");
    machine.step().expect("STA");
    assert_eq!(machine.current_address_bus(), 0x1234);
}

#[test]
fn instruction_window_shows_before_and_after() {
    let (mut machine, _dir) = make_machine();
    machine.load("C3100076", 0x0000).expect("program");
    machine.load("3E0176", 0x0010).expect("target");
    machine.step().expect("JMP");

    let window = machine.instructions();
    assert_eq!(&window[..3], &[0xC3, 0x10, 0x00], "bytes at the old PC");
    assert_eq!(&window[3..], &[0x3E, 0x01, 0x76], "bytes at the new PC");
}

#[test]
fn interrupt_delivery_between_steps() {
    let (mut machine, _dir) = make_machine();
    // LXI SP,2000; EI; NOP; NOP ... loop of NOPs
    machine.load("310020FB00000000", 0x0000).expect("program");
    machine.load("3E4276", 0x0038).expect("RST 7 vector");

    machine.step().expect("LXI SP");
    machine.trigger_interrupt(0xFF); // RST 7
    assert!(!machine.check_interrupt(), "masked until EI");
    machine.step().expect("EI");
    assert!(machine.check_interrupt());

    machine.process_interrupt().expect("deliver RST 7");
    assert_eq!(machine.current_address(), 0x0038);
    run_to_halt(&mut machine, 10);
    assert_eq!(machine.cpu().regs.a, 0x42);
}

#[test]
fn port_bios_console_roundtrip() {
    let (mut machine, _dir) = make_machine();
    machine.put_char(b'A');

    // IN F0 (status); IN F1 (data); OUT F2; HLT
    machine.load("DBF0DBF1D3F276", 0x0000).expect("program");
    machine.step().expect("IN F0");
    assert_eq!(machine.cpu().regs.a, 0xFF);
    machine.step().expect("IN F1");
    assert_eq!(machine.cpu().regs.a, b'A');
    machine.step().expect("OUT F2");
    assert_eq!(machine.get_char(), b'A');
}

#[test]
fn port_bios_sector_write_creates_the_image_file() {
    let (mut machine, dir) = make_machine();

    // Select B:, track 0, sector 1, DMA 0080, write.
    // MVI A,01; OUT 10; MVI A,00; OUT 11; MVI A,01; OUT 12;
    // MVI A,80; OUT 13; MVI A,00; OUT 14; MVI A,01; OUT 15; HLT
    machine
        .load("3E01D3103E00D3113E01D3123E80D3133E00D3143E01D31576", 0x0000)
        .expect("program");
    machine.bus_mut().memory.poke(0x0080, 0x99);
    run_to_halt(&mut machine, 20);

    let b_path = dir.path().join("B.DSK");
    assert!(b_path.exists(), "sector write persists the selected drive");
    let bytes = std::fs::read(&b_path).expect("image readable");
    assert_eq!(bytes.len(), 256_256);
    assert_eq!(bytes[0], 0x99);
}

#[test]
fn saved_image_reloads_byte_identical() {
    let (machine, dir) = make_machine();
    let before = machine.bus().disk.image_bytes(0).to_vec();

    let config = CpmConfig {
        disk_dir: dir.path().to_path_buf(),
        mirror_output: false,
    };
    let machine2 = CpmMachine::new(&config);
    assert_eq!(machine2.bus().disk.image_bytes(0), &before[..]);
}

#[test]
fn set_disk_base_path_reloads_drives() {
    let (mut machine, _dir) = make_machine();
    let other = tempfile::tempdir().expect("tempdir");

    machine
        .set_disk_base_path(other.path().to_str().expect("utf8 path"));
    // The new location had no images, so drive A was re-seeded there.
    assert!(other.path().join("A.DSK").exists());
}

#[test]
fn run_performs_two_steps() {
    let (mut machine, _dir) = make_machine();
    machine.load("3E010601", 0x0000).expect("program");
    machine.run().expect("two steps");
    assert_eq!(machine.cpu().regs.a, 0x01);
    assert_eq!(machine.cpu().regs.b, 0x01);
    assert_eq!(machine.current_address(), 0x0004);
}
