//! CP/M 2.2 machine emulator on the Intel 8080.
//!
//! The machine couples an 8080 core to 64 KiB of RAM, a console with ring
//! buffers, and a two-drive single-density floppy subsystem. CP/M guests
//! run without a hosted BDOS binary: calls to 0x0005 are trapped and
//! serviced natively, and a small port-level BIOS covers console and raw
//! sector I/O.

mod bdos;
mod bootstrap;
mod bus;
mod config;
mod console;
mod disk;
mod machine;
mod memory;
#[cfg(feature = "rpc")]
pub mod rpc;

pub use bdos::BdosAction;
pub use bus::CpmBus;
pub use config::CpmConfig;
pub use console::Console;
pub use disk::DiskController;
pub use machine::CpmMachine;
pub use memory::Memory;
