//! CP/M machine emulator binary.
//!
//! Runs a guest program headlessly: load a COM file (or hex), step until
//! the guest halts, starves for console input, or the step budget runs
//! out, then print a final register dump. `--rpc` switches to the
//! JSON-RPC control server on stdin/stdout.

use std::path::PathBuf;
use std::process;

use emu_cpm::{CpmConfig, CpmMachine};

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

struct CliArgs {
    com_path: Option<PathBuf>,
    hex_path: Option<PathBuf>,
    org: u16,
    disk_dir: Option<PathBuf>,
    steps: u64,
    input: Option<String>,
    rpc: bool,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        com_path: None,
        hex_path: None,
        org: 0x0100,
        disk_dir: None,
        steps: 1_000_000,
        input: None,
        rpc: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--com" => {
                i += 1;
                cli.com_path = args.get(i).map(PathBuf::from);
            }
            "--hex" => {
                i += 1;
                cli.hex_path = args.get(i).map(PathBuf::from);
            }
            "--org" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    let s = s.trim_start_matches("0x").trim_start_matches("0X");
                    match u16::from_str_radix(s, 16) {
                        Ok(org) => cli.org = org,
                        Err(_) => {
                            eprintln!("Invalid --org value");
                            process::exit(2);
                        }
                    }
                }
            }
            "--disk-dir" => {
                i += 1;
                cli.disk_dir = args.get(i).map(PathBuf::from);
            }
            "--steps" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    match s.parse() {
                        Ok(n) => cli.steps = n,
                        Err(_) => {
                            eprintln!("Invalid --steps value");
                            process::exit(2);
                        }
                    }
                }
            }
            "--input" => {
                i += 1;
                cli.input = args.get(i).cloned();
            }
            "--rpc" => {
                cli.rpc = true;
            }
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                process::exit(2);
            }
        }
        i += 1;
    }

    cli
}

fn print_usage() {
    eprintln!("Usage: emu-cpm [options]");
    eprintln!();
    eprintln!("  --com <file>      Load a COM file at the origin and run it");
    eprintln!("  --hex <file>      Load a file of hex digit pairs at the origin");
    eprintln!("  --org <addr>      Load origin in hex (default 0100)");
    eprintln!("  --disk-dir <dir>  Directory holding A.DSK/B.DSK");
    eprintln!("  --steps <n>       Step budget (default 1000000)");
    eprintln!("  --input <text>    Pre-filled console input");
    eprintln!("  --rpc             Run the JSON-RPC control server");
}

fn main() {
    let cli = parse_args();

    if cli.rpc {
        #[cfg(feature = "rpc")]
        {
            emu_cpm::rpc::RpcServer::new().run();
            return;
        }
        #[cfg(not(feature = "rpc"))]
        {
            eprintln!("This build does not include the rpc feature.");
            process::exit(2);
        }
    }

    let mut config = CpmConfig::new();
    if let Some(dir) = cli.disk_dir {
        config.disk_dir = dir;
    }
    let mut machine = CpmMachine::new(&config);

    if let Some(text) = &cli.input {
        for byte in text.bytes() {
            machine.put_char(byte);
        }
    }

    if let Some(path) = &cli.com_path {
        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("Failed to read {}: {e}", path.display());
                process::exit(1);
            }
        };
        machine.bus_mut().memory.copy_in(cli.org, &data);
        machine.set_pc(cli.org);
    } else if let Some(path) = &cli.hex_path {
        let hex = match std::fs::read_to_string(path) {
            Ok(h) => h,
            Err(e) => {
                eprintln!("Failed to read {}: {e}", path.display());
                process::exit(1);
            }
        };
        if let Err(e) = machine.load(&hex, cli.org) {
            eprintln!("Load failed: {e}");
            process::exit(1);
        }
        machine.set_pc(cli.org);
    } else {
        print_usage();
        process::exit(2);
    }

    let mut steps = 0u64;
    while steps < cli.steps {
        if machine.is_halted() {
            break;
        }
        if machine.is_waiting_for_input() {
            eprintln!("Guest is waiting for console input; stopping.");
            break;
        }
        if let Err(e) = machine.step() {
            eprintln!("{e}");
            process::exit(1);
        }
        steps += 1;
    }

    println!();
    print!("{}", machine.register_dump());
}
