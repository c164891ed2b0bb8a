//! JSON-RPC control server for the CP/M machine.
//!
//! Exposes the emulator as a JSON-RPC 2.0 server over stdin/stdout so
//! scripts and agents can boot, load, step, and observe it headlessly.
//!
//! # Protocol
//!
//! Reads newline-delimited JSON-RPC 2.0 requests from stdin, writes
//! responses to stdout. Console output is buffered, never mirrored, so
//! the protocol stream stays clean.

#![allow(clippy::cast_possible_truncation)]

use std::io::{self, BufRead, Write};

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::config::CpmConfig;
use crate::console::render_host_byte;
use crate::machine::CpmMachine;

// ---------------------------------------------------------------------------
// JSON-RPC types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: JsonValue,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcResponse {
    fn success(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: JsonValue, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError { code, message }),
            id,
        }
    }
}

// ---------------------------------------------------------------------------
// RPC server
// ---------------------------------------------------------------------------

/// RPC server wrapping a headless machine instance.
pub struct RpcServer {
    machine: Option<CpmMachine>,
}

impl RpcServer {
    #[must_use]
    pub fn new() -> Self {
        Self { machine: None }
    }

    /// Run the server loop: read JSON-RPC from stdin, write responses to
    /// stdout.
    pub fn run(&mut self) {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut stdout = stdout.lock();

        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };

            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }

            let request: RpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    let resp =
                        RpcResponse::error(JsonValue::Null, -32700, format!("Parse error: {e}"));
                    let _ = writeln!(
                        stdout,
                        "{}",
                        serde_json::to_string(&resp).unwrap_or_default()
                    );
                    let _ = stdout.flush();
                    continue;
                }
            };

            if request.jsonrpc != "2.0" {
                let resp =
                    RpcResponse::error(request.id, -32600, "Invalid JSON-RPC version".to_string());
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::to_string(&resp).unwrap_or_default()
                );
                let _ = stdout.flush();
                continue;
            }

            let response = self.dispatch(&request.method, &request.params, request.id.clone());
            let _ = writeln!(
                stdout,
                "{}",
                serde_json::to_string(&response).unwrap_or_default()
            );
            let _ = stdout.flush();
        }
    }

    /// Dispatch a method call to the appropriate handler.
    fn dispatch(&mut self, method: &str, params: &JsonValue, id: JsonValue) -> RpcResponse {
        match method {
            "boot" => self.handle_boot(params, id),
            "reset" => self.handle_reset(id),
            "load_hex" => self.handle_load_hex(params, id),
            "load_com" => self.handle_load_com(params, id),
            "step" => self.handle_step(params, id),
            "run_steps" => self.handle_run_steps(params, id),
            "registers" => self.handle_registers(id),
            "read_memory" => self.handle_read_memory(params, id),
            "write_memory" => self.handle_write_memory(params, id),
            "put_char" => self.handle_put_char(params, id),
            "type_text" => self.handle_type_text(params, id),
            "read_output" => self.handle_read_output(id),
            "console_status" => self.handle_console_status(id),
            "set_echo" => self.handle_set_echo(params, id),
            "set_disk_dir" => self.handle_set_disk_dir(params, id),
            _ => RpcResponse::error(id, -32601, format!("Unknown method: {method}")),
        }
    }

    /// Ensure a machine exists, returning a mutable reference.
    fn require_machine(&mut self, id: &JsonValue) -> Result<&mut CpmMachine, RpcResponse> {
        match self.machine.as_mut() {
            Some(machine) => Ok(machine),
            None => Err(RpcResponse::error(
                id.clone(),
                -32000,
                "No machine instance. Call 'boot' first.".to_string(),
            )),
        }
    }

    // === Tool handlers ===

    fn handle_boot(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let mut config = CpmConfig::new();
        config.mirror_output = false;
        if let Some(dir) = params.get("disk_dir").and_then(|v| v.as_str()) {
            config.disk_dir = dir.into();
        }
        self.machine = Some(CpmMachine::new(&config));
        RpcResponse::success(id, serde_json::json!({"status": "ok"}))
    }

    fn handle_reset(&mut self, id: JsonValue) -> RpcResponse {
        match self.require_machine(&id) {
            Ok(machine) => {
                let dump = machine.reset();
                RpcResponse::success(id, serde_json::json!({"dump": dump}))
            }
            Err(e) => e,
        }
    }

    fn handle_load_hex(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let origin = params.get("origin").and_then(JsonValue::as_u64).unwrap_or(0) as u16;
        let Some(hex) = params.get("hex").and_then(|v| v.as_str()) else {
            return RpcResponse::error(id, -32602, "Missing 'hex' parameter".to_string());
        };
        let hex = hex.to_string();
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        match machine.load(&hex, origin) {
            Ok(()) => RpcResponse::success(id, serde_json::json!({"status": "ok"})),
            Err(e) => RpcResponse::error(id, -32602, e),
        }
    }

    fn handle_load_com(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let origin = params
            .get("origin")
            .and_then(JsonValue::as_u64)
            .unwrap_or(0x0100) as u16;

        let data = if let Some(b64) = params.get("data").and_then(|v| v.as_str()) {
            match base64::engine::general_purpose::STANDARD.decode(b64) {
                Ok(d) => d,
                Err(e) => return RpcResponse::error(id, -32602, format!("Invalid base64: {e}")),
            }
        } else if let Some(path) = params.get("path").and_then(|v| v.as_str()) {
            match std::fs::read(path) {
                Ok(d) => d,
                Err(e) => return RpcResponse::error(id, -32602, format!("Read failed: {e}")),
            }
        } else {
            return RpcResponse::error(id, -32602, "Need 'data' or 'path'".to_string());
        };

        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        machine.bus_mut().memory.copy_in(origin, &data);
        machine.set_pc(origin);
        RpcResponse::success(
            id,
            serde_json::json!({"status": "ok", "bytes": data.len(), "origin": origin}),
        )
    }

    fn handle_step(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let count = params.get("count").and_then(JsonValue::as_u64).unwrap_or(1);
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };

        let mut dump = machine.register_dump();
        for _ in 0..count {
            match machine.step() {
                Ok(d) => dump = d,
                Err(e) => return RpcResponse::error(id, -32001, e),
            }
            if machine.is_waiting_for_input() {
                break;
            }
        }
        RpcResponse::success(
            id,
            serde_json::json!({
                "dump": dump,
                "halted": machine.is_halted(),
                "waiting": machine.is_waiting_for_input(),
            }),
        )
    }

    fn handle_run_steps(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let max = params
            .get("max")
            .and_then(JsonValue::as_u64)
            .unwrap_or(100_000);
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };

        let mut steps = 0u64;
        let reason = loop {
            if machine.is_halted() {
                break "halted";
            }
            if machine.is_waiting_for_input() {
                break "waiting";
            }
            if steps >= max {
                break "budget";
            }
            if let Err(e) = machine.step() {
                return RpcResponse::error(id, -32001, e);
            }
            steps += 1;
        };

        RpcResponse::success(
            id,
            serde_json::json!({
                "steps": steps,
                "reason": reason,
                "dump": machine.register_dump(),
            }),
        )
    }

    fn handle_registers(&mut self, id: JsonValue) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        let r = &machine.cpu().regs;
        RpcResponse::success(
            id,
            serde_json::json!({
                "pc": r.pc, "sp": r.sp,
                "a": r.a, "f": r.f,
                "b": r.b, "c": r.c, "d": r.d, "e": r.e, "h": r.h, "l": r.l,
                "ie": r.ie, "halted": r.halted,
                "address_bus": machine.current_address_bus(),
            }),
        )
    }

    fn handle_read_memory(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let addr = params.get("addr").and_then(JsonValue::as_u64).unwrap_or(0) as u16;
        let len = params
            .get("len")
            .and_then(JsonValue::as_u64)
            .unwrap_or(128)
            .min(0x10000) as usize;
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        let bytes = machine.bus().memory.copy_out(addr, len);
        let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
        RpcResponse::success(id, serde_json::json!({"data": b64}))
    }

    fn handle_write_memory(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let addr = params.get("addr").and_then(JsonValue::as_u64).unwrap_or(0) as u16;
        let Some(b64) = params.get("data").and_then(|v| v.as_str()) else {
            return RpcResponse::error(id, -32602, "Missing 'data' parameter".to_string());
        };
        let bytes = match base64::engine::general_purpose::STANDARD.decode(b64) {
            Ok(d) => d,
            Err(e) => return RpcResponse::error(id, -32602, format!("Invalid base64: {e}")),
        };
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        machine.bus_mut().memory.copy_in(addr, &bytes);
        RpcResponse::success(id, serde_json::json!({"status": "ok", "bytes": bytes.len()}))
    }

    fn handle_put_char(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let Some(byte) = params.get("byte").and_then(JsonValue::as_u64) else {
            return RpcResponse::error(id, -32602, "Missing 'byte' parameter".to_string());
        };
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        machine.put_char(byte as u8);
        RpcResponse::success(id, serde_json::json!({"status": "ok"}))
    }

    fn handle_type_text(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let Some(text) = params.get("text").and_then(|v| v.as_str()) else {
            return RpcResponse::error(id, -32602, "Missing 'text' parameter".to_string());
        };
        let text = text.to_string();
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        for byte in text.bytes() {
            machine.put_char(byte);
        }
        RpcResponse::success(id, serde_json::json!({"status": "ok", "bytes": text.len()}))
    }

    fn handle_read_output(&mut self, id: JsonValue) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        let bytes = machine.bus_mut().console.take_output();
        let text: String = bytes.iter().map(|&b| render_host_byte(b)).collect();
        let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
        RpcResponse::success(id, serde_json::json!({"text": text, "bytes": b64}))
    }

    fn handle_console_status(&mut self, id: JsonValue) -> RpcResponse {
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        RpcResponse::success(
            id,
            serde_json::json!({
                "status": machine.console_status(),
                "waiting": machine.is_waiting_for_input(),
            }),
        )
    }

    fn handle_set_echo(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let enable = params
            .get("enable")
            .and_then(JsonValue::as_bool)
            .unwrap_or(true);
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        machine.set_echo(enable);
        RpcResponse::success(id, serde_json::json!({"status": "ok"}))
    }

    fn handle_set_disk_dir(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let Some(path) = params.get("path").and_then(|v| v.as_str()) else {
            return RpcResponse::error(id, -32602, "Missing 'path' parameter".to_string());
        };
        let path = path.to_string();
        let machine = match self.require_machine(&id) {
            Ok(m) => m,
            Err(e) => return e,
        };
        machine.set_disk_base_path(&path);
        RpcResponse::success(id, serde_json::json!({"status": "ok"}))
    }
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new()
    }
}
