//! Per-client protocol handling.
//!
//! One connected client at a time; any protocol violation, truncation, or
//! socket failure ends the session and the caller goes back to `accept`.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ledgrid_hal::{KvStore, OtaUpdater, StripDriver};

use crate::layout::LayoutError;
use crate::output::PixelFormat;
use crate::server::protocol::{self, CmdStatus, Command, Header};
use crate::server::{
    lock_state, ServerState, SessionConfig, ShaderSource, DEFAULT_SHADER_KEY,
};
use crate::vm::{Program, Runtime, MAX_BYTECODE_BLOB};

/// Serve one client until it disconnects or violates the protocol.
pub(super) fn run_client<D, K, O>(
    mut stream: TcpStream,
    shared: &Arc<Mutex<ServerState<D>>>,
    rx_buffer: &mut [u8],
    kv: &mut K,
    ota: &mut O,
    config: SessionConfig,
) where
    D: StripDriver,
    K: KvStore,
    O: OtaUpdater,
{
    loop {
        let mut header_bytes = [0u8; protocol::HEADER_LEN];
        if stream.read_exact(&mut header_bytes).is_err() {
            return;
        }
        let Some(header) = Header::parse(&header_bytes) else {
            log::warn!("invalid magic from client");
            return;
        };

        let keep_going = match header.version {
            protocol::PROTOCOL_V1 | protocol::PROTOCOL_V2 => {
                handle_frame_message(&mut stream, shared, rx_buffer, config, header)
            }
            protocol::PROTOCOL_V3 => {
                handle_v3_message(&mut stream, shared, rx_buffer, kv, ota, config, header)
            }
            other => {
                log::warn!("unsupported protocol version: {other}");
                false
            }
        };
        if !keep_going {
            return;
        }
    }
}

/// v1/v2: one streamed pixel frame, optionally remapped, pushed straight
/// to the output pipeline. v2 additionally acknowledges with one byte.
fn handle_frame_message<D: StripDriver>(
    stream: &mut TcpStream,
    shared: &Arc<Mutex<ServerState<D>>>,
    rx_buffer: &mut [u8],
    config: SessionConfig,
    header: Header,
) -> bool {
    let Some(format) = PixelFormat::from_wire(header.kind) else {
        log::warn!("invalid frame pixel format: {}", header.kind);
        return false;
    };
    let bytes_per_pixel = format.bytes_per_pixel();
    let Some(payload_len) = (header.count as usize).checked_mul(bytes_per_pixel) else {
        return false;
    };
    if payload_len > rx_buffer.len() {
        if !drain_bytes(stream, payload_len) {
            return false;
        }
        log::warn!("frame payload too large: {payload_len}");
        return false;
    }
    if stream.read_exact(&mut rx_buffer[..payload_len]).is_err() {
        return false;
    }

    {
        let mut state = lock_state(shared);
        if header.count != state.led_count {
            log::warn!(
                "pixel count mismatch: expected={} got={}",
                state.led_count,
                header.count
            );
            return false;
        }
        if let Err(err) = blit_frame(
            &mut state,
            &rx_buffer[..payload_len],
            bytes_per_pixel,
            config.remap_logical_frames,
        ) {
            log::warn!("frame blit failed: {err:?}");
            return false;
        }

        let ServerState {
            frame_buffer,
            output,
            ..
        } = &mut *state;
        if let Err(err) = output.push_frame(&frame_buffer[..payload_len], format, bytes_per_pixel)
        {
            log::warn!("frame output failed: {err:?}");
            return false;
        }
    }

    if header.version == protocol::PROTOCOL_V2 && stream.write_all(&[protocol::ACK]).is_err() {
        return false;
    }
    true
}

/// Copy the received frame into the state's frame buffer, remapping each
/// logical pixel onto its physical index when configured.
fn blit_frame<D: StripDriver>(
    state: &mut ServerState<D>,
    payload: &[u8],
    bytes_per_pixel: usize,
    remap: bool,
) -> Result<(), LayoutError> {
    if !remap {
        state.frame_buffer[..payload.len()].copy_from_slice(payload);
        return Ok(());
    }

    for logical in 0..state.led_count {
        let mapped = state.layout.map_logical_linear(logical)?;
        let src = logical as usize * bytes_per_pixel;
        let dst = mapped.global as usize * bytes_per_pixel;
        state.frame_buffer[dst..dst + bytes_per_pixel]
            .copy_from_slice(&payload[src..src + bytes_per_pixel]);
    }
    Ok(())
}

/// v3: read (or stream) the payload, dispatch the command, reply with
/// `cmd | 0x80` plus a status byte.
fn handle_v3_message<D, K, O>(
    stream: &mut TcpStream,
    shared: &Arc<Mutex<ServerState<D>>>,
    rx_buffer: &mut [u8],
    kv: &mut K,
    ota: &mut O,
    config: SessionConfig,
    header: Header,
) -> bool
where
    D: StripDriver,
    K: KvStore,
    O: OtaUpdater,
{
    let payload_len = header.count as usize;
    let response_type = header.kind | protocol::RESPONSE_FLAG;

    // Firmware images exceed any buffer; they stream straight into the
    // OTA sink without touching the server state.
    if Command::from_wire(header.kind) == Some(Command::UploadFirmware) {
        let status = handle_firmware_upload(stream, rx_buffer, ota, payload_len);
        if !send_v3_response(stream, response_type, status, &[]) {
            return false;
        }
        if status == CmdStatus::Ok {
            thread::sleep(Duration::from_millis(200));
            ota.reboot();
            return false;
        }
        return true;
    }

    if payload_len > rx_buffer.len() {
        if !drain_bytes(stream, payload_len) {
            return false;
        }
        return send_v3_response(stream, response_type, CmdStatus::TooLarge, &[]);
    }
    if payload_len > 0 && stream.read_exact(&mut rx_buffer[..payload_len]).is_err() {
        return false;
    }
    let payload = &rx_buffer[..payload_len];

    let mut response_payload = [0u8; protocol::QUERY_PAYLOAD_LEN];
    let mut response_len = 0usize;
    let status = match Command::from_wire(header.kind) {
        Some(Command::UploadBytecode) => handle_upload(shared, payload),
        Some(Command::ActivateShader) => {
            if payload.is_empty() {
                handle_activate(shared)
            } else {
                CmdStatus::InvalidArg
            }
        }
        Some(Command::SetDefaultShader) => handle_set_default(shared, kv, payload),
        Some(Command::ClearDefaultShader) => handle_clear_default(shared, kv, payload),
        Some(Command::QueryDefaultShader) => {
            handle_query(shared, payload, &mut response_payload, &mut response_len)
        }
        Some(Command::ActivateNativeShader) => {
            if payload.is_empty() {
                handle_activate_native(shared, config)
            } else {
                CmdStatus::InvalidArg
            }
        }
        Some(Command::StopShader) => {
            if payload.is_empty() {
                handle_stop(shared)
            } else {
                CmdStatus::InvalidArg
            }
        }
        Some(Command::UploadFirmware) | None => CmdStatus::UnsupportedCmd,
    };

    send_v3_response(stream, response_type, status, &response_payload[..response_len])
}

fn handle_upload<D: StripDriver>(
    shared: &Arc<Mutex<ServerState<D>>>,
    payload: &[u8],
) -> CmdStatus {
    if payload.is_empty() {
        return CmdStatus::InvalidArg;
    }
    if payload.len() > MAX_BYTECODE_BLOB {
        return CmdStatus::TooLarge;
    }

    let mut state = lock_state(shared);
    match Program::load(payload) {
        Ok(program) => {
            state.program = Some(program);
            state.runtime = None;
            state.deactivate_shader();
            CmdStatus::Ok
        }
        Err(err) => {
            log::warn!("bytecode load failed: {}", err.as_str());
            state.program = None;
            state.runtime = None;
            state.deactivate_shader();
            CmdStatus::VmError
        }
    }
}

fn handle_activate<D: StripDriver>(shared: &Arc<Mutex<ServerState<D>>>) -> CmdStatus {
    let mut state = lock_state(shared);
    let Some(program) = state.program.as_ref() else {
        return CmdStatus::NotReady;
    };
    match Runtime::new(program, state.layout.width, state.layout.height) {
        Ok(runtime) => {
            state.runtime = Some(runtime);
            state.shader_source = ShaderSource::Bytecode;
            state.shader_active = true;
            CmdStatus::Ok
        }
        Err(err) => {
            log::warn!("shader activate failed: {}", err.as_str());
            state.shader_active = false;
            CmdStatus::VmError
        }
    }
}

fn handle_set_default<D: StripDriver, K: KvStore>(
    shared: &Arc<Mutex<ServerState<D>>>,
    kv: &mut K,
    payload: &[u8],
) -> CmdStatus {
    if !payload.is_empty() {
        return CmdStatus::InvalidArg;
    }

    let mut state = lock_state(shared);
    let Some(program) = state.program.as_ref() else {
        return CmdStatus::NotReady;
    };
    let persisted = kv
        .set_blob(DEFAULT_SHADER_KEY, program.blob())
        .and_then(|()| kv.commit());
    if let Err(err) = persisted {
        log::warn!("default shader persist failed: {err:?}");
        return CmdStatus::Internal;
    }

    state.default_shader_persisted = true;
    state.default_shader_faulted = false;
    CmdStatus::Ok
}

fn handle_clear_default<D: StripDriver, K: KvStore>(
    shared: &Arc<Mutex<ServerState<D>>>,
    kv: &mut K,
    payload: &[u8],
) -> CmdStatus {
    if !payload.is_empty() {
        return CmdStatus::InvalidArg;
    }

    let cleared = kv
        .erase(DEFAULT_SHADER_KEY)
        .and_then(|_| kv.commit());
    if let Err(err) = cleared {
        log::warn!("default shader clear failed: {err:?}");
        return CmdStatus::Internal;
    }

    let mut state = lock_state(shared);
    state.default_shader_persisted = false;
    state.default_shader_faulted = false;
    CmdStatus::Ok
}

fn handle_query<D: StripDriver>(
    shared: &Arc<Mutex<ServerState<D>>>,
    payload: &[u8],
    response: &mut [u8; protocol::QUERY_PAYLOAD_LEN],
    response_len: &mut usize,
) -> CmdStatus {
    if !payload.is_empty() {
        return CmdStatus::InvalidArg;
    }

    let state = lock_state(shared);
    let blob_len = state
        .program
        .as_ref()
        .map_or(0, |program| program.blob().len() as u32);
    response[0] = u8::from(state.default_shader_persisted);
    response[1] = u8::from(state.program.is_some());
    response[2] = u8::from(state.shader_active);
    response[3] = u8::from(state.default_shader_faulted);
    response[4..8].copy_from_slice(&blob_len.to_be_bytes());
    response[8..12].copy_from_slice(&state.slow_frames.to_be_bytes());
    response[12..16].copy_from_slice(&state.last_slow_ms.to_be_bytes());
    response[16..20].copy_from_slice(&state.frame_count.to_be_bytes());
    *response_len = protocol::QUERY_PAYLOAD_LEN;
    CmdStatus::Ok
}

fn handle_activate_native<D: StripDriver>(
    shared: &Arc<Mutex<ServerState<D>>>,
    config: SessionConfig,
) -> CmdStatus {
    let Some(shader) = config.native_shaders.first() else {
        return CmdStatus::NotReady;
    };

    let mut state = lock_state(shared);
    state.selected_native = Some(*shader);
    state.shader_source = ShaderSource::Native;
    state.shader_active = true;
    CmdStatus::Ok
}

fn handle_stop<D: StripDriver>(shared: &Arc<Mutex<ServerState<D>>>) -> CmdStatus {
    let mut state = lock_state(shared);
    match state.stop_shader() {
        Ok(()) => CmdStatus::Ok,
        Err(err) => {
            log::warn!("stop shader blackout failed: {err:?}");
            CmdStatus::Internal
        }
    }
}

/// Stream a firmware image from the socket into the OTA sink. On failure
/// the remaining payload is drained so the session can answer and survive.
fn handle_firmware_upload<O: OtaUpdater>(
    stream: &mut TcpStream,
    rx_buffer: &mut [u8],
    ota: &mut O,
    payload_len: usize,
) -> CmdStatus {
    if payload_len == 0 {
        return CmdStatus::InvalidArg;
    }

    let Some(capacity) = ota.next_image_capacity() else {
        let _ = drain_bytes(stream, payload_len);
        return CmdStatus::Internal;
    };
    if payload_len > capacity {
        let _ = drain_bytes(stream, payload_len);
        log::warn!("firmware payload too large: {payload_len} > {capacity}");
        return CmdStatus::TooLarge;
    }
    if let Err(err) = ota.begin(payload_len) {
        let _ = drain_bytes(stream, payload_len);
        log::warn!("firmware update begin failed: {err:?}");
        return CmdStatus::Internal;
    }

    let mut remaining = payload_len;
    while remaining > 0 {
        let chunk_len = remaining.min(rx_buffer.len());
        if stream.read_exact(&mut rx_buffer[..chunk_len]).is_err() {
            ota.abort();
            return CmdStatus::Internal;
        }
        if let Err(err) = ota.write(&rx_buffer[..chunk_len]) {
            ota.abort();
            if remaining > chunk_len {
                let _ = drain_bytes(stream, remaining - chunk_len);
            }
            log::warn!("firmware write failed: {err:?}");
            return CmdStatus::Internal;
        }
        remaining -= chunk_len;
    }

    if let Err(err) = ota.finish() {
        log::warn!("firmware finalize failed: {err:?}");
        return CmdStatus::Internal;
    }

    log::info!("firmware upload complete ({payload_len} bytes), rebooting into new image");
    CmdStatus::Ok
}

fn send_v3_response(
    stream: &mut TcpStream,
    response_type: u8,
    status: CmdStatus,
    payload: &[u8],
) -> bool {
    let header = protocol::encode_v3_response_header(response_type, payload.len() as u32);
    if stream.write_all(&header).is_err() {
        return false;
    }
    if stream.write_all(&[status.wire()]).is_err() {
        return false;
    }
    if !payload.is_empty() && stream.write_all(payload).is_err() {
        return false;
    }
    true
}

/// Read and discard `len` payload bytes after an over-large announcement.
fn drain_bytes(stream: &mut TcpStream, len: usize) -> bool {
    let mut scratch = [0u8; 256];
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(scratch.len());
        match stream.read(&mut scratch[..chunk]) {
            Ok(0) => return false,
            Ok(read) => remaining -= read,
            Err(ref err) if err.kind() == ErrorKind::Interrupted => {}
            Err(_) => return false,
        }
    }
    true
}
