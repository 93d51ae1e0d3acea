//! Line-oriented diagnostic console.
//!
//! A second single-client TCP listener for humans: list and activate the
//! compiled-in native shaders, stop whatever is running, and dump the
//! controller status. Plain lines in, plain lines out.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ledgrid_hal::StripDriver;

use crate::server::{lock_state, ServerState, SessionConfig, ShaderSource};

/// Default diagnostic console port.
pub const DEFAULT_CONSOLE_PORT: u16 = 2323;

const PROMPT: &[u8] = b"> ";

pub(crate) fn run_console_loop<D: StripDriver>(
    listener: TcpListener,
    shared: Arc<Mutex<ServerState<D>>>,
    config: SessionConfig,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                log::info!("console client connected: {peer}");
                let _ = serve_console_client(stream, &shared, config);
                log::info!("console client disconnected");
            }
            Err(err) => {
                log::warn!("console accept failed: {err}");
                thread::sleep(Duration::from_millis(200));
            }
        }
    }
}

fn serve_console_client<D: StripDriver>(
    stream: TcpStream,
    shared: &Arc<Mutex<ServerState<D>>>,
    config: SessionConfig,
) -> std::io::Result<()> {
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    writer.write_all(b"ledgrid console, 'help' for commands\r\n")?;
    writer.write_all(PROMPT)?;

    for line in reader.lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("");
        let argument = parts.next().unwrap_or("");

        match command {
            "" => {}
            "help" => {
                writer.write_all(
                    b"commands:\r\n\
                      \x20 ls            list native shaders\r\n\
                      \x20 run <name>    activate a native shader\r\n\
                      \x20 stop          deactivate and blank the panel\r\n\
                      \x20 top           controller status\r\n\
                      \x20 quit          close this session\r\n",
                )?;
            }
            "ls" => {
                if config.native_shaders.is_empty() {
                    writer.write_all(b"(no native shaders registered)\r\n")?;
                }
                for shader in config.native_shaders {
                    writer.write_all(shader.name.as_bytes())?;
                    writer.write_all(b"\r\n")?;
                }
            }
            "run" => {
                let response = run_native_shader(shared, config, argument);
                writer.write_all(response.as_bytes())?;
            }
            "stop" => {
                let stopped = lock_state(shared).stop_shader();
                match stopped {
                    Ok(()) => writer.write_all(b"stopped\r\n")?,
                    Err(err) => {
                        log::warn!("console stop failed: {err:?}");
                        writer.write_all(b"error: output failure\r\n")?;
                    }
                }
            }
            "top" => {
                let report = status_report(shared);
                writer.write_all(report.as_bytes())?;
            }
            "quit" => {
                writer.write_all(b"bye\r\n")?;
                return Ok(());
            }
            _ => {
                writer.write_all(b"unknown command\r\n")?;
            }
        }
        writer.write_all(PROMPT)?;
    }
    Ok(())
}

fn run_native_shader<D: StripDriver>(
    shared: &Arc<Mutex<ServerState<D>>>,
    config: SessionConfig,
    name: &str,
) -> String {
    if name.is_empty() {
        return "usage: run <name>\r\n".into();
    }
    let Some(shader) = config
        .native_shaders
        .iter()
        .find(|shader| shader.name == name)
    else {
        return format!("no such shader: {name}\r\n");
    };

    let mut state = lock_state(shared);
    state.selected_native = Some(*shader);
    state.shader_source = ShaderSource::Native;
    state.shader_active = true;
    format!("running {name}\r\n")
}

fn status_report<D: StripDriver>(shared: &Arc<Mutex<ServerState<D>>>) -> String {
    let state = lock_state(shared);
    let source = match state.shader_source {
        ShaderSource::None => "none",
        ShaderSource::Bytecode => "bytecode",
        ShaderSource::Native => "native",
    };
    let blob_len = state
        .program
        .as_ref()
        .map_or(0, |program| program.blob().len());

    format!(
        "layout: {}x{} ({} leds, {} segments)\r\n\
         shader: source={} active={} frames={}\r\n\
         slow frames: {} (last {} ms)\r\n\
         bytecode: {} bytes uploaded\r\n\
         default: persisted={} faulted={}\r\n",
        state.layout.width,
        state.layout.height,
        state.led_count,
        state.layout.segments.len(),
        source,
        state.shader_active,
        state.frame_count,
        state.slow_frames,
        state.last_slow_ms,
        blob_len,
        state.default_shader_persisted,
        state.default_shader_faulted,
    )
}
