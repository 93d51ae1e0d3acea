//! TCP control server: shared state, boot sequence, and task spawning.
//!
//! `start` validates the layout, brings up the output pipeline, plays the
//! startup color sequence, restores a persisted default shader, and then
//! spawns the protocol, render, and console threads. All mutable state
//! shared between them lives behind one mutex.

pub mod protocol;
mod session;

use std::net::{Ipv4Addr, TcpListener};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use ledgrid_hal::{KvStore, OtaUpdater, StripDriver};

use crate::console;
use crate::layout::{Layout, LayoutError};
use crate::native::NativeShader;
use crate::output::{LedOutput, OutputError, DEFAULT_GAMMA_X100};
use crate::render;
use crate::vm::{Program, Runtime, MAX_BYTECODE_BLOB};

/// Key-value namespace holding controller persistence.
pub const KV_NAMESPACE: &str = "fw_shader";
/// Key of the persisted default shader blob.
pub const DEFAULT_SHADER_KEY: &str = "default_bc3";

const MAX_BYTES_PER_PIXEL: usize = 4;

/// What the render loop evaluates while a shader is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShaderSource {
    None,
    Bytecode,
    Native,
}

/// Mutable controller state shared by the protocol, render, and console
/// threads. Guarded by one mutex; see the module docs.
pub(crate) struct ServerState<D: StripDriver> {
    pub(crate) layout: Layout,
    pub(crate) led_count: u32,
    /// Per-global-index pixel staging, sized for the widest pixel format.
    pub(crate) frame_buffer: Vec<u8>,
    pub(crate) program: Option<Program>,
    pub(crate) runtime: Option<Runtime>,
    pub(crate) shader_source: ShaderSource,
    pub(crate) shader_active: bool,
    pub(crate) selected_native: Option<NativeShader>,
    pub(crate) default_shader_persisted: bool,
    pub(crate) default_shader_faulted: bool,
    pub(crate) slow_frames: u32,
    pub(crate) last_slow_ms: u32,
    pub(crate) frame_count: u32,
    /// Last color pushed through the uniform fast path, to skip repeats.
    pub(crate) last_uniform: Option<[u8; 3]>,
    pub(crate) output: LedOutput<D>,
}

impl<D: StripDriver> ServerState<D> {
    pub(crate) fn deactivate_shader(&mut self) {
        self.shader_active = false;
        self.frame_count = 0;
    }

    /// Deactivate and blank the panel once.
    pub(crate) fn stop_shader(&mut self) -> Result<(), OutputError<D::Error>> {
        self.deactivate_shader();
        self.shader_source = ShaderSource::None;
        self.last_uniform = None;
        self.output.push_uniform_rgb(0, 0, 0)
    }
}

/// Lock the shared state, riding over a poisoned mutex (the state stays
/// usable; a panicked writer has already been logged by the runtime).
pub(crate) fn lock_state<D: StripDriver>(
    shared: &Arc<Mutex<ServerState<D>>>,
) -> MutexGuard<'_, ServerState<D>> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Per-session constants handed to the protocol and console threads.
#[derive(Clone, Copy)]
pub(crate) struct SessionConfig {
    pub(crate) remap_logical_frames: bool,
    pub(crate) native_shaders: &'static [NativeShader],
}

/// Build-time server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Control protocol port; 0 picks an ephemeral port.
    pub port: u16,
    /// Diagnostic console port; `None` disables the console.
    pub console_port: Option<u16>,
    /// Remap v1/v2 streamed frames from logical to physical order.
    pub remap_logical_frames: bool,
    /// Gamma exponent times 100 for the output pipeline.
    pub gamma_x100: u16,
    /// Play the boot color sequence before accepting clients.
    pub startup_sequence: bool,
    /// Compiled-in shaders selectable via the protocol and console.
    pub native_shaders: &'static [NativeShader],
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: protocol::DEFAULT_PORT,
            console_port: Some(console::DEFAULT_CONSOLE_PORT),
            remap_logical_frames: true,
            gamma_x100: DEFAULT_GAMMA_X100,
            startup_sequence: true,
            native_shaders: &[],
        }
    }
}

/// Running server handle. Dropping it leaves the threads running; `stop`
/// only halts the render loop (sockets block until process exit, as on
/// the reference firmware which never shuts down).
pub struct ServerHandle<D: StripDriver> {
    port: u16,
    console_port: Option<u16>,
    #[allow(dead_code)]
    shared: Arc<Mutex<ServerState<D>>>,
    running: Arc<AtomicBool>,
}

impl<D: StripDriver> ServerHandle<D> {
    /// Bound control protocol port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bound console port, when the console is enabled.
    pub fn console_port(&self) -> Option<u16> {
        self.console_port
    }

    /// Stop the render loop.
    pub fn stop(&self) {
        self.running
            .store(false, std::sync::atomic::Ordering::Relaxed);
    }
}

/// Server bring-up failure.
#[derive(Debug)]
pub enum StartError<E> {
    Layout(LayoutError),
    /// Panel too large for the pipeline's index math.
    InvalidSize,
    Output(OutputError<E>),
    Io(std::io::Error),
}

impl<E> From<LayoutError> for StartError<E> {
    fn from(e: LayoutError) -> Self {
        StartError::Layout(e)
    }
}

impl<E> From<std::io::Error> for StartError<E> {
    fn from(e: std::io::Error) -> Self {
        StartError::Io(e)
    }
}

enum DefaultShaderLoad {
    Loaded(usize),
    NotFound,
    Faulted,
}

/// Boot the controller and spawn its threads.
pub fn start<D, K, O>(
    layout: Layout,
    driver: D,
    kv: K,
    ota: O,
    config: ServerConfig,
) -> Result<ServerHandle<D>, StartError<D::Error>>
where
    D: StripDriver + Send + 'static,
    K: KvStore + Send + 'static,
    O: OtaUpdater + Send + 'static,
{
    layout.validate()?;
    let led_count = layout.total_leds();
    if led_count == 0 || led_count as usize > usize::MAX / MAX_BYTES_PER_PIXEL {
        return Err(StartError::InvalidSize);
    }

    log::info!(
        "LED layout ready: {}x{}, segments={}, total_leds={}, serpentine={}",
        layout.width,
        layout.height,
        layout.segments.len(),
        led_count,
        if layout.serpentine_columns {
            "enabled"
        } else {
            "disabled"
        }
    );

    let mut output = LedOutput::new(driver, &layout, config.gamma_x100).map_err(StartError::Output)?;
    log::info!(
        "gamma correction configured: {}.{:02}",
        config.gamma_x100 / 100,
        config.gamma_x100 % 100
    );

    let mut ota = ota;
    if let Err(err) = ota.mark_running_valid() {
        log::warn!("running image confirmation failed: {err:?}");
    }

    if config.startup_sequence {
        run_startup_sequence(&mut output).map_err(StartError::Output)?;
    }

    let frame_buffer_len = led_count as usize * MAX_BYTES_PER_PIXEL;
    let mut state = ServerState {
        layout,
        led_count,
        frame_buffer: vec![0; frame_buffer_len],
        program: None,
        runtime: None,
        shader_source: ShaderSource::None,
        shader_active: false,
        selected_native: None,
        default_shader_persisted: false,
        default_shader_faulted: false,
        slow_frames: 0,
        last_slow_ms: 0,
        frame_count: 0,
        last_uniform: None,
        output,
    };

    let mut kv = kv;
    match load_persisted_default(&mut state, &mut kv) {
        DefaultShaderLoad::Loaded(len) => {
            log::info!("loaded persisted default shader ({len} bytes)");
        }
        DefaultShaderLoad::NotFound => {}
        DefaultShaderLoad::Faulted => {
            log::warn!("default shader restore failed, continuing without one");
        }
    }

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port))?;
    let port = listener.local_addr()?.port();
    log::info!("control protocol listening on port {port}");

    let console_listener = match config.console_port {
        Some(console_port) => {
            let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, console_port))?;
            Some(listener)
        }
        None => None,
    };
    let console_port = console_listener
        .as_ref()
        .map(|listener| listener.local_addr())
        .transpose()?
        .map(|addr| addr.port());

    let shared = Arc::new(Mutex::new(state));
    let running = Arc::new(AtomicBool::new(true));
    let session_config = SessionConfig {
        remap_logical_frames: config.remap_logical_frames,
        native_shaders: config.native_shaders,
    };

    let rx_buffer_len = frame_buffer_len.max(MAX_BYTECODE_BLOB);
    {
        let shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("ledgrid-server".into())
            .spawn(move || accept_loop(listener, shared, kv, ota, session_config, rx_buffer_len))?;
    }
    {
        let shared = Arc::clone(&shared);
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("ledgrid-render".into())
            .spawn(move || render::run_render_loop(shared, running))?;
    }
    if let Some(listener) = console_listener {
        let shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("ledgrid-console".into())
            .spawn(move || console::run_console_loop(listener, shared, session_config))?;
    }

    Ok(ServerHandle {
        port,
        console_port,
        shared,
        running,
    })
}

fn accept_loop<D, K, O>(
    listener: TcpListener,
    shared: Arc<Mutex<ServerState<D>>>,
    mut kv: K,
    mut ota: O,
    config: SessionConfig,
    rx_buffer_len: usize,
) where
    D: StripDriver,
    K: KvStore,
    O: OtaUpdater,
{
    let mut rx_buffer = vec![0u8; rx_buffer_len];
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                log::info!("client connected: {peer}");
                session::run_client(stream, &shared, &mut rx_buffer, &mut kv, &mut ota, config);
                log::info!("client disconnected");
            }
            Err(err) => {
                log::warn!("accept failed: {err}");
                thread::sleep(Duration::from_millis(200));
            }
        }
    }
}

/// Boot color sequence: red, green, blue, then white, then off.
fn run_startup_sequence<D: StripDriver>(
    output: &mut LedOutput<D>,
) -> Result<(), OutputError<D::Error>> {
    const STEPS: [([u8; 3], u64); 5] = [
        ([255, 0, 0], 500),
        ([0, 255, 0], 500),
        ([0, 0, 255], 500),
        ([255, 255, 255], 1000),
        ([0, 0, 0], 0),
    ];
    for ([r, g, b], hold_ms) in STEPS {
        output.push_uniform_rgb(r, g, b)?;
        if hold_ms > 0 {
            thread::sleep(Duration::from_millis(hold_ms));
        }
    }
    Ok(())
}

/// Restore the persisted default shader, if any. A blob that fails to
/// reload erases itself so the next boot comes up clean.
fn load_persisted_default<D: StripDriver, K: KvStore>(
    state: &mut ServerState<D>,
    kv: &mut K,
) -> DefaultShaderLoad {
    let blob_len = match kv.get_blob_size(DEFAULT_SHADER_KEY) {
        Ok(Some(len)) => len,
        Ok(None) => return DefaultShaderLoad::NotFound,
        Err(err) => {
            log::warn!("persisted shader size query failed: {err:?}");
            mark_faulted(state);
            return DefaultShaderLoad::Faulted;
        }
    };
    if blob_len == 0 || blob_len > MAX_BYTECODE_BLOB {
        log::warn!("persisted shader has invalid size {blob_len}, erasing");
        erase_persisted(kv);
        mark_faulted(state);
        return DefaultShaderLoad::Faulted;
    }

    let mut blob = vec![0u8; blob_len];
    match kv.get_blob(DEFAULT_SHADER_KEY, &mut blob) {
        Ok(read) if read == blob_len => {}
        Ok(read) => {
            log::warn!("persisted shader short read: {read} != {blob_len}, erasing");
            erase_persisted(kv);
            mark_faulted(state);
            return DefaultShaderLoad::Faulted;
        }
        Err(err) => {
            log::warn!("persisted shader read failed: {err:?}");
            mark_faulted(state);
            return DefaultShaderLoad::Faulted;
        }
    }

    let program = match Program::load(&blob) {
        Ok(program) => program,
        Err(err) => {
            log::warn!("persisted bytecode load failed: {}, erasing", err.as_str());
            erase_persisted(kv);
            mark_faulted(state);
            return DefaultShaderLoad::Faulted;
        }
    };
    let runtime = match Runtime::new(&program, state.layout.width, state.layout.height) {
        Ok(runtime) => runtime,
        Err(err) => {
            log::warn!("persisted shader activate failed: {}, erasing", err.as_str());
            erase_persisted(kv);
            mark_faulted(state);
            return DefaultShaderLoad::Faulted;
        }
    };

    state.program = Some(program);
    state.runtime = Some(runtime);
    state.shader_source = ShaderSource::Bytecode;
    state.shader_active = true;
    state.default_shader_persisted = true;
    state.default_shader_faulted = false;
    DefaultShaderLoad::Loaded(blob_len)
}

fn mark_faulted<D: StripDriver>(state: &mut ServerState<D>) {
    state.default_shader_persisted = false;
    state.default_shader_faulted = true;
}

fn erase_persisted<K: KvStore>(kv: &mut K) {
    if let Err(err) = kv.erase(DEFAULT_SHADER_KEY).and_then(|_| kv.commit()) {
        log::warn!("persisted shader erase failed: {err:?}");
    }
}
