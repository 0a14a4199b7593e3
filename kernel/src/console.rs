//! Console sink: the kernel's only path to the outside world for
//! diagnostics (spec §6). Backed by the `log` crate facade — core
//! subsystems call `log::error!`/`log::warn!`/etc., never a console type
//! directly.

use core::fmt::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;
use x86_64::instructions::port::Port;

use crate::arch::x86_64::context::ProcessorState;
use crate::exception;

/// The five priority levels from spec §6. `log::Level` has no `Notice`;
/// it is folded into `Info` and rendered back out as `NOTICE` so the
/// spec's vocabulary stays visible in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Error,
    Warning,
    Notice,
    Debug,
    Trace,
}

impl Priority {
    fn from_log_level(level: Level) -> Self {
        match level {
            Level::Error => Priority::Error,
            Level::Warn => Priority::Warning,
            Level::Info => Priority::Notice,
            Level::Debug => Priority::Debug,
            Level::Trace => Priority::Trace,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Priority::Error => "ERROR",
            Priority::Warning => "WARN",
            Priority::Notice => "NOTICE",
            Priority::Debug => "DEBUG",
            Priority::Trace => "TRACE",
        }
    }
}

/// Where formatted bytes actually go, decoded from the `console=` command
/// line key (spec §6).
#[derive(Debug, Clone, Copy)]
pub enum ConsoleSink {
    /// QEMU/Bochs debug console: every byte written to this port is echoed
    /// to the host's stdout.
    DebugCon { port: u16 },
    /// A 16550-compatible serial port at `port`, already assumed
    /// initialized at `baud` by the platform layer.
    Serial { port: u16, baud: u32 },
}

impl Default for ConsoleSink {
    fn default() -> Self {
        ConsoleSink::DebugCon { port: 0xE9 }
    }
}

struct SinkWriter(ConsoleSink);

impl Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        match self.0 {
            ConsoleSink::DebugCon { port } | ConsoleSink::Serial { port, .. } => {
                // SAFETY: `port` is a fixed I/O port known to accept byte
                // writes (debugcon or an already-initialized 16550 THR);
                // writing extra bytes to either has no side effect beyond
                // the intended output.
                let mut io: Port<u8> = Port::new(port);
                for byte in s.bytes() {
                    unsafe { io.write(byte) };
                }
            }
        }
        Ok(())
    }
}

static SINK: Mutex<ConsoleSink> = Mutex::new(ConsoleSink::DebugCon { port: 0xE9 });

/// Installs the configured sink. Called once during boot after the command
/// line has been parsed.
pub fn configure(sink: ConsoleSink, min_level: LevelFilter) {
    *SINK.lock() = sink;
    log::set_max_level(min_level);
}

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let priority = Priority::from_log_level(record.level());
        let mut writer = SinkWriter(*SINK.lock());
        let _ = writeln!(writer, "[{}] {}", priority.tag(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Installs the global logger. Idempotent: `log::set_logger` itself
/// rejects a second install, which is the right behavior here (a second
/// boot-time call is a programming error, not something to silently allow).
pub fn install() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);
}

/// Writes a message, the call-site program counter, and a backtrace, then
/// halts every CPU. The sole non-returning diagnostic path (spec §6); it is
/// a free function rather than a `Log` method because it must work even
/// before `install` has run. Backtraces from the point of the panic itself
/// (rather than a captured exception frame); for a CPU exception with a
/// known faulting state, use `panic_with_state` instead.
pub fn panic(args: core::fmt::Arguments) -> ! {
    panic_with_state(args, &ProcessorState::capture_current())
}

/// As `panic`, but backtraces from `state` (e.g. the processor state at a
/// faulting instruction) rather than the call site.
pub fn panic_with_state(args: core::fmt::Arguments, state: &ProcessorState) -> ! {
    let mut writer = SinkWriter(*SINK.lock());
    let _ = writeln!(writer, "[PANIC] {args}");
    exception::print_backtrace(&mut writer, state);
    loop {
        // SAFETY: halting this CPU forever is the documented terminal state
        // of a kernel panic; there is no code path that should resume here.
        unsafe { core::arch::asm!("cli", "hlt") };
    }
}
