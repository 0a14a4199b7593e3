//! Boot interface (spec §6): receiving the Stivale2 info block and locating
//! the tags the core cares about. Everything else about the boot protocol
//! (ELF-phdr protection, HHDM slide, null-page trap) is the loader shim's
//! concern and is not modeled here — only the two tags the kernel reads.

pub mod cmdline;

use stivale_boot::v2::{StivaleFramebufferTag, StivaleStruct};

use crate::console::ConsoleSink;

/// The subset of the boot info block the core reads.
pub struct BootInfo {
    pub command_line: alloc::string::String,
    pub framebuffer: Option<FramebufferInfo>,
}

pub struct FramebufferInfo {
    pub address: u64,
    pub width: u16,
    pub height: u16,
    pub pitch: u16,
    pub bpp: u16,
}

/// Extracts the command-line and framebuffer tags from a parsed Stivale2
/// structure. Missing tags are not an error: a command-line-less boot
/// falls back to the default console sink, and a framebuffer-less boot
/// simply has no early graphical output.
pub fn extract(stivale: &StivaleStruct) -> BootInfo {
    let command_line = stivale
        .command_line()
        .and_then(|tag| {
            let cstr = tag.as_str();
            core::str::from_utf8(cstr.to_bytes())
                .ok()
                .map(alloc::string::String::from)
        })
        .unwrap_or_default();

    let framebuffer = stivale
        .framebuffer()
        .map(|tag: &StivaleFramebufferTag| FramebufferInfo {
            address: tag.framebuffer_addr,
            width: tag.framebuffer_width,
            height: tag.framebuffer_height,
            pitch: tag.framebuffer_pitch,
            bpp: tag.framebuffer_bpp,
        });

    BootInfo {
        command_line,
        framebuffer,
    }
}

/// Parses the command line and derives the console sink plus minimum log
/// level it configures, falling back to `ConsoleSink::default()` when no
/// `console=` key is present (testable scenario 6).
pub fn configure_console(command_line: &str) -> (ConsoleSink, log::LevelFilter) {
    let parsed = cmdline::parse(command_line);
    let sink = parsed.console.unwrap_or_default();
    (sink, log::LevelFilter::Trace)
}
