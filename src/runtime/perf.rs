//! Optional symbolization sidecars for compiled regions (spec.md §6
//! "Optional integrations"). Both are opt-in via `CompilerOptions` and
//! best-effort: a failure here is logged and never propagated, since losing
//! a profiler annotation must never fail a compile.

use std::fs::OpenOptions;
use std::io::Write;

/// Appends one `perf-<pid>.map` line (`<addr> <size> <name>`, all hex
/// address/size) to the process-wide map file `perf report`/`perf top`
/// read for JIT symbolization, per the `perf-<pid>.map` file format Linux
/// `perf` recognizes.
pub fn write_jit_map(start_addr: usize, len: usize) {
    let path = format!("/tmp/perf-{}.map", std::process::id());
    let line = format!("{start_addr:x} {len:x} flounder_jit_{start_addr:x}\n");
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| f.write_all(line.as_bytes()));
    match result {
        Ok(()) => log::debug!("flounder: recorded perf map entry in {path}"),
        Err(e) => log::warn!("flounder: could not write perf map entry to {path}: {e}"),
    }
}

/// Notifies a VTune JIT profiling listener that a new region of code has
/// been generated. The real SDK talks to VTune over its `jitprofiling` ABI;
/// this crate doesn't link that SDK, so this is a logging stub a client can
/// watch via its `log` subscriber until a genuine integration lands.
pub fn notify_vtune(start_addr: usize, len: usize) {
    log::debug!("flounder: vtune notification for region at {start_addr:#x}, {len} bytes");
}
