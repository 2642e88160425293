//! Resource limits applied to a sandboxed tool process (spec §4.10 step 5):
//! memory, CPU seconds, file size, and open-file-descriptor ceilings.
//!
//! Uses the `rlimit` crate — the teacher has no process-isolation code to
//! ground this on besides plain `std::process::Command`; `rlimit` is the
//! standard ecosystem crate for this and keeps us off ad hoc libc FFI.

use rlimit::Resource;

#[derive(Clone, Copy, Debug)]
pub struct ResourceLimits {
    pub max_memory_bytes: Option<u64>,
    pub max_cpu_seconds: Option<u64>,
    pub max_file_size_bytes: Option<u64>,
    pub max_open_files: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: Some(512 * 1024 * 1024),
            max_cpu_seconds: Some(30),
            max_file_size_bytes: Some(64 * 1024 * 1024),
            max_open_files: Some(64),
        }
    }
}

/// Applies the configured limits to the *current* process via `setrlimit`.
/// Intended to run inside a `pre_exec` hook, after `fork` and before `exec`,
/// so it only ever affects the about-to-be-replaced child.
///
/// # Safety
/// Must only be called from a `pre_exec` closure: between `fork` and
/// `exec`, only async-signal-safe operations are sound, and `setrlimit` is.
pub unsafe fn apply_resource_limits(limits: &ResourceLimits) -> std::io::Result<()> {
    if let Some(bytes) = limits.max_memory_bytes {
        Resource::AS.set(bytes, bytes)?;
    }
    if let Some(seconds) = limits.max_cpu_seconds {
        Resource::CPU.set(seconds, seconds)?;
    }
    if let Some(bytes) = limits.max_file_size_bytes {
        Resource::FSIZE.set(bytes, bytes)?;
    }
    if let Some(count) = limits.max_open_files {
        Resource::NOFILE.set(count, count)?;
    }
    Ok(())
}
