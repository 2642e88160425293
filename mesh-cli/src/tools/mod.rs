//! Tools the sandbox runner can dispatch to, keyed the way
//! [`mesh_core::sandbox::protocol::SandboxInvokeParams`] names them:
//! `(module, function)`. Two demonstration tools ship here
//! (`render_ascii_art`, spec scenario S6, and `write_output_file`, spec
//! property P10's output-artifact path); real tool implementations are an
//! out-of-scope external collaborator per spec §1.

pub mod render_ascii_art;
pub mod write_output_file;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

pub type ToolFn = fn(Value, Value, &HashMap<String, PathBuf>, &Path) -> Result<Value, String>;

/// Looks up a tool by its manifest `(module, function)` pair. `None` means
/// the manifest named a tool this runner binary doesn't carry.
pub fn lookup(module: &str, function: &str) -> Option<ToolFn> {
    match (module, function) {
        ("sandbox_tools.ascii_art", "render") => Some(render_ascii_art::render),
        ("sandbox_tools.output_file", "write") => Some(write_output_file::write),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_the_demo_tool() {
        assert!(lookup("sandbox_tools.ascii_art", "render").is_some());
    }

    #[test]
    fn lookup_finds_the_output_file_tool() {
        assert!(lookup("sandbox_tools.output_file", "write").is_some());
    }

    #[test]
    fn lookup_returns_none_for_unknown_tool() {
        assert!(lookup("nonexistent", "thing").is_none());
    }
}
