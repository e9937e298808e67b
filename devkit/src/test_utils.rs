/*!
Test harness for process-level tests

Owns a temporary directory holding the fake ipmitool, its state and any
inventory written for the test. Dropping the harness removes everything.
*/

use crate::fake_tool::{Behavior, FakeIpmiTool};
use crate::fixtures::InventoryBuilder;
use anyhow::Result;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestHarness {
    dir: TempDir,
    pub tool: FakeIpmiTool,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        init_logging();
        let dir = tempfile::tempdir()?;
        let tool = FakeIpmiTool::install(dir.path())?;
        Ok(Self { dir, tool })
    }

    pub fn script(&self, address: &str, behaviors: Vec<Behavior>) -> Result<&Self> {
        self.tool.on(address, behaviors)?;
        Ok(self)
    }

    pub fn write_inventory(&self, inventory: &InventoryBuilder) -> Result<PathBuf> {
        inventory.write(self.dir.path())
    }
}

/// Test logging, honouring RUST_LOG; safe to call repeatedly
pub fn init_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

/// Whether `pid` still names a live process
#[cfg(unix)]
pub fn process_alive(pid: i32) -> bool {
    std::path::Path::new(&format!("/proc/{}", pid)).exists()
        || std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
}
