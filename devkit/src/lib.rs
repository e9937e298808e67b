/*!
# Rackwatt DevKit - test support for the sampling engine

- Fake ipmitool with per-host, per-attempt scripted behaviour
- `sdr elist` listing and inventory fixture builders
- Test harness owning a temporary workspace
*/

pub mod fake_tool;
pub mod fixtures;
pub mod test_utils;

pub use fake_tool::{Behavior, FakeIpmiTool};
pub use fixtures::{InventoryBuilder, SensorListingBuilder};
pub use test_utils::TestHarness;
