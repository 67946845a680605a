// arch/mod.rs - Architecture specific implementations for the Meshvisor HAL.
// Only AArch64 is supported; other architectures were dropped along with the
// workspace members that targeted them.

#[cfg(target_arch = "aarch64")]
pub mod arm64;

#[cfg(target_arch = "aarch64")]
pub use arm64::{ArmCpu, Stage2Manager};
