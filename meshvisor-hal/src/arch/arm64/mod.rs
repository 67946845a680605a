//! ARM64 architecture support for the Meshvisor HAL
#![cfg(target_arch = "aarch64")]

pub mod cpu;

pub use cpu::ArmCpu;

pub mod ept_manager;

pub use ept_manager::EptHierarchy as Stage2Manager;
