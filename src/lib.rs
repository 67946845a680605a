//! Meshvisor: a distributed Type-1 hypervisor.
//!
//! This crate is a thin facade over [`meshvisor_core`]: it pulls in the
//! architecture backend selected by feature flags and re-exports the public
//! entry points a bootloader or firmware shim calls into.

#![no_std]

#[cfg(feature = "arm64")]
pub use meshvisor_arm64 as arch;

pub use meshvisor_core::{
    cluster, config, init, init_with_config, node, psci, stage2, transport, trap, vgic, vsm,
    HvError,
};
