//! Hardware interrupt controller capability trait consumed by the vGIC
//! emulation layer. A concrete GICv2/GICv3 distributor+redistributor driver
//! is resolved once at boot and bound behind this trait; this crate does not
//! implement one.

/// One pending virtual-interrupt handed to the hardware list-register pool.
#[derive(Debug, Clone, Copy)]
pub struct PendingIrq {
    pub virq: u32,
    /// Physical IRQ backing this virtual one, if hardware-sourced.
    pub pirq: Option<u32>,
    pub priority: u8,
    pub group: u8,
}

/// Error codes for irqchip operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqChipError {
    NoFreeListRegister,
    InvalidIrq,
    NotSupported,
}

/// Capability surface a hardware GIC driver exposes to the vGIC emulator.
pub trait IrqChip: Send + Sync {
    /// Per-core bring-up of the virtual CPU interface.
    fn initcore(&self);

    /// Place a pending virtual interrupt into a hardware list register for
    /// immediate delivery to the currently-running vCPU.
    fn inject_guest_irq(&self, pend: PendingIrq) -> Result<(), IrqChipError>;

    /// True if `virq` currently has a list register entry still pending.
    fn guest_irq_pending(&self, virq: u32) -> bool;

    fn irq_pending(&self, irq: u32) -> bool;
    fn irq_enabled(&self, irq: u32) -> bool;

    /// End-of-interrupt at the physical distributor (for hardware-sourced IRQs).
    fn host_eoi(&self, pirq: u32);
    /// End-of-interrupt signalled by the guest for a virtual IRQ.
    fn guest_eoi(&self, virq: u32);
    fn deactive_irq(&self, virq: u32);

    /// Send a physical IPI/SGI to wake a peer physical core on this node.
    fn send_sgi(&self, target_cpu: u32, sgi_id: u8);

    fn enable_irq(&self, irq: u32);
    fn disable_irq(&self, irq: u32);
    fn setup_irq(&self, irq: u32, priority: u8, edge_triggered: bool);
    fn set_targets(&self, irq: u32, cpu_mask: u8);

    /// Install the handler invoked on a physical IRQ exit.
    fn irq_handler(&self, handler: fn(irq: u32));
}
