//! N64 GamePak core: cartridge address map, shared error type and the
//! host-service seam used by long-running hardware waits.

pub mod bus;
pub mod gamepak;

// Re-exportações para facilitar o uso
pub use bus::{AdBus, BusIo, CtrlLines};
pub use gamepak::{GamePak, GamePakInfo, PakState, SaveMediaKind};

/// Base of the ROM window on the parallel AD bus.
pub const ROM_BASE: u32 = 0x1000_0000;

/// Base of the save window (SRAM / FlashRAM) on the parallel AD bus.
pub const SRAM_BASE: u32 = 0x0800_0000;

/// Size of the cartridge header at ROM offset 0.
pub const HEADER_SIZE: usize = 64;

/// Size of the in-RAM mirror of the first save page.
pub const SAVE_PAGE_SIZE: usize = 512;

/// Battery-backed SRAM capacity (256 Kbit).
pub const SRAM_SIZE: usize = 32 * 1024;

/// 4 Kbit EEPROM capacity in bytes.
pub const EEPROM_4K_SIZE: usize = 512;

/// 16 Kbit EEPROM capacity in bytes.
pub const EEPROM_16K_SIZE: usize = 2048;

/// FlashRAM capacity (1 Mbit).
pub const FLASHRAM_SIZE: usize = 128 * 1024;

/// Errors surfaced by GamePak operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PakError {
    /// No cartridge detected (open bus), or the driver was never initialized.
    NoCartridge,
    /// The addressed save medium is not present on this cartridge.
    NotDetected,
    /// Byte range with odd length on a word-granular bus path.
    OddLength,
    /// Byte range falls outside the addressed device.
    OutOfRange,
    /// Write read back with a mismatch after all retries.
    VerifyFailed,
    /// A hardware ready-poll exhausted its bounded retry budget.
    Timeout,
}

impl std::fmt::Display for PakError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PakError::NoCartridge => write!(f, "no cartridge present"),
            PakError::NotDetected => write!(f, "save medium not detected"),
            PakError::OddLength => write!(f, "odd byte length on word-granular path"),
            PakError::OutOfRange => write!(f, "byte range out of device bounds"),
            PakError::VerifyFailed => write!(f, "write verification failed"),
            PakError::Timeout => write!(f, "hardware ready-poll timed out"),
        }
    }
}

impl std::error::Error for PakError {}

/// Result type for GamePak operations.
pub type PakResult<T> = Result<T, PakError>;

/// Cooperative yield point for the surrounding single-threaded loop.
///
/// FlashRAM erase/program cycles spend tens of milliseconds waiting on the
/// chip; the driver calls `service()` from inside those waits so the USB
/// stack (or whatever else the host runs) keeps breathing.
pub trait HostService {
    fn service(&mut self);
}

/// Service stub for hosts without a heartbeat requirement.
pub struct NullService;

impl HostService for NullService {
    fn service(&mut self) {}
}
