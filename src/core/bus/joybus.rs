// pico-pak-rs/src/core/bus/joybus.rs

//! Joybus seam: the serial controller-port protocol reused by cartridges
//! for on-board EEPROM.
//!
//! EEPROM never appears on the parallel AD bus; it answers 8-byte block
//! transactions on the single-wire Joybus. The PIO/bit-banged transport is
//! board-specific, so the EEPROM driver only sees this trait.

/// EEPROM transfer granularity on the Joybus protocol.
pub const EEPROM_BLOCK_SIZE: usize = 8;

/// Serial-port seam consumed by the EEPROM driver.
pub trait JoybusPort {
    /// Bring up the serial port and size any attached EEPROM.
    /// Returns false when the port hardware failed to come up.
    fn init(&mut self) -> bool;

    /// Capacity of the attached EEPROM in bytes; 0 when none answered.
    fn eeprom_size(&self) -> usize;

    /// Read one 8-byte block. Returns false on a transfer error.
    fn read_block(&mut self, index: u8, buf: &mut [u8; EEPROM_BLOCK_SIZE]) -> bool;

    /// Write one 8-byte block. Returns false on a transfer error.
    fn write_block(&mut self, index: u8, data: &[u8; EEPROM_BLOCK_SIZE]) -> bool;
}
