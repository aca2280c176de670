// pico-pak-rs/src/core/gamepak/sram.rs

//! Battery-backed SRAM driver. SRAM sits directly on the AD bus in the
//! save window, so all I/O decomposes into plain word cycles.

use crate::core::bus::AdBus;
use crate::core::{PakError, PakResult, SRAM_BASE, SRAM_SIZE};
use log::debug;

/// Offset of the reversible probe write, clear of save data at offset 0.
const PROBE_OFFSET: u32 = 0x100;

/// Probe sentinel value.
const PROBE_MAGIC: u16 = 0x5A5A;

/// Presence probe: open bus at the base means no chip; otherwise write a
/// sentinel word, read it back and restore the original value. Destructive
/// but reversible.
pub fn detect(bus: &mut AdBus) -> bool {
    if read_word(bus, 0) == 0xFFFF {
        return false;
    }

    let original = read_word(bus, PROBE_OFFSET);
    write_word(bus, PROBE_OFFSET, PROBE_MAGIC);
    let readback = read_word(bus, PROBE_OFFSET);
    write_word(bus, PROBE_OFFSET, original);

    debug!("SRAM probe readback {:#06x}", readback);
    readback == PROBE_MAGIC
}

pub fn read_word(bus: &mut AdBus, offset: u32) -> u16 {
    bus.latch_address(SRAM_BASE + offset);
    bus.read_word()
}

pub fn write_word(bus: &mut AdBus, offset: u32, value: u16) {
    bus.latch_address(SRAM_BASE + offset);
    bus.write_word(value);
}

/// Fill `buf` from SRAM starting at `offset`. Length must be even.
pub fn read_bytes(bus: &mut AdBus, offset: u32, buf: &mut [u8]) -> PakResult<()> {
    check_range(offset, buf.len())?;

    for (i, chunk) in buf.chunks_exact_mut(2).enumerate() {
        let word = read_word(bus, offset + (i * 2) as u32);
        chunk[0] = (word >> 8) as u8;
        chunk[1] = word as u8;
    }
    Ok(())
}

/// Write `data` to SRAM starting at `offset`. Length must be even.
pub fn write_bytes(bus: &mut AdBus, offset: u32, data: &[u8]) -> PakResult<()> {
    check_range(offset, data.len())?;

    for (i, chunk) in data.chunks_exact(2).enumerate() {
        let word = u16::from_be_bytes([chunk[0], chunk[1]]);
        write_word(bus, offset + (i * 2) as u32, word);
    }
    Ok(())
}

fn check_range(offset: u32, len: usize) -> PakResult<()> {
    if len % 2 != 0 {
        return Err(PakError::OddLength);
    }
    if offset as usize + len > SRAM_SIZE {
        return Err(PakError::OutOfRange);
    }
    Ok(())
}
