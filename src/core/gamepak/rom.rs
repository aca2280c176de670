// pico-pak-rs/src/core/gamepak/rom.rs

//! ROM reader: burst word reads and mirror-probe size detection.

use crate::core::bus::AdBus;
use crate::core::{PakError, PakResult, ROM_BASE};
use crate::utils::crc::Crc32;
use log::{debug, info};

/// Largest ROM a cartridge can decode (64 MiB).
pub const ROM_MAX_SIZE: u32 = 64 * 1024 * 1024;

/// Mirror-probe granularity.
const PROBE_STEP: u32 = 1024 * 1024;

/// Bytes compared per mirror probe.
const FINGERPRINT_LEN: usize = 16;

/// Chunk size for streamed ROM checksumming.
const CRC_CHUNK: usize = 512;

/// Read a single word from the given ROM byte offset.
pub fn read_word(bus: &mut AdBus, offset: u32) -> u16 {
    bus.latch_address(ROM_BASE + offset);
    bus.read_word()
}

/// Fill `buf` from ROM starting at `offset`. Length must be even.
///
/// The address is latched once; the cartridge auto-increments its internal
/// pointer on sequential reads, so the whole run streams without the
/// per-word latch overhead.
pub fn read_bytes(bus: &mut AdBus, offset: u32, buf: &mut [u8]) -> PakResult<()> {
    if buf.len() % 2 != 0 {
        return Err(PakError::OddLength);
    }

    bus.latch_address(ROM_BASE + offset);
    for chunk in buf.chunks_exact_mut(2) {
        let word = bus.read_word();
        chunk[0] = (word >> 8) as u8;
        chunk[1] = word as u8;
    }
    Ok(())
}

/// Detect the ROM size by probing for address mirroring.
///
/// Unmapped cartridge address space wraps back to the start rather than
/// bus-erroring, so the first 1 MiB boundary whose 16-byte fingerprint
/// matches offset 0 marks the end of unique data. A chip that never
/// mirrors below the cap is a full 64 MiB part.
pub fn detect_size(bus: &mut AdBus) -> PakResult<u32> {
    let mut base = [0u8; FINGERPRINT_LEN];
    read_bytes(bus, 0, &mut base)?;

    let mut offs = PROBE_STEP;
    while offs < ROM_MAX_SIZE {
        let mut probe = [0u8; FINGERPRINT_LEN];
        read_bytes(bus, offs, &mut probe)?;
        if probe == base {
            debug!("ROM mirror found at {:#x}", offs);
            return Ok(offs);
        }
        offs += PROBE_STEP;
    }

    info!("no ROM mirror below {:#x}, assuming full-size chip", ROM_MAX_SIZE);
    Ok(ROM_MAX_SIZE)
}

/// CRC-32/IEEE over the first `len` bytes of ROM, streamed in chunks so a
/// full 64 MiB dump never needs a contiguous buffer.
pub fn crc32(bus: &mut AdBus, len: u32) -> PakResult<u32> {
    if len % 2 != 0 {
        return Err(PakError::OddLength);
    }

    let crc = Crc32::new();
    let mut state = !0u32;
    let mut chunk = [0u8; CRC_CHUNK];
    let mut done = 0u32;
    while done < len {
        let take = CRC_CHUNK.min((len - done) as usize);
        read_bytes(bus, done, &mut chunk[..take])?;
        state = crc.update(state, &chunk[..take]);
        done += take as u32;
    }
    Ok(!state)
}
