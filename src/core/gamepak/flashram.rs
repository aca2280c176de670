// pico-pak-rs/src/core/gamepak/flashram.rs

//! FlashRAM driver: command-register protocol, bounded ready-polling,
//! block erase / page program / verify cycles, and the staging buffer for
//! streamed sector writes.
//!
//! The chip lives in the save window but is nothing like SRAM: every
//! operation is queued by writing 32-bit command words to a fixed command
//! register, and readiness is observed by polling an 8-byte status block
//! whose idle pattern differs between chip vendors.

use crate::core::bus::AdBus;
use crate::core::{HostService, PakError, PakResult, FLASHRAM_SIZE, SRAM_BASE};
use log::{debug, info, warn};

/// One erase block — also the full chip on every known part.
pub const FLASH_BLOCK_SIZE: usize = 128 * 1024;

/// Page-program granularity.
pub const FLASH_PAGE_SIZE: usize = 128;

/// Streamed-write sector granularity (matches the host's 512-byte blocks).
pub const FLASH_SECTOR_SIZE: usize = 512;

/// Sectors per erase block.
pub const FLASH_SECTOR_COUNT: usize = FLASH_BLOCK_SIZE / FLASH_SECTOR_SIZE;

/// Command register address on the AD bus.
pub const FLASH_CMD_REG: u32 = SRAM_BASE + 0x1_0000;

/// Chunked-read granularity, matching the chip's addressing quirk.
const READ_CHUNK: usize = 128;

/// Status polls before a wait gives up (1 ms apart).
const READY_POLL_LIMIT: u32 = 500;

// Command words, bit-exact per the chip protocol.
pub const CMD_RESET: u32 = 0xFF00_0000;
pub const CMD_READ_ARRAY: u32 = 0xF000_0000;
pub const CMD_STATUS_MODE: u32 = 0xE100_0000;
pub const CMD_ERASE: u32 = 0x4B00_0000; // + word address bits
pub const CMD_ERASE_MODE: u32 = 0x7800_0000;
pub const CMD_PROGRAM: u32 = 0xB400_0000;
pub const CMD_PAGE_OFFSET: u32 = 0xA500_0000; // + page index
pub const CMD_EXECUTE: u32 = 0xD200_0000;

/// Idle status signatures. The same logical chip reports different patterns
/// across manufacturers, so all three are accepted.
pub const IDLE_MX29L1100: [u8; 8] = [0x11, 0x11, 0x80, 0x01, 0x00, 0xC2, 0x00, 0x1E];
pub const IDLE_MX29L1101: [u8; 8] = [0x11, 0x11, 0x80, 0x01, 0x00, 0xC2, 0x00, 0x1D];
pub const IDLE_MN63F81: [u8; 8] = [0x11, 0x11, 0x80, 0x01, 0x00, 0x32, 0x00, 0xF1];

/// Device IDs (last status byte): MX29L1100, MX29L1101, MN63F81MPN.
const KNOWN_DEVICE_IDS: [u8; 3] = [0x1E, 0x1D, 0xF1];

/// Send one 32-bit command word to the command register, high half first.
fn send_command(bus: &mut AdBus, cmd: u32) {
    bus.latch_address(FLASH_CMD_REG);
    bus.write_word((cmd >> 16) as u16);
    bus.write_word(cmd as u16);
}

/// Read the 8-byte status/ID block. The chip must already be in status mode.
fn read_status(bus: &mut AdBus) -> [u8; 8] {
    let mut block = [0u8; 8];
    bus.latch_address(SRAM_BASE);
    for chunk in block.chunks_exact_mut(2) {
        let word = bus.read_word();
        chunk[0] = (word >> 8) as u8;
        chunk[1] = word as u8;
    }
    block
}

/// Poll the status register until the chip reports idle.
///
/// Every hardware wait in this driver goes through this single bounded
/// policy: up to 500 polls, 1 ms apart, servicing the host between polls so
/// long erase/program cycles never starve the USB stack.
pub fn wait_ready(bus: &mut AdBus, service: &mut dyn HostService) -> PakResult<()> {
    for _ in 0..READY_POLL_LIMIT {
        send_command(bus, CMD_STATUS_MODE);
        let status = read_status(bus);

        if status == IDLE_MX29L1100 || status == IDLE_MX29L1101 || status == IDLE_MN63F81 {
            return Ok(());
        }

        service.service();
        bus.sleep_ms(1);
    }

    warn!("FlashRAM ready-poll exhausted after {} tries", READY_POLL_LIMIT);
    Err(PakError::Timeout)
}

/// Presence probe: reset the chip, read the status/ID block and match the
/// device ID byte. Leaves the chip reset either way.
pub fn detect(bus: &mut AdBus, service: &mut dyn HostService) -> bool {
    send_command(bus, CMD_RESET);
    if wait_ready(bus, service).is_err() {
        return false;
    }

    send_command(bus, CMD_STATUS_MODE);
    let id_block = read_status(bus);

    // Leave the chip in a clean state before judging the ID.
    send_command(bus, CMD_RESET);

    let device_id = id_block[7];
    let known = KNOWN_DEVICE_IDS.contains(&device_id);
    debug!("FlashRAM probe device id {:#04x} known={}", device_id, known);
    known
}

/// Fill `buf` from FlashRAM starting at byte `offset`. Length must be even.
///
/// The chip interprets the latched offset as a word address, so byte
/// addresses are halved before latching and reads proceed in 128-byte
/// chunks, re-latching per chunk.
pub fn read_bytes(
    bus: &mut AdBus,
    service: &mut dyn HostService,
    offset: u32,
    buf: &mut [u8],
) -> PakResult<()> {
    if buf.len() % 2 != 0 {
        return Err(PakError::OddLength);
    }
    if offset as usize + buf.len() > FLASHRAM_SIZE {
        return Err(PakError::OutOfRange);
    }

    send_command(bus, CMD_RESET);
    wait_ready(bus, service)?;
    send_command(bus, CMD_READ_ARRAY);

    let mut done = 0usize;
    while done < buf.len() {
        let take = READ_CHUNK.min(buf.len() - done);

        // Byte address to chip-internal word address.
        let physical = (offset as usize + done) >> 1;
        bus.latch_address(SRAM_BASE + physical as u32);

        for chunk in buf[done..done + take].chunks_exact_mut(2) {
            let word = bus.read_word();
            chunk[0] = (word >> 8) as u8;
            chunk[1] = word as u8;
        }
        done += take;
    }

    send_command(bus, CMD_RESET);
    Ok(())
}

/// Erase the 128 KiB block containing `byte_addr`.
fn erase_block(bus: &mut AdBus, service: &mut dyn HostService, byte_addr: u32) -> PakResult<()> {
    service.service();

    send_command(bus, CMD_ERASE | (byte_addr >> 1));
    send_command(bus, CMD_ERASE_MODE);
    send_command(bus, CMD_EXECUTE);

    wait_ready(bus, service)
}

/// Program one 128-byte page (page-aligned `byte_addr`) and verify it.
fn program_page(
    bus: &mut AdBus,
    service: &mut dyn HostService,
    byte_addr: u32,
    data: &[u8],
) -> PakResult<()> {
    let page_index = (byte_addr >> 7) & 0x03FF;

    service.service();
    send_command(bus, CMD_PROGRAM);
    bus.sleep_us(20);

    // Burst the page into the chip's staging latch.
    bus.latch_address(SRAM_BASE);
    for chunk in data.chunks_exact(2) {
        bus.write_word(u16::from_be_bytes([chunk[0], chunk[1]]));
    }

    // Select the destination page, then commit.
    send_command(bus, CMD_PAGE_OFFSET | page_index);
    bus.sleep_us(20);
    send_command(bus, CMD_EXECUTE);
    wait_ready(bus, service)?;

    // Read back and compare the programmed page.
    let mut verify = [0u8; FLASH_PAGE_SIZE];
    read_bytes(bus, service, byte_addr, &mut verify)?;
    if verify != data {
        warn!("FlashRAM page {} verify mismatch", page_index);
        return Err(PakError::VerifyFailed);
    }
    Ok(())
}

/// Erase + program + verify a whole block image.
pub fn program_block(
    bus: &mut AdBus,
    service: &mut dyn HostService,
    block_base: u32,
    data: &[u8],
) -> PakResult<()> {
    if data.len() != FLASH_BLOCK_SIZE || block_base as usize % FLASH_BLOCK_SIZE != 0 {
        return Err(PakError::OutOfRange);
    }

    erase_block(bus, service, block_base)?;

    for (i, page) in data.chunks_exact(FLASH_PAGE_SIZE).enumerate() {
        program_page(bus, service, block_base + (i * FLASH_PAGE_SIZE) as u32, page)?;
    }

    info!("FlashRAM block at {:#x} programmed and verified", block_base);
    Ok(())
}

/// Arbitrary-range write: read-modify-erase-reprogram of the covering block.
///
/// Erase granularity is the full 128 KiB block, so the old block image is
/// read first and the caller's bytes spliced in; bytes outside the target
/// range come back exactly as they were.
pub fn write_bytes(
    bus: &mut AdBus,
    service: &mut dyn HostService,
    offset: u32,
    data: &[u8],
) -> PakResult<()> {
    if data.is_empty() {
        return Err(PakError::OutOfRange);
    }
    if offset as usize + data.len() > FLASHRAM_SIZE {
        return Err(PakError::OutOfRange);
    }

    let block_base = offset & !(FLASH_BLOCK_SIZE as u32 - 1);

    let mut block = vec![0u8; FLASH_BLOCK_SIZE];
    read_bytes(bus, service, block_base, &mut block)?;

    let splice_at = (offset - block_base) as usize;
    block[splice_at..splice_at + data.len()].copy_from_slice(data);

    program_block(bus, service, block_base, &block)
}

/// Accumulator for streamed 512-byte sector writes.
///
/// Hosts push save data one sector at a time and in no guaranteed order;
/// the block can only be committed once every sector has arrived, because
/// the erase wipes all of it. A bitmap tracks which sectors were seen.
pub struct FlashStaging {
    buf: Vec<u8>,
    sector_map: [u8; FLASH_SECTOR_COUNT / 8],
    sectors_seen: u32,
}

impl FlashStaging {
    pub fn new() -> Self {
        Self {
            buf: vec![0xFF; FLASH_BLOCK_SIZE],
            sector_map: [0; FLASH_SECTOR_COUNT / 8],
            sectors_seen: 0,
        }
    }

    /// Stage one sector. Returns true once the full block has been seen.
    pub fn stage(&mut self, offset: u32, sector: &[u8]) -> PakResult<bool> {
        if sector.len() != FLASH_SECTOR_SIZE || offset as usize % FLASH_SECTOR_SIZE != 0 {
            return Err(PakError::OutOfRange);
        }
        if offset as usize + FLASH_SECTOR_SIZE > FLASH_BLOCK_SIZE {
            return Err(PakError::OutOfRange);
        }

        let start = offset as usize;
        self.buf[start..start + FLASH_SECTOR_SIZE].copy_from_slice(sector);

        let index = start / FLASH_SECTOR_SIZE;
        let byte = index >> 3;
        let mask = 1u8 << (index & 7);
        if self.sector_map[byte] & mask == 0 {
            self.sector_map[byte] |= mask;
            self.sectors_seen += 1;
        }

        Ok(self.sectors_seen as usize >= FLASH_SECTOR_COUNT)
    }

    /// The assembled block image.
    pub fn block(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.sectors_seen == 0
    }

    /// Forget all staged sectors after a commit (or an abort).
    pub fn reset(&mut self) {
        self.buf.fill(0xFF);
        self.sector_map.fill(0);
        self.sectors_seen = 0;
    }
}

impl Default for FlashStaging {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NullService;
    use crate::sim::{SimBus, SimCart};
    use std::sync::{Arc, Mutex};

    fn flash_bus(signature: [u8; 8]) -> (Arc<Mutex<SimCart>>, AdBus) {
        let mut cart = SimCart::with_rom(vec![0u8; 64]);
        cart.attach_flashram(signature);
        let cart = Arc::new(Mutex::new(cart));
        let mut bus = AdBus::new(Box::new(SimBus::new(Arc::clone(&cart))));
        bus.init();
        (cart, bus)
    }

    #[test]
    fn detect_accepts_each_known_vendor() {
        for signature in [IDLE_MX29L1100, IDLE_MX29L1101, IDLE_MN63F81] {
            let (_cart, mut bus) = flash_bus(signature);
            assert!(detect(&mut bus, &mut NullService));
        }
    }

    #[test]
    fn detect_rejects_unknown_device_id() {
        let (_cart, mut bus) = flash_bus([0x11, 0x11, 0x80, 0x01, 0x00, 0xC2, 0x00, 0x42]);
        assert!(!detect(&mut bus, &mut NullService));
    }

    #[test]
    fn detect_fails_on_absent_chip() {
        let cart = Arc::new(Mutex::new(SimCart::with_rom(vec![0u8; 64])));
        let mut bus = AdBus::new(Box::new(SimBus::new(cart)));
        bus.init();
        assert!(!detect(&mut bus, &mut NullService));
    }

    #[test]
    fn wait_ready_times_out_on_stuck_chip() {
        let (cart, mut bus) = flash_bus(IDLE_MX29L1100);
        cart.lock().unwrap().set_flash_stuck_busy(true);
        assert_eq!(wait_ready(&mut bus, &mut NullService), Err(PakError::Timeout));
    }

    #[test]
    fn read_uses_word_address_translation() {
        let (cart, mut bus) = flash_bus(IDLE_MX29L1100);
        for (i, byte) in cart.lock().unwrap().flash_mut().iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }

        let mut buf = [0u8; 300];
        read_bytes(&mut bus, &mut NullService, 0x400, &mut buf).unwrap();
        let expected: Vec<u8> = (0x400..0x400 + 300usize).map(|i| (i % 251) as u8).collect();
        assert_eq!(&buf[..], &expected[..]);
    }

    #[test]
    fn write_bytes_preserves_rest_of_block() {
        let (cart, mut bus) = flash_bus(IDLE_MX29L1100);
        for (i, byte) in cart.lock().unwrap().flash_mut().iter_mut().enumerate() {
            *byte = (i % 13) as u8;
        }
        let before = cart.lock().unwrap().flash().to_vec();

        write_bytes(&mut bus, &mut NullService, 0x1000, &[0xEE; 64]).unwrap();

        let after = cart.lock().unwrap().flash().to_vec();
        assert_eq!(&after[0x1000..0x1040], &[0xEE; 64]);
        assert_eq!(&after[..0x1000], &before[..0x1000]);
        assert_eq!(&after[0x1040..], &before[0x1040..]);
    }

    #[test]
    fn staging_commits_only_when_all_sectors_seen() {
        let mut staging = FlashStaging::new();
        let sector = [0xABu8; FLASH_SECTOR_SIZE];

        for i in 0..FLASH_SECTOR_COUNT - 1 {
            let complete = staging
                .stage((i * FLASH_SECTOR_SIZE) as u32, &sector)
                .unwrap();
            assert!(!complete);
        }
        // Re-sending a sector must not count twice.
        assert!(!staging.stage(0, &sector).unwrap());

        let last = ((FLASH_SECTOR_COUNT - 1) * FLASH_SECTOR_SIZE) as u32;
        assert!(staging.stage(last, &sector).unwrap());

        staging.reset();
        assert!(staging.is_empty());
        assert!(staging.block().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn staging_rejects_misaligned_sector() {
        let mut staging = FlashStaging::new();
        assert_eq!(
            staging.stage(100, &[0u8; FLASH_SECTOR_SIZE]),
            Err(PakError::OutOfRange)
        );
        assert_eq!(staging.stage(0, &[0u8; 100]), Err(PakError::OutOfRange));
    }
}
