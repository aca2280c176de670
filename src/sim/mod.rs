// pico-pak-rs/src/sim/mod.rs

//! Pin-level simulated cartridge.
//!
//! `SimBus` implements [`BusIo`] against a shared [`SimCart`] model, so the
//! real drivers run unmodified: address halves are captured on ALE falling
//! edges, reads are served while /RD is low and auto-increment on its
//! rising edge, writes commit on the /WR rising edge, and the FlashRAM
//! command state machine reacts to the same 32-bit command words as the
//! silicon. Hosts use this to develop against the crate without hardware;
//! the test suite uses it for every media path.

use crate::core::bus::joybus::{JoybusPort, EEPROM_BLOCK_SIZE};
use crate::core::bus::{BusIo, CtrlLines};
use crate::core::gamepak::flashram::{FLASH_BLOCK_SIZE, FLASH_PAGE_SIZE};
use crate::core::{HostService, FLASHRAM_SIZE, ROM_BASE, SRAM_BASE, SRAM_SIZE};
use log::trace;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Save chip wired to the parallel bus (EEPROM lives on the Joybus instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveChip {
    None,
    Sram,
    FlashRam,
}

/// FlashRAM protocol mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlashMode {
    Array,
    Status,
    Program,
}

/// Offset of the command register inside the save window.
const FLASH_CMD_OFFSET: u32 = 0x1_0000;

/// Behavioral model of a cartridge, shared between the test and the bus.
pub struct SimCart {
    present: bool,
    open_bus: u16,
    rom: Vec<u8>,
    save_chip: SaveChip,
    sram: Vec<u8>,
    flash: Vec<u8>,

    // Bus-side address state.
    latch_high: u16,
    cursor: u32,

    // FlashRAM protocol state.
    flash_mode: FlashMode,
    flash_signature: [u8; 8],
    flash_word_ptr: usize,
    status_ptr: usize,
    flash_busy: u32,
    flash_busy_per_op: u32,
    flash_stuck_busy: bool,
    cmd_high: Option<u16>,
    erase_target: Option<u32>,
    erase_armed: bool,
    pending_page: Option<u32>,
    page_buf: [u8; FLASH_PAGE_SIZE],
}

impl SimCart {
    /// An empty slot: every read is open bus.
    pub fn new() -> Self {
        Self {
            present: false,
            open_bus: 0xFFFF,
            rom: Vec::new(),
            save_chip: SaveChip::None,
            sram: Vec::new(),
            flash: Vec::new(),
            latch_high: 0,
            cursor: 0,
            flash_mode: FlashMode::Array,
            flash_signature: [0; 8],
            flash_word_ptr: 0,
            status_ptr: 0,
            flash_busy: 0,
            flash_busy_per_op: 2,
            flash_stuck_busy: false,
            cmd_high: None,
            erase_target: None,
            erase_armed: false,
            pending_page: None,
            page_buf: [0xFF; FLASH_PAGE_SIZE],
        }
    }

    /// A cartridge with the given ROM image and no save chip. Addresses
    /// past the image wrap around, mirroring real unmapped space.
    pub fn with_rom(rom: Vec<u8>) -> Self {
        let mut cart = Self::new();
        cart.present = true;
        cart.rom = rom;
        cart
    }

    pub fn attach_sram(&mut self) {
        self.save_chip = SaveChip::Sram;
        self.sram = vec![0; SRAM_SIZE];
    }

    pub fn attach_flashram(&mut self, signature: [u8; 8]) {
        self.save_chip = SaveChip::FlashRam;
        self.flash = vec![0xFF; FLASHRAM_SIZE];
        self.flash_signature = signature;
    }

    /// Value seen on a floating bus (0xFFFF pull-ups, or 0x0000 for the
    /// all-zeros absence sentinel).
    pub fn set_open_bus(&mut self, value: u16) {
        self.open_bus = value;
    }

    /// Pull the cartridge out of the slot.
    pub fn remove(&mut self) {
        self.present = false;
    }

    /// Swap in a different ROM image, as a hot-swap would.
    pub fn set_rom(&mut self, rom: Vec<u8>) {
        self.present = true;
        self.rom = rom;
    }

    /// How many status polls an erase/program stays busy for.
    pub fn set_flash_busy_polls(&mut self, polls: u32) {
        self.flash_busy_per_op = polls;
    }

    /// A chip that never reports ready, for timeout paths.
    pub fn set_flash_stuck_busy(&mut self, stuck: bool) {
        self.flash_stuck_busy = stuck;
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    pub fn sram_mut(&mut self) -> &mut [u8] {
        &mut self.sram
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    // ------------------------------------------------------------------
    // Pin-edge reactions, called by SimBus
    // ------------------------------------------------------------------

    fn latch_high_half(&mut self, word: u16) {
        self.latch_high = word;
    }

    fn latch_low_half(&mut self, word: u16) {
        self.cursor = ((self.latch_high as u32) << 16) | word as u32;

        if self.save_chip == SaveChip::FlashRam && self.in_save_window(self.cursor) {
            match self.flash_mode {
                // The chip treats the latched offset as a *word* index.
                FlashMode::Array => {
                    self.flash_word_ptr = (self.cursor - SRAM_BASE) as usize;
                }
                FlashMode::Status => self.status_ptr = 0,
                FlashMode::Program => {}
            }
        }
    }

    fn in_save_window(&self, addr: u32) -> bool {
        (SRAM_BASE..ROM_BASE).contains(&addr)
    }

    /// Word currently presented on the AD lines while /RD is low.
    fn read_value(&self) -> u16 {
        if !self.present {
            return self.open_bus;
        }

        let addr = self.cursor;
        if addr >= ROM_BASE {
            return self.rom_word((addr - ROM_BASE) as usize);
        }
        if self.in_save_window(addr) {
            return match self.save_chip {
                SaveChip::None => self.open_bus,
                SaveChip::Sram => {
                    let off = (addr - SRAM_BASE) as usize;
                    if off + 1 < self.sram.len() {
                        u16::from_be_bytes([self.sram[off], self.sram[off + 1]])
                    } else {
                        self.open_bus
                    }
                }
                SaveChip::FlashRam => self.flash_read_value(),
            };
        }
        self.open_bus
    }

    fn rom_word(&self, offset: usize) -> u16 {
        if self.rom.is_empty() {
            return self.open_bus;
        }
        let len = self.rom.len();
        u16::from_be_bytes([self.rom[offset % len], self.rom[(offset + 1) % len]])
    }

    fn flash_read_value(&self) -> u16 {
        match self.flash_mode {
            FlashMode::Status => {
                if self.flash_stuck_busy || self.flash_busy > 0 {
                    // Busy chips answer with a not-yet-idle pattern.
                    0x0000
                } else {
                    let p = self.status_ptr % 8;
                    u16::from_be_bytes([
                        self.flash_signature[p],
                        self.flash_signature[(p + 1) % 8],
                    ])
                }
            }
            FlashMode::Array => {
                let off = (self.flash_word_ptr * 2) % self.flash.len();
                u16::from_be_bytes([self.flash[off], self.flash[(off + 1) % self.flash.len()]])
            }
            FlashMode::Program => self.open_bus,
        }
    }

    /// /RD rising edge: the cartridge advances its internal pointer.
    fn advance_read(&mut self) {
        self.cursor = self.cursor.wrapping_add(2);
        if self.save_chip == SaveChip::FlashRam {
            match self.flash_mode {
                FlashMode::Array => self.flash_word_ptr += 1,
                FlashMode::Status => self.status_ptr = (self.status_ptr + 2) % 8,
                FlashMode::Program => {}
            }
        }
    }

    /// /WR rising edge: commit the driven word at the current address.
    fn commit_write(&mut self, value: u16) {
        let addr = self.cursor;
        self.cursor = self.cursor.wrapping_add(2);

        if !self.present || !self.in_save_window(addr) {
            return;
        }

        match self.save_chip {
            SaveChip::None => {}
            SaveChip::Sram => {
                let off = (addr - SRAM_BASE) as usize;
                if off + 1 < self.sram.len() {
                    self.sram[off] = (value >> 8) as u8;
                    self.sram[off + 1] = value as u8;
                }
            }
            SaveChip::FlashRam => self.flash_write(addr - SRAM_BASE, value),
        }
    }

    fn flash_write(&mut self, offset: u32, value: u16) {
        if offset == FLASH_CMD_OFFSET {
            self.cmd_high = Some(value);
        } else if offset == FLASH_CMD_OFFSET + 2 {
            if let Some(high) = self.cmd_high.take() {
                let command = ((high as u32) << 16) | value as u32;
                self.flash_command(command);
            }
        } else if self.flash_mode == FlashMode::Program && (offset as usize) < FLASH_PAGE_SIZE {
            let i = offset as usize;
            self.page_buf[i] = (value >> 8) as u8;
            self.page_buf[i + 1] = value as u8;
        }
        // Plain array writes are ignored, exactly like the real chip — this
        // is what makes an SRAM probe fail on a FlashRAM cartridge.
    }

    fn flash_command(&mut self, command: u32) {
        trace!("flash command {:#010x}", command);
        match command >> 24 {
            0xFF => {
                self.flash_mode = FlashMode::Array;
                self.erase_armed = false;
                self.erase_target = None;
                self.pending_page = None;
            }
            0xF0 => self.flash_mode = FlashMode::Array,
            0xE1 => {
                self.flash_mode = FlashMode::Status;
                self.status_ptr = 0;
                // One status-mode entry ≈ one poll of a busy chip.
                self.flash_busy = self.flash_busy.saturating_sub(1);
            }
            0x4B => self.erase_target = Some((command & 0x00FF_FFFF) << 1),
            0x78 => self.erase_armed = true,
            0xB4 => {
                self.flash_mode = FlashMode::Program;
                self.page_buf = [0xFF; FLASH_PAGE_SIZE];
            }
            0xA5 => self.pending_page = Some(command & 0x03FF),
            0xD2 => self.execute(),
            _ => {}
        }
    }

    fn execute(&mut self) {
        if self.erase_armed {
            if let Some(target) = self.erase_target.take() {
                let base = (target as usize & !(FLASH_BLOCK_SIZE - 1)) % self.flash.len().max(1);
                let end = (base + FLASH_BLOCK_SIZE).min(self.flash.len());
                self.flash[base..end].fill(0xFF);
            }
            self.erase_armed = false;
            self.flash_busy = self.flash_busy_per_op;
        } else if self.flash_mode == FlashMode::Program {
            if let Some(page) = self.pending_page.take() {
                let base = (page as usize * FLASH_PAGE_SIZE) % self.flash.len().max(1);
                self.flash[base..base + FLASH_PAGE_SIZE].copy_from_slice(&self.page_buf);
            }
            self.flash_busy = self.flash_busy_per_op;
        }
    }

    /// Reset line asserted: the chip falls back to array mode.
    fn on_reset(&mut self) {
        self.flash_mode = FlashMode::Array;
        self.cmd_high = None;
        self.erase_armed = false;
        self.erase_target = None;
        self.pending_page = None;
    }
}

impl Default for SimCart {
    fn default() -> Self {
        Self::new()
    }
}

/// [`BusIo`] implementation wired to a shared [`SimCart`].
pub struct SimBus {
    cart: Arc<Mutex<SimCart>>,
    output: bool,
    driven: u16,
    lines_low: CtrlLines,
}

impl SimBus {
    pub fn new(cart: Arc<Mutex<SimCart>>) -> Self {
        Self {
            cart,
            output: false,
            driven: 0,
            lines_low: CtrlLines::empty(),
        }
    }
}

impl BusIo for SimBus {
    fn set_bus_direction(&mut self, output: bool) {
        self.output = output;
        if output {
            // Real hardware parks the driven bus low on direction switch.
            self.driven = 0;
        }
    }

    fn drive_bus(&mut self, value: u16) {
        self.driven = value;
    }

    fn sample_bus(&mut self) -> u16 {
        if self.output {
            return self.driven;
        }
        let cart = self.cart.lock().unwrap();
        if self.lines_low.contains(CtrlLines::RD) {
            cart.read_value()
        } else {
            cart.open_bus
        }
    }

    fn set_control(&mut self, lines: CtrlLines, high: bool) {
        let mut cart = self.cart.lock().unwrap();
        if high {
            let rising = lines & self.lines_low;
            self.lines_low -= lines;
            if rising.contains(CtrlLines::RD) {
                cart.advance_read();
            }
            if rising.contains(CtrlLines::WR) {
                cart.commit_write(self.driven);
            }
        } else {
            let falling = lines - self.lines_low;
            self.lines_low |= lines;
            if falling.contains(CtrlLines::ALE_H) {
                cart.latch_high_half(self.driven);
            }
            if falling.contains(CtrlLines::ALE_L) {
                cart.latch_low_half(self.driven);
            }
            if falling.contains(CtrlLines::RESET) {
                cart.on_reset();
            }
        }
    }

    fn sleep_ms(&mut self, _ms: u32) {}

    fn sleep_us(&mut self, _us: u32) {}
}

/// Simulated Joybus port with an in-memory EEPROM.
pub struct SimJoybus {
    size: usize,
    data: Vec<u8>,
    init_ok: bool,
    corrupt_writes: u32,
}

impl SimJoybus {
    /// `size` is the EEPROM capacity in bytes; 0 simulates no EEPROM.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            data: vec![0; size],
            init_ok: true,
            corrupt_writes: 0,
        }
    }

    /// Make `init()` fail, as a dead serial port would.
    pub fn fail_init(&mut self) {
        self.init_ok = false;
    }

    /// Corrupt the next `count` block writes so verification trips.
    pub fn corrupt_next_writes(&mut self, count: u32) {
        self.corrupt_writes = count;
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl JoybusPort for SimJoybus {
    fn init(&mut self) -> bool {
        self.init_ok
    }

    fn eeprom_size(&self) -> usize {
        self.size
    }

    fn read_block(&mut self, index: u8, buf: &mut [u8; EEPROM_BLOCK_SIZE]) -> bool {
        let start = index as usize * EEPROM_BLOCK_SIZE;
        if start + EEPROM_BLOCK_SIZE > self.size {
            return false;
        }
        buf.copy_from_slice(&self.data[start..start + EEPROM_BLOCK_SIZE]);
        true
    }

    fn write_block(&mut self, index: u8, data: &[u8; EEPROM_BLOCK_SIZE]) -> bool {
        let start = index as usize * EEPROM_BLOCK_SIZE;
        if start + EEPROM_BLOCK_SIZE > self.size {
            return false;
        }
        self.data[start..start + EEPROM_BLOCK_SIZE].copy_from_slice(data);
        if self.corrupt_writes > 0 {
            self.corrupt_writes -= 1;
            self.data[start] ^= 0xFF;
        }
        true
    }
}

/// Host-service stub that counts how often long waits yielded to it.
pub struct SimService {
    hits: Arc<AtomicU32>,
}

impl SimService {
    pub fn new() -> Self {
        Self {
            hits: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Shared counter handle, valid after the service is boxed away.
    pub fn counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.hits)
    }
}

impl Default for SimService {
    fn default() -> Self {
        Self::new()
    }
}

impl HostService for SimService {
    fn service(&mut self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
}
