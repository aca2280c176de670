// pico-pak-rs/src/core/gamepak/mod.rs

//! GamePak (cartridge) aggregator.
//!
//! Owns the bus, the serial save subsystem and everything known about the
//! inserted cartridge: header, detected ROM size, detected save medium and
//! the cached first save page. All byte-range save I/O dispatches through
//! here on the detected media kind.

pub mod eeprom;
pub mod flashram;
pub mod header;
pub mod rom;
pub mod sram;

pub use header::CartridgeHeader;

use crate::core::bus::{AdBus, BusIo, JoybusPort};
use crate::core::{
    HostService, PakError, PakResult, EEPROM_16K_SIZE, EEPROM_4K_SIZE, FLASHRAM_SIZE, HEADER_SIZE,
    SAVE_PAGE_SIZE, SRAM_SIZE,
};
use flashram::FlashStaging;
use log::{debug, info, warn};

/// Non-volatile save media found on N64 GamePaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMediaKind {
    /// No save media present.
    None,
    /// 256 Kbit battery-backed SRAM.
    Sram,
    /// 4 Kbit EEPROM.
    Eeprom4k,
    /// 16 Kbit EEPROM.
    Eeprom16k,
    /// 1 Mbit FlashRAM.
    FlashRam,
    /// Something answered, but not recognizably.
    Unknown,
}

impl SaveMediaKind {
    /// Full capacity of the medium in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            SaveMediaKind::Sram => SRAM_SIZE,
            SaveMediaKind::Eeprom4k => EEPROM_4K_SIZE,
            SaveMediaKind::Eeprom16k => EEPROM_16K_SIZE,
            SaveMediaKind::FlashRam => FLASHRAM_SIZE,
            SaveMediaKind::None | SaveMediaKind::Unknown => 0,
        }
    }
}

impl std::fmt::Display for SaveMediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveMediaKind::None => write!(f, "None"),
            SaveMediaKind::Sram => write!(f, "SRAM  ({} KB)", SRAM_SIZE / 1024),
            SaveMediaKind::Eeprom4k => write!(f, "EEPROM 4 Kbit"),
            SaveMediaKind::Eeprom16k => write!(f, "EEPROM 16 Kbit"),
            SaveMediaKind::FlashRam => write!(f, "FlashRAM ({} KB)", FLASHRAM_SIZE / 1024),
            SaveMediaKind::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Driver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PakState {
    Uninitialized,
    Valid,
    InitFailed,
}

/// Everything detected about the inserted cartridge.
#[derive(Debug, Clone)]
pub struct GamePakInfo {
    pub header: CartridgeHeader,
    pub save_kind: SaveMediaKind,
    pub save_size: usize,
    /// Detected (not declared) ROM size in bytes.
    pub rom_size: u32,
}

/// The GamePak driver instance.
///
/// One instance per physical slot; nothing here is process-global, so test
/// rigs can run several independent instances side by side.
pub struct GamePak {
    bus: AdBus,
    joybus: Box<dyn JoybusPort>,
    service: Box<dyn HostService>,
    state: PakState,
    info: Option<GamePakInfo>,
    page_cache: [u8; SAVE_PAGE_SIZE],
    staging: FlashStaging,
    /// First header word, remembered for hot-swap detection.
    golden_word: u32,
}

impl GamePak {
    pub fn new(
        io: Box<dyn BusIo>,
        joybus: Box<dyn JoybusPort>,
        service: Box<dyn HostService>,
    ) -> Self {
        Self {
            bus: AdBus::new(io),
            joybus,
            service,
            state: PakState::Uninitialized,
            info: None,
            page_cache: [0; SAVE_PAGE_SIZE],
            staging: FlashStaging::new(),
            golden_word: 0,
        }
    }

    /// Full (re)initialization: bus bring-up, cartridge reset, header read,
    /// ROM sizing, save-media probe and page-cache preload.
    pub fn init(&mut self) -> PakResult<()> {
        self.state = PakState::InitFailed;
        self.info = None;
        self.golden_word = 0;
        self.page_cache.fill(0);
        self.staging.reset();

        // Bring up the parallel bus first, while it is quiet.
        self.bus.init();
        self.bus.assert_reset(true);
        self.bus.sleep_ms(5);
        self.bus.assert_reset(false);
        self.bus.sleep_ms(10);

        // Read the full 64-byte header from the ROM.
        let mut raw = [0u8; HEADER_SIZE];
        rom::read_bytes(&mut self.bus, 0, &mut raw)?;
        let header = CartridgeHeader::parse(&raw);

        // An open bus reads back all-ones or all-zeros: no cartridge.
        if header.initial_settings == 0xFFFF_FFFF || header.initial_settings == 0x0000_0000 {
            warn!("no cartridge detected (header word {:#010x})", header.initial_settings);
            return Err(PakError::NoCartridge);
        }

        let rom_size = rom::detect_size(&mut self.bus)?;
        info!(
            "cartridge \"{}\" ({}), ROM {} MiB",
            header.title(),
            header.game_id_str(),
            rom_size / (1024 * 1024)
        );

        let mut info = GamePakInfo {
            header,
            save_kind: SaveMediaKind::None,
            save_size: 0,
            rom_size,
        };

        // The serial subsystem can be electrically noisy, so it comes up
        // only after all ROM reading is done. A dead serial bus is not
        // fatal: ROM-only operation stays valid.
        if self.joybus.init() {
            let (kind, size) = self.detect_save_media();
            info.save_kind = kind;
            info.save_size = size;
        } else {
            warn!("joybus init failed, continuing without save access");
        }
        info!("save media: {}", info.save_kind);

        self.golden_word = info.header.initial_settings;
        self.info = Some(info);
        self.state = PakState::Valid;
        self.refresh_page_cache();
        Ok(())
    }

    /// Probe save media in fixed priority order: SRAM, then EEPROM, then
    /// FlashRAM. First positive detection wins.
    fn detect_save_media(&mut self) -> (SaveMediaKind, usize) {
        if sram::detect(&mut self.bus) {
            debug!("probe: SRAM detected");
            return (SaveMediaKind::Sram, SRAM_SIZE);
        }

        let eeprom_size = self.joybus.eeprom_size();
        if eeprom_size > 0 {
            debug!("probe: EEPROM detected ({} bytes)", eeprom_size);
            let kind = if eeprom_size == EEPROM_16K_SIZE {
                SaveMediaKind::Eeprom16k
            } else {
                SaveMediaKind::Eeprom4k
            };
            return (kind, eeprom_size);
        }

        if flashram::detect(&mut self.bus, self.service.as_mut()) {
            debug!("probe: FlashRAM detected");
            return (SaveMediaKind::FlashRam, FLASHRAM_SIZE);
        }

        (SaveMediaKind::None, 0)
    }

    /// Re-read the first save page from the active medium into the cache.
    /// Called after every write that touches the first 512 bytes; the cache
    /// is write-through, never authoritative.
    fn refresh_page_cache(&mut self) {
        let mut page = [0u8; SAVE_PAGE_SIZE];
        let result = match self.save_kind() {
            SaveMediaKind::Sram => sram::read_bytes(&mut self.bus, 0, &mut page),
            SaveMediaKind::Eeprom4k | SaveMediaKind::Eeprom16k => {
                eeprom::read_bytes(self.joybus.as_mut(), 0, &mut page)
            }
            SaveMediaKind::FlashRam => {
                flashram::read_bytes(&mut self.bus, self.service.as_mut(), 0, &mut page)
            }
            SaveMediaKind::None | SaveMediaKind::Unknown => return,
        };
        match result {
            Ok(()) => self.page_cache = page,
            Err(err) => warn!("save page cache refresh failed: {}", err),
        }
    }

    // ------------------------------------------------------------------
    // Status and accessors
    // ------------------------------------------------------------------

    pub fn state(&self) -> PakState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == PakState::Valid
    }

    /// Lightweight hot-swap check: compare the remembered header word
    /// against a fresh read. On mismatch, callers should re-run `init()`
    /// before retrying anything else.
    pub fn is_present(&mut self) -> bool {
        if self.golden_word == 0 {
            return false;
        }
        let word1 = rom::read_word(&mut self.bus, 0);
        let word2 = rom::read_word(&mut self.bus, 2);
        let current = ((word1 as u32) << 16) | word2 as u32;
        current == self.golden_word
    }

    pub fn info(&self) -> Option<&GamePakInfo> {
        self.info.as_ref()
    }

    pub fn header(&self) -> Option<&CartridgeHeader> {
        self.info.as_ref().map(|i| &i.header)
    }

    /// Trimmed game title, empty when no cartridge is initialized.
    pub fn title(&self) -> String {
        self.header().map(|h| h.title()).unwrap_or_default()
    }

    pub fn game_id(&self) -> String {
        self.header().map(|h| h.game_id_str()).unwrap_or_default()
    }

    pub fn version(&self) -> u8 {
        self.header().map(|h| h.version).unwrap_or(0)
    }

    pub fn crc1(&self) -> u32 {
        self.header().map(|h| h.crc1).unwrap_or(0)
    }

    pub fn crc2(&self) -> u32 {
        self.header().map(|h| h.crc2).unwrap_or(0)
    }

    pub fn save_kind(&self) -> SaveMediaKind {
        self.info
            .as_ref()
            .map(|i| i.save_kind)
            .unwrap_or(SaveMediaKind::None)
    }

    pub fn save_size(&self) -> usize {
        self.info.as_ref().map(|i| i.save_size).unwrap_or(0)
    }

    pub fn rom_size(&self) -> u32 {
        self.info.as_ref().map(|i| i.rom_size).unwrap_or(0)
    }

    /// The cached first save page. Read-mostly callers use this instead of
    /// re-running the device protocol for small repeated reads.
    pub fn save_page(&self) -> Option<&[u8]> {
        self.is_valid().then_some(&self.page_cache[..])
    }

    /// Multi-line cartridge summary, the text hosts expose as an info file.
    pub fn info_text(&self) -> String {
        match self.info.as_ref() {
            Some(info) => format!(
                "--- N64 Cartridge Info ---\r\n\r\n\
                 Title: {}\r\nID:    {}\r\nSave:  {}\r\n\
                 CRC1:  {:08X}\r\nCRC2:  {:08X}\r\n",
                info.header.title(),
                info.header.game_id_str(),
                info.save_kind,
                info.header.crc1,
                info.header.crc2
            ),
            None => {
                "--- GamePak Error! ---\r\n\r\nCartridge not detected.\r\n".to_string()
            }
        }
    }

    // ------------------------------------------------------------------
    // ROM access
    // ------------------------------------------------------------------

    pub fn read_rom_bytes(&mut self, offset: u32, buf: &mut [u8]) -> PakResult<()> {
        self.ensure_valid()?;
        rom::read_bytes(&mut self.bus, offset, buf)
    }

    /// CRC-32 of the first `len` ROM bytes, for host-side dump verification.
    pub fn compute_rom_crc32(&mut self, len: u32) -> PakResult<u32> {
        self.ensure_valid()?;
        rom::crc32(&mut self.bus, len)
    }

    // ------------------------------------------------------------------
    // Save access, per medium
    // ------------------------------------------------------------------

    pub fn read_sram_bytes(&mut self, offset: u32, buf: &mut [u8]) -> PakResult<()> {
        self.ensure_media(SaveMediaKind::Sram)?;
        sram::read_bytes(&mut self.bus, offset, buf)
    }

    pub fn write_sram_bytes(&mut self, offset: u32, data: &[u8]) -> PakResult<()> {
        self.ensure_media(SaveMediaKind::Sram)?;
        sram::write_bytes(&mut self.bus, offset, data)?;
        self.refresh_after_write(offset);
        Ok(())
    }

    pub fn read_eeprom_bytes(&mut self, offset: u32, buf: &mut [u8]) -> PakResult<()> {
        self.ensure_eeprom()?;
        eeprom::read_bytes(self.joybus.as_mut(), offset, buf)
    }

    pub fn write_and_verify_eeprom_bytes(&mut self, offset: u32, data: &[u8]) -> PakResult<()> {
        self.ensure_eeprom()?;
        eeprom::write_and_verify(self.joybus.as_mut(), offset, data)?;
        self.refresh_after_write(offset);
        Ok(())
    }

    pub fn read_flashram_bytes(&mut self, offset: u32, buf: &mut [u8]) -> PakResult<()> {
        self.ensure_media(SaveMediaKind::FlashRam)?;
        flashram::read_bytes(&mut self.bus, self.service.as_mut(), offset, buf)
    }

    pub fn write_flashram_bytes(&mut self, offset: u32, data: &[u8]) -> PakResult<()> {
        self.ensure_media(SaveMediaKind::FlashRam)?;
        flashram::write_bytes(&mut self.bus, self.service.as_mut(), offset, data)?;
        self.refresh_after_write(offset);
        Ok(())
    }

    /// Stage one 512-byte sector of a streamed FlashRAM write. The block is
    /// erased, programmed and verified automatically once all 256 sectors
    /// have arrived; until then the page cache may lag the staged data.
    pub fn write_flashram_sector(&mut self, offset: u32, sector: &[u8]) -> PakResult<()> {
        self.ensure_media(SaveMediaKind::FlashRam)?;

        if !self.staging.stage(offset, sector)? {
            return Ok(());
        }

        debug!("FlashRAM staging complete, committing block");
        let result =
            flashram::program_block(&mut self.bus, self.service.as_mut(), 0, self.staging.block());
        self.staging.reset();
        result?;

        self.refresh_page_cache();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Save access, dispatched on the detected medium
    // ------------------------------------------------------------------

    /// Byte-range save read routed to whatever medium was detected.
    pub fn read_save_bytes(&mut self, offset: u32, buf: &mut [u8]) -> PakResult<()> {
        match self.save_kind() {
            SaveMediaKind::Sram => self.read_sram_bytes(offset, buf),
            SaveMediaKind::Eeprom4k | SaveMediaKind::Eeprom16k => {
                self.read_eeprom_bytes(offset, buf)
            }
            SaveMediaKind::FlashRam => self.read_flashram_bytes(offset, buf),
            SaveMediaKind::None | SaveMediaKind::Unknown => Err(PakError::NotDetected),
        }
    }

    /// Byte-range save write routed to whatever medium was detected.
    pub fn write_save_bytes(&mut self, offset: u32, data: &[u8]) -> PakResult<()> {
        match self.save_kind() {
            SaveMediaKind::Sram => self.write_sram_bytes(offset, data),
            SaveMediaKind::Eeprom4k | SaveMediaKind::Eeprom16k => {
                self.write_and_verify_eeprom_bytes(offset, data)
            }
            SaveMediaKind::FlashRam => self.write_flashram_bytes(offset, data),
            SaveMediaKind::None | SaveMediaKind::Unknown => Err(PakError::NotDetected),
        }
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn ensure_valid(&self) -> PakResult<()> {
        if self.state == PakState::Valid {
            Ok(())
        } else {
            Err(PakError::NoCartridge)
        }
    }

    fn ensure_media(&self, kind: SaveMediaKind) -> PakResult<()> {
        self.ensure_valid()?;
        if self.save_kind() == kind {
            Ok(())
        } else {
            Err(PakError::NotDetected)
        }
    }

    fn ensure_eeprom(&self) -> PakResult<()> {
        self.ensure_valid()?;
        match self.save_kind() {
            SaveMediaKind::Eeprom4k | SaveMediaKind::Eeprom16k => Ok(()),
            _ => Err(PakError::NotDetected),
        }
    }

    /// Keep the 512-byte cache coherent after a save write.
    fn refresh_after_write(&mut self, offset: u32) {
        if (offset as usize) < SAVE_PAGE_SIZE {
            self.refresh_page_cache();
        }
    }
}
