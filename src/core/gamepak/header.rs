// pico-pak-rs/src/core/gamepak/header.rs

//! The 64-byte cartridge header at ROM offset 0.

use crate::core::HEADER_SIZE;

/// Exact on-cart header layout, decoded from the big-endian wire bytes.
///
/// Immutable once read; a fresh instance is parsed on every (re)init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartridgeHeader {
    pub initial_settings: u32, // 0x00: PI_BSB/PI_BSD initial settings (e.g. 0x80371240)
    pub clock_rate: u32,       // 0x04: clock rate override (0 = default)
    pub pc_start: u32,         // 0x08: entry point (RAM address)
    pub release_addr: u32,     // 0x0C: release (warm-reset) address
    pub crc1: u32,             // 0x10
    pub crc2: u32,             // 0x14
    pub title: [u8; 20],       // 0x20: internal name (ASCII/Shift-JIS, space-padded)
    pub game_id: [u8; 4],      // 0x3B: "CZGE", "NGEE", etc.
    pub version: u8,           // 0x3F: cart revision (often 0x00)
    raw: [u8; HEADER_SIZE],
}

impl CartridgeHeader {
    /// Decode a header from the raw 64 bytes read off the bus.
    pub fn parse(raw: &[u8; HEADER_SIZE]) -> Self {
        let word = |off: usize| u32::from_be_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]]);

        let mut title = [0u8; 20];
        title.copy_from_slice(&raw[0x20..0x34]);
        let mut game_id = [0u8; 4];
        game_id.copy_from_slice(&raw[0x3B..0x3F]);

        Self {
            initial_settings: word(0x00),
            clock_rate: word(0x04),
            pc_start: word(0x08),
            release_addr: word(0x0C),
            crc1: word(0x10),
            crc2: word(0x14),
            title,
            game_id,
            version: raw[0x3F],
            raw: *raw,
        }
    }

    /// Game title with trailing space padding removed. Non-ASCII bytes
    /// (Shift-JIS titles exist) are replaced, not dropped.
    pub fn title(&self) -> String {
        let text = String::from_utf8_lossy(&self.title);
        text.trim_end_matches(' ').to_string()
    }

    /// The 4-character game ID as text.
    pub fn game_id_str(&self) -> String {
        String::from_utf8_lossy(&self.game_id).into_owned()
    }

    /// The raw 64 bytes exactly as read from the cartridge.
    pub fn raw(&self) -> &[u8; HEADER_SIZE] {
        &self.raw
    }
}
