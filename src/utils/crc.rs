// pico-pak-rs/src/utils/crc.rs

//! Table-driven CRC-32/IEEE, used for host-side dump verification.
//!
//! The 256-entry table is computed once at construction and owned by the
//! value, so there is no hidden global and no first-use initialization
//! check on the hot path.

/// CRC-32/IEEE: polynomial 0xEDB88320 (reflected), init and final XOR all-ones.
pub struct Crc32 {
    table: [u32; 256],
}

impl Crc32 {
    pub fn new() -> Self {
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut r = i as u32;
            for _ in 0..8 {
                r = if r & 1 != 0 { (r >> 1) ^ 0xEDB8_8320 } else { r >> 1 };
            }
            *entry = r;
        }
        Self { table }
    }

    /// Continue a running CRC over `data`. The raw register is passed
    /// through so large inputs can be streamed: seed with `!0`, feed the
    /// chunks, invert the final state.
    pub fn update(&self, mut state: u32, data: &[u8]) -> u32 {
        for &byte in data {
            let index = ((state as u8) ^ byte) as usize;
            state = self.table[index] ^ (state >> 8);
        }
        state
    }

    /// CRC of a complete message.
    pub fn compute(&self, data: &[u8]) -> u32 {
        !self.update(!0, data)
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}
