// pico-pak-rs/src/core/gamepak/eeprom.rs

//! EEPROM driver. The chip only speaks 8-byte Joybus blocks, so arbitrary
//! byte ranges are decomposed into straddled blocks here. Writes are
//! read-merge-write with mandatory read-back verification; EEPROM
//! transfers are the least reliable of the three save paths.

use crate::core::bus::joybus::{JoybusPort, EEPROM_BLOCK_SIZE};
use crate::core::{PakError, PakResult};
use log::{debug, warn};

/// Write attempts per block before the whole operation fails.
const WRITE_RETRIES: u32 = 3;

/// Fill `buf` from EEPROM starting at byte `offset`.
pub fn read_bytes(port: &mut dyn JoybusPort, offset: u32, buf: &mut [u8]) -> PakResult<()> {
    check_range(port, offset, buf.len())?;

    let mut block = [0u8; EEPROM_BLOCK_SIZE];
    let mut done = 0usize;
    while done < buf.len() {
        let addr = offset as usize + done;
        let index = (addr / EEPROM_BLOCK_SIZE) as u8;
        let start = addr % EEPROM_BLOCK_SIZE;

        if !port.read_block(index, &mut block) {
            return Err(PakError::NotDetected);
        }

        let take = (EEPROM_BLOCK_SIZE - start).min(buf.len() - done);
        buf[done..done + take].copy_from_slice(&block[start..start + take]);
        done += take;
    }
    Ok(())
}

/// Write `data` to EEPROM starting at byte `offset`, verifying every block.
///
/// Each straddled block is read, the caller's bytes are spliced in at the
/// right offset, and the merged block is written back and re-read. Up to
/// three attempts per block; a block that never verifies fails the whole
/// operation.
pub fn write_and_verify(port: &mut dyn JoybusPort, offset: u32, data: &[u8]) -> PakResult<()> {
    check_range(port, offset, data.len())?;

    let mut src = 0usize;
    while src < data.len() {
        let addr = offset as usize + src;
        let index = (addr / EEPROM_BLOCK_SIZE) as u8;
        let start = addr % EEPROM_BLOCK_SIZE;
        let take = (EEPROM_BLOCK_SIZE - start).min(data.len() - src);

        // Read the existing block and merge the caller's bytes into it.
        let mut shadow = [0u8; EEPROM_BLOCK_SIZE];
        if !port.read_block(index, &mut shadow) {
            return Err(PakError::NotDetected);
        }
        shadow[start..start + take].copy_from_slice(&data[src..src + take]);

        // Write + verify with bounded retries.
        let mut ok = false;
        for attempt in 0..WRITE_RETRIES {
            if !port.write_block(index, &shadow) {
                continue;
            }
            let mut verify = [0u8; EEPROM_BLOCK_SIZE];
            if !port.read_block(index, &mut verify) {
                continue;
            }
            if verify == shadow {
                ok = true;
                break;
            }
            debug!("EEPROM block {} verify mismatch, attempt {}", index, attempt + 1);
        }
        if !ok {
            warn!("EEPROM block {} failed verification after {} attempts", index, WRITE_RETRIES);
            return Err(PakError::VerifyFailed);
        }

        src += take;
    }
    Ok(())
}

fn check_range(port: &dyn JoybusPort, offset: u32, len: usize) -> PakResult<()> {
    let size = port.eeprom_size();
    if size == 0 {
        return Err(PakError::NotDetected);
    }
    if offset as usize + len > size {
        return Err(PakError::OutOfRange);
    }
    Ok(())
}
