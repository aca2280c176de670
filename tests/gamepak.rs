//! End-to-end GamePak tests over the pin-level simulated cartridge.

use pico_pak_rs::core::gamepak::flashram::{FLASH_SECTOR_COUNT, FLASH_SECTOR_SIZE, IDLE_MN63F81, IDLE_MX29L1100};
use pico_pak_rs::core::{EEPROM_16K_SIZE, EEPROM_4K_SIZE, FLASHRAM_SIZE, SRAM_SIZE};
use pico_pak_rs::sim::{SimBus, SimCart, SimJoybus, SimService};
use pico_pak_rs::utils::Crc32;
use pico_pak_rs::{GamePak, NullService, PakError, SaveMediaKind};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

/// Build a 1 MiB ROM image with a valid header and non-repeating body.
fn rom_image() -> Vec<u8> {
    let mut rom = vec![0u8; 1024 * 1024];

    let mut state = 0xC0FF_EE00u32;
    for byte in rom.iter_mut() {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        *byte = (state >> 24) as u8;
    }

    rom[0x00..0x04].copy_from_slice(&0x8037_1240u32.to_be_bytes());
    rom[0x10..0x14].copy_from_slice(&0x1234_5678u32.to_be_bytes());
    rom[0x14..0x18].copy_from_slice(&0x9ABC_DEF0u32.to_be_bytes());
    rom[0x20..0x34].copy_from_slice(b"PAK DRIVER TEST     ");
    rom[0x3B..0x3F].copy_from_slice(b"NPDT");
    rom[0x3F] = 0x01;
    rom
}

fn pak_with(cart: SimCart, joybus: SimJoybus) -> (Arc<Mutex<SimCart>>, GamePak) {
    let cart = Arc::new(Mutex::new(cart));
    let bus = SimBus::new(Arc::clone(&cart));
    let pak = GamePak::new(Box::new(bus), Box::new(joybus), Box::new(NullService));
    (cart, pak)
}

#[test]
fn init_reads_header_and_sizes_rom() {
    let (_cart, mut pak) = pak_with(SimCart::with_rom(rom_image()), SimJoybus::new(0));
    pak.init().unwrap();

    assert!(pak.is_valid());
    assert_eq!(pak.title(), "PAK DRIVER TEST");
    assert_eq!(pak.game_id(), "NPDT");
    assert_eq!(pak.version(), 0x01);
    assert_eq!(pak.crc1(), 0x1234_5678);
    assert_eq!(pak.crc2(), 0x9ABC_DEF0);
    assert_eq!(pak.rom_size(), 1024 * 1024);
    assert_eq!(pak.save_kind(), SaveMediaKind::None);
}

#[test]
fn header_read_is_idempotent() {
    let (_cart, mut pak) = pak_with(SimCart::with_rom(rom_image()), SimJoybus::new(0));
    pak.init().unwrap();

    let mut first = [0u8; 64];
    let mut second = [0u8; 64];
    pak.read_rom_bytes(0, &mut first).unwrap();
    pak.read_rom_bytes(0, &mut second).unwrap();
    assert_eq!(first, second);
}

#[test]
fn open_bus_sentinels_fail_init() {
    for open_bus in [0xFFFFu16, 0x0000] {
        let mut cart = SimCart::new();
        cart.set_open_bus(open_bus);
        let (_cart, mut pak) = pak_with(cart, SimJoybus::new(0));

        assert_eq!(pak.init(), Err(PakError::NoCartridge));
        assert!(!pak.is_valid());
        assert!(pak.info().is_none());
        // Operations refuse to touch the bus in this state.
        let mut buf = [0u8; 2];
        assert_eq!(pak.read_rom_bytes(0, &mut buf), Err(PakError::NoCartridge));
    }
}

#[test]
fn rom_crc_matches_image() {
    let rom = rom_image();
    let (_cart, mut pak) = pak_with(SimCart::with_rom(rom.clone()), SimJoybus::new(0));
    pak.init().unwrap();

    let expected = Crc32::new().compute(&rom[..4096]);
    assert_eq!(pak.compute_rom_crc32(4096).unwrap(), expected);
}

#[test]
fn sram_cart_round_trips_and_caches_first_page() {
    let mut cart = SimCart::with_rom(rom_image());
    cart.attach_sram();
    cart.sram_mut()[0] = 0x11; // keep the base word off the open-bus sentinel
    let (cart, mut pak) = pak_with(cart, SimJoybus::new(0));
    pak.init().unwrap();

    assert_eq!(pak.save_kind(), SaveMediaKind::Sram);
    assert_eq!(pak.save_size(), SRAM_SIZE);

    let data: Vec<u8> = (0u16..256).map(|i| (i ^ 0x5A) as u8).collect();
    pak.write_sram_bytes(0x20, &data).unwrap();

    let mut back = vec![0u8; data.len()];
    pak.read_sram_bytes(0x20, &mut back).unwrap();
    assert_eq!(back, data);

    // Write touched the first 512 bytes, so the page cache must be fresh.
    let page = pak.save_page().unwrap();
    assert_eq!(&page[0x20..0x20 + data.len()], &data[..]);

    // The simulated chip really holds the bytes.
    assert_eq!(&cart.lock().unwrap().sram()[0x20..0x20 + data.len()], &data[..]);
}

#[test]
fn probe_priority_prefers_sram_over_eeprom() {
    let mut cart = SimCart::with_rom(rom_image());
    cart.attach_sram();
    cart.sram_mut()[0] = 0x22;
    // EEPROM answers too; SRAM must still win.
    let (_cart, mut pak) = pak_with(cart, SimJoybus::new(EEPROM_4K_SIZE));
    pak.init().unwrap();

    assert_eq!(pak.save_kind(), SaveMediaKind::Sram);
}

#[test]
fn eeprom_size_selects_kind() {
    let (_cart, mut pak) = pak_with(SimCart::with_rom(rom_image()), SimJoybus::new(EEPROM_4K_SIZE));
    pak.init().unwrap();
    assert_eq!(pak.save_kind(), SaveMediaKind::Eeprom4k);
    assert_eq!(pak.save_size(), EEPROM_4K_SIZE);

    let (_cart, mut pak) = pak_with(SimCart::with_rom(rom_image()), SimJoybus::new(EEPROM_16K_SIZE));
    pak.init().unwrap();
    assert_eq!(pak.save_kind(), SaveMediaKind::Eeprom16k);
    assert_eq!(pak.save_size(), pak.save_kind().size_bytes());
}

#[test]
fn eeprom_write_preserves_block_neighbors() {
    let (_cart, mut pak) = pak_with(SimCart::with_rom(rom_image()), SimJoybus::new(EEPROM_4K_SIZE));
    pak.init().unwrap();

    let base: Vec<u8> = (0..32u8).collect();
    pak.write_and_verify_eeprom_bytes(0, &base).unwrap();

    // Unaligned write straddling blocks 1 and 2.
    pak.write_and_verify_eeprom_bytes(13, &[0xE1, 0xE2, 0xE3, 0xE4]).unwrap();

    let mut back = [0u8; 32];
    pak.read_eeprom_bytes(0, &mut back).unwrap();
    assert_eq!(&back[..13], &base[..13]);
    assert_eq!(&back[13..17], &[0xE1, 0xE2, 0xE3, 0xE4]);
    assert_eq!(&back[17..], &base[17..]);
}

#[test]
fn joybus_failure_leaves_rom_only_operation() {
    let mut joybus = SimJoybus::new(EEPROM_4K_SIZE);
    joybus.fail_init();
    let (_cart, mut pak) = pak_with(SimCart::with_rom(rom_image()), joybus);

    pak.init().unwrap();
    assert!(pak.is_valid());
    assert_eq!(pak.save_kind(), SaveMediaKind::None);

    let mut buf = [0u8; 8];
    assert_eq!(pak.read_save_bytes(0, &mut buf), Err(PakError::NotDetected));
    // ROM access still works.
    pak.read_rom_bytes(0, &mut buf).unwrap();
}

#[test]
fn flashram_cart_is_detected_for_each_vendor() {
    for signature in [IDLE_MX29L1100, IDLE_MN63F81] {
        let mut cart = SimCart::with_rom(rom_image());
        cart.attach_flashram(signature);
        let (_cart, mut pak) = pak_with(cart, SimJoybus::new(0));
        pak.init().unwrap();

        assert_eq!(pak.save_kind(), SaveMediaKind::FlashRam);
        assert_eq!(pak.save_size(), FLASHRAM_SIZE);
    }
}

#[test]
fn flashram_write_round_trips_and_preserves_block() {
    let mut cart = SimCart::with_rom(rom_image());
    cart.attach_flashram(IDLE_MX29L1100);
    let (cart, mut pak) = pak_with(cart, SimJoybus::new(0));

    {
        let mut cart = cart.lock().unwrap();
        for (i, byte) in cart.flash_mut().iter_mut().enumerate() {
            *byte = (i % 7) as u8;
        }
    }
    pak.init().unwrap();
    let before = cart.lock().unwrap().flash().to_vec();

    let data: Vec<u8> = (0..200u8).collect();
    pak.write_flashram_bytes(0x2000, &data).unwrap();

    let mut back = vec![0u8; data.len()];
    pak.read_flashram_bytes(0x2000, &mut back).unwrap();
    assert_eq!(back, data);

    // Bytes of the block outside the written range kept their old values.
    let after = cart.lock().unwrap().flash().to_vec();
    assert_eq!(&after[..0x2000], &before[..0x2000]);
    assert_eq!(&after[0x2000 + data.len()..], &before[0x2000 + data.len()..]);
}

#[test]
fn flashram_streamed_sectors_commit_once_complete() {
    let mut cart = SimCart::with_rom(rom_image());
    cart.attach_flashram(IDLE_MX29L1100);
    let (cart, mut pak) = pak_with(cart, SimJoybus::new(0));
    pak.init().unwrap();

    // Stream sectors 255..1 first; sector 0 arrives last.
    let sector_value = |index: usize| (index as u8) ^ 0xA5;
    for index in (1..FLASH_SECTOR_COUNT).rev() {
        let sector = vec![sector_value(index); FLASH_SECTOR_SIZE];
        pak.write_flashram_sector((index * FLASH_SECTOR_SIZE) as u32, &sector)
            .unwrap();
    }

    // Incomplete block: staging must not have touched the chip yet.
    assert!(cart.lock().unwrap().flash().iter().all(|&b| b == 0xFF));

    let sector = vec![sector_value(0); FLASH_SECTOR_SIZE];
    pak.write_flashram_sector(0, &sector).unwrap();

    // Final sector triggered erase + program + verify of the whole block.
    let flash = cart.lock().unwrap().flash().to_vec();
    for index in 0..FLASH_SECTOR_COUNT {
        assert!(flash[index * FLASH_SECTOR_SIZE..(index + 1) * FLASH_SECTOR_SIZE]
            .iter()
            .all(|&b| b == sector_value(index)));
    }
}

#[test]
fn flashram_waits_keep_servicing_the_host() {
    let mut cart = SimCart::with_rom(rom_image());
    cart.attach_flashram(IDLE_MX29L1100);
    cart.set_flash_busy_polls(5);

    let cart = Arc::new(Mutex::new(cart));
    let service = SimService::new();
    let hits = service.counter();
    let mut pak = GamePak::new(
        Box::new(SimBus::new(Arc::clone(&cart))),
        Box::new(SimJoybus::new(0)),
        Box::new(service),
    );
    pak.init().unwrap();

    hits.store(0, Ordering::Relaxed);
    pak.write_flashram_bytes(0, &[0xAB; 64]).unwrap();
    assert!(hits.load(Ordering::Relaxed) > 0);
}

#[test]
fn hot_swap_is_noticed_by_presence_check() {
    let (cart, mut pak) = pak_with(SimCart::with_rom(rom_image()), SimJoybus::new(0));
    pak.init().unwrap();
    assert!(pak.is_present());

    // Pulling the cart makes the golden word unreadable.
    cart.lock().unwrap().remove();
    assert!(!pak.is_present());

    // A different cartridge has a different first word pair.
    let mut other = rom_image();
    other[0x00..0x04].copy_from_slice(&0x8037_0044u32.to_be_bytes());
    cart.lock().unwrap().set_rom(other);
    assert!(!pak.is_present());

    // Re-init recovers.
    pak.init().unwrap();
    assert!(pak.is_present());
}

#[test]
fn save_dispatch_routes_by_detected_kind() {
    let mut cart = SimCart::with_rom(rom_image());
    cart.attach_sram();
    cart.sram_mut()[0] = 0x33;
    let (_cart, mut pak) = pak_with(cart, SimJoybus::new(0));
    pak.init().unwrap();

    pak.write_save_bytes(0x100, &[0xCA, 0xFE]).unwrap();
    let mut back = [0u8; 2];
    pak.read_save_bytes(0x100, &mut back).unwrap();
    assert_eq!(back, [0xCA, 0xFE]);

    // The wrong per-medium entry point is refused.
    assert_eq!(
        pak.read_flashram_bytes(0, &mut back),
        Err(PakError::NotDetected)
    );
}

#[test]
fn info_text_summarizes_the_cartridge() {
    let (_cart, mut pak) = pak_with(SimCart::with_rom(rom_image()), SimJoybus::new(EEPROM_4K_SIZE));
    pak.init().unwrap();

    let text = pak.info_text();
    assert!(text.contains("Title: PAK DRIVER TEST"));
    assert!(text.contains("ID:    NPDT"));
    assert!(text.contains("Save:  EEPROM 4 Kbit"));
    assert!(text.contains("CRC1:  12345678"));

    let (_cart, mut pak) = pak_with(SimCart::new(), SimJoybus::new(0));
    let _ = pak.init();
    assert!(pak.info_text().contains("Cartridge not detected"));
}
