// pico-pak-rs/src/core/bus/mod.rs

//! Low-level 16-bit multiplexed address/data bus for N64 cartridges.
//!
//! The cartridge shares 16 lines between address and data, sequenced by two
//! address-latch strobes (high/low half) plus read and write strobes. This
//! module owns that sequencing; the pin-level register accesses live behind
//! [`BusIo`] so the same driver runs against real GPIO or a simulated cart.

pub mod joybus;

pub use joybus::JoybusPort;

use bitflags::bitflags;
use log::trace;

/// Address setup/hold delay, in calibrated busy-wait units.
pub const LATCH_DELAY_NOPS: u32 = 7;
/// Bus turnaround delay after releasing the AD lines to the cartridge.
pub const TURNAROUND_NOPS: u32 = 4;
/// Read access delay; must exceed the worst-case cartridge access time.
pub const READ_ACCESS_NOPS: u32 = 55;
/// Width of the /WR low pulse.
pub const WRITE_PULSE_NOPS: u32 = 25;

bitflags! {
    /// Control lines of the cartridge bus. All are active-low on the wire;
    /// "high" therefore means inactive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CtrlLines: u8 {
        const WR    = 1 << 0;
        const RD    = 1 << 1;
        const ALE_H = 1 << 2;
        const ALE_L = 1 << 3;
        const RESET = 1 << 4;
    }
}

impl CtrlLines {
    /// The four bus strobes, excluding the reset line.
    pub const STROBES: CtrlLines = CtrlLines::WR
        .union(CtrlLines::RD)
        .union(CtrlLines::ALE_H)
        .union(CtrlLines::ALE_L);
}

/// Pin-level seam between the bus driver and the MCU's GPIO block.
///
/// Implementations must switch, drive and sample the 16 AD lines as one
/// group (a single register write/read on real hardware) — per-pin updates
/// would glitch the bus mid-cycle.
pub trait BusIo {
    /// Reconfigure all 16 AD lines at once: driven-low outputs when `output`
    /// is true, pulled-up inputs otherwise.
    fn set_bus_direction(&mut self, output: bool);

    /// Drive a value onto the AD lines. Only meaningful in output direction.
    fn drive_bus(&mut self, value: u16);

    /// Sample all 16 AD lines in one atomic read.
    fn sample_bus(&mut self) -> u16;

    /// Drive the given control lines high (inactive) or low (asserted).
    fn set_control(&mut self, lines: CtrlLines, high: bool);

    fn sleep_ms(&mut self, ms: u32);

    fn sleep_us(&mut self, us: u32);
}

/// Calibrated busy-wait. The counts above are tuned against the MCU clock;
/// porting to a different clock speed means recalibrating them.
#[inline]
pub fn delay_nops(count: u32) {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "arm")] {
            for _ in 0..count {
                unsafe { std::arch::asm!("nop") };
            }
        } else {
            for _ in 0..count {
                std::hint::spin_loop();
            }
        }
    }
}

/// Driver for the multiplexed address/data bus.
///
/// Owns the strobe sequencing for every bus cycle. None of these operations
/// can fail: a missing cartridge simply reads back as all-ones (pull-ups)
/// or all-zeros, which higher layers treat as an absence sentinel.
pub struct AdBus {
    io: Box<dyn BusIo>,
}

impl AdBus {
    pub fn new(io: Box<dyn BusIo>) -> Self {
        Self { io }
    }

    /// Park every control line inactive and release the AD lines to the
    /// cartridge. Called once before the first bus cycle.
    pub fn init(&mut self) {
        self.io
            .set_control(CtrlLines::STROBES | CtrlLines::RESET, true);
        self.io.set_bus_direction(false);
    }

    /// Latch a 32-bit address into the cartridge, high half then low half.
    ///
    /// The ALE strobes are left asserted on purpose: the cartridge captures
    /// on the falling edge, and the lines return inactive at the start of
    /// the next bus operation.
    pub fn latch_address(&mut self, addr: u32) {
        trace!("latch address {addr:#010x}");

        // Ensure all control lines are inactive before starting the sequence.
        self.io.set_control(CtrlLines::STROBES, true);
        self.io.set_bus_direction(true);

        self.latch_half((addr >> 16) as u16, CtrlLines::ALE_H);
        self.latch_half(addr as u16, CtrlLines::ALE_L);

        // Release the bus back to the cartridge.
        self.io.set_bus_direction(false);
        delay_nops(TURNAROUND_NOPS);
    }

    fn latch_half(&mut self, word: u16, line: CtrlLines) {
        self.io.drive_bus(word);
        delay_nops(LATCH_DELAY_NOPS); // address setup time
        self.io.set_control(line, false);
        delay_nops(LATCH_DELAY_NOPS); // hold time
    }

    /// One read cycle at the currently latched address. The cartridge
    /// auto-increments its internal pointer, so consecutive calls stream
    /// sequential words without re-latching.
    pub fn read_word(&mut self) -> u16 {
        self.io.set_control(CtrlLines::RD, false);
        delay_nops(READ_ACCESS_NOPS);

        let word = self.io.sample_bus();

        self.io.set_control(CtrlLines::RD, true);
        delay_nops(LATCH_DELAY_NOPS);
        word
    }

    /// One write cycle at the currently latched address.
    pub fn write_word(&mut self, data: u16) {
        self.io.set_bus_direction(true);
        self.io.drive_bus(data);
        delay_nops(LATCH_DELAY_NOPS);

        self.io.set_control(CtrlLines::WR, false);
        delay_nops(WRITE_PULSE_NOPS);
        self.io.set_control(CtrlLines::WR, true);

        delay_nops(LATCH_DELAY_NOPS);
        self.io.set_bus_direction(false);
    }

    /// Drive the cartridge reset line. Release settles far longer than
    /// assert, matching the cartridge's power-up behavior.
    pub fn assert_reset(&mut self, active: bool) {
        if active {
            self.io.set_control(CtrlLines::RESET, false);
            self.io.sleep_ms(20);
        } else {
            self.io.set_control(CtrlLines::RESET, true);
            self.io.sleep_ms(150);
        }
    }

    pub fn sleep_ms(&mut self, ms: u32) {
        self.io.sleep_ms(ms);
    }

    pub fn sleep_us(&mut self, us: u32) {
        self.io.sleep_us(us);
    }
}
