// Este é o ponto de entrada principal da biblioteca.
// O núcleo fala o protocolo elétrico do cartucho N64; USB/CLI ficam fora daqui.

// Módulos principais do projeto.
pub mod core;
pub mod sim;
pub mod utils;

// Re-exportações para facilitar o uso.
pub use crate::core::bus::{AdBus, BusIo, CtrlLines, JoybusPort};
pub use crate::core::gamepak::{CartridgeHeader, GamePak, GamePakInfo, PakState, SaveMediaKind};
pub use crate::core::{HostService, NullService, PakError, PakResult};

/// Versão do núcleo do firmware.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
