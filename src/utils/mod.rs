//! Utilitários compartilhados do núcleo.

pub mod crc;

pub use crc::Crc32;
