use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CartridgeError {
    #[error("Unsupported ROM size: {0} bytes (expected 2048 or 4096)")]
    InvalidSize(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cartridge port. Addresses are the 12 low bits of the bus with A12 set.
pub trait Cartridge {
    fn read(&mut self, addr: u16) -> u8;

    /// Plain ROM ignores writes; bank-switching carts watch this address space.
    fn write(&mut self, _addr: u16, _value: u8) {}

    fn reset(&mut self) {}
}

/// Unbanked 2K or 4K ROM image. 2K images appear twice in the 4K window.
pub struct RomCartridge {
    rom: Vec<u8>,
}

impl RomCartridge {
    pub fn new(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        match rom.len() {
            0x0800 | 0x1000 => {
                log::info!("Loaded {}K ROM cartridge", rom.len() / 1024);
                Ok(Self { rom })
            }
            size => Err(CartridgeError::InvalidSize(size)),
        }
    }

    pub fn load(path: &Path) -> Result<Self, CartridgeError> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Self::new(data)
    }

    pub fn size(&self) -> usize {
        self.rom.len()
    }
}

impl Cartridge for RomCartridge {
    fn read(&mut self, addr: u16) -> u8 {
        self.rom[addr as usize % self.rom.len()]
    }
}
