use crate::cartridge::Cartridge;
use crate::cpu::CpuBus;
use crate::pia::Pia;
use crate::tia::Tia;

/// The 6507 only drives 13 address lines.
const ADDRESS_MASK: u16 = 0x1FFF;

pub struct MemoryBus {
    pub tia: Tia,
    pub pia: Pia,
    pub cartridge: Box<dyn Cartridge>,
}

impl MemoryBus {
    pub fn new(tia: Tia, cartridge: Box<dyn Cartridge>) -> Self {
        Self {
            tia,
            pia: Pia::new(),
            cartridge,
        }
    }

    pub fn reset(&mut self) {
        self.tia.reset();
        self.pia.reset();
        self.cartridge.reset();
    }
}

impl CpuBus for MemoryBus {
    fn read(&mut self, addr: u16) -> u8 {
        let addr = addr & ADDRESS_MASK;
        if addr & 0x1000 != 0 {
            // Cartridge
            self.cartridge.read(addr & 0x0FFF)
        } else if addr & 0x0080 == 0 {
            // TIA registers
            self.tia.read(addr)
        } else if addr & 0x0200 == 0 {
            // PIA RAM
            self.pia.read_ram(addr)
        } else {
            // PIA ports and timer
            self.pia.read_io(addr)
        }
    }

    fn write(&mut self, addr: u16, value: u8) {
        let addr = addr & ADDRESS_MASK;
        if addr & 0x1000 != 0 {
            self.cartridge.write(addr & 0x0FFF, value);
        } else if addr & 0x0080 == 0 {
            self.tia.write(addr, value);
        } else if addr & 0x0200 == 0 {
            self.pia.write_ram(addr, value);
        } else {
            self.pia.write_io(addr, value);
        }
    }
}
