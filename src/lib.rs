//! Cycle-accurate Atari VCS core: the 6507 CPU, the TIA video chip, the PIA
//! interface surface and the board that clocks them together.

pub mod board;
pub mod cartridge;
pub mod config;
pub mod cpu;
pub mod instruction;
pub mod memory;
pub mod pia;
pub mod tia;

pub use board::{Board, BoardError, ClockCounts, Trap, TrapHandler, TrapReason};
pub use cartridge::{Cartridge, CartridgeError, RomCartridge};
pub use config::{BoardConfig, ConfigError, TvMode};
pub use cpu::{Cpu, CpuBus, CpuFault, CpuState, ExecutionState};
pub use instruction::{AddressingMode, Instruction, Operation};
pub use memory::MemoryBus;
pub use pia::Pia;
pub use tia::{Frame, Tia};
