use std::fmt;
use std::ops::{Add, AddAssign};

use log::{debug, info, warn};
use thiserror::Error;

use crate::cartridge::Cartridge;
use crate::config::{BoardConfig, ConfigError};
use crate::cpu::{Cpu, ExecutionState};
use crate::memory::MemoryBus;
use crate::pia::Pia;
use crate::tia::{Frame, Tia};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapReason {
    Cpu,
    Bus,
    Debug,
    Board,
}

impl fmt::Display for TrapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrapReason::Cpu => "CPU",
            TrapReason::Bus => "bus",
            TrapReason::Debug => "debug",
            TrapReason::Board => "board",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trap {
    pub reason: TrapReason,
    pub message: Option<String>,
}

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("Unhandled {reason} trap: {}", .message.as_deref().unwrap_or("no message"))]
    UnhandledTrap {
        reason: TrapReason,
        message: Option<String>,
    },
    #[error("Invalid board configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type TrapHandler = Box<dyn FnMut(&Trap)>;

/// Elapsed clocks, counted separately for the CPU and the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockCounts {
    pub cpu: u64,
    pub chip: u64,
}

impl Add for ClockCounts {
    type Output = ClockCounts;

    fn add(self, other: ClockCounts) -> ClockCounts {
        ClockCounts {
            cpu: self.cpu + other.cpu,
            chip: self.chip + other.chip,
        }
    }
}

impl AddAssign for ClockCounts {
    fn add_assign(&mut self, other: ClockCounts) {
        *self = *self + other;
    }
}

pub struct Board {
    cpu: Cpu,
    bus: MemoryBus,
    config: BoardConfig,
    /// Chip clocks since the last CPU clock
    sub_clock: u32,
    trap_handler: Option<TrapHandler>,
    trap_fired: bool,
    suspended: bool,
    totals: ClockCounts,
}

impl Board {
    pub fn new(config: BoardConfig, cartridge: Box<dyn Cartridge>) -> Result<Self, BoardError> {
        config.validate()?;

        let tia = Tia::new(config.tv_mode);
        let bus = MemoryBus::new(tia, cartridge);
        let mut cpu = Cpu::new();
        cpu.set_report_invalid_instructions(true);

        info!(
            "Board created: {:?}, {} chip clocks per CPU clock",
            config.tv_mode, config.cpu_divider
        );

        Ok(Self {
            cpu,
            bus,
            config,
            sub_clock: 0,
            trap_handler: None,
            trap_fired: false,
            suspended: false,
            totals: ClockCounts::default(),
        })
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn tia(&self) -> &Tia {
        &self.bus.tia
    }

    pub fn tia_mut(&mut self) -> &mut Tia {
        &mut self.bus.tia
    }

    pub fn pia_mut(&mut self) -> &mut Pia {
        &mut self.bus.pia
    }

    pub fn bus_mut(&mut self) -> &mut MemoryBus {
        &mut self.bus
    }

    pub fn take_frame(&mut self) -> Option<Frame> {
        self.bus.tia.take_frame()
    }

    /// Running totals since the last reset
    pub fn clock_counts(&self) -> ClockCounts {
        self.totals
    }

    pub fn set_trap_handler(&mut self, handler: TrapHandler) {
        self.trap_handler = Some(handler);
    }

    pub fn clear_trap_handler(&mut self) {
        self.trap_handler = None;
    }

    /// Trap on invalid opcodes (the default) or let them run as NOPs.
    pub fn set_trap_on_invalid_instruction(&mut self, enabled: bool) {
        self.cpu.set_report_invalid_instructions(enabled);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Stop clocking the CPU, TIA and PIA. Their state is left untouched
    /// until [`Board::resume`].
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.reset();
        self.sub_clock = 0;
        self.trap_fired = false;
        self.suspended = false;
        self.totals = ClockCounts::default();
        debug!("Board reset");
    }

    /// Reset everything and run the CPU's reset sequence.
    pub fn boot(&mut self) -> Result<ClockCounts, BoardError> {
        self.reset();

        let mut counts = ClockCounts::default();
        while self.cpu.execution_state() == ExecutionState::Boot {
            counts += self.cycle()?;
        }

        info!(
            "Boot complete after {} CPU clocks, PC=0x{:04X}",
            counts.cpu, self.cpu.state.pc
        );
        Ok(counts)
    }

    /// Advance up to `clocks` chip clocks. Stops early when a trap fires.
    pub fn tick(&mut self, clocks: u64) -> Result<ClockCounts, BoardError> {
        let mut counts = ClockCounts::default();
        if self.suspended {
            return Ok(counts);
        }

        self.trap_fired = false;
        for _ in 0..clocks {
            counts += self.cycle()?;
            if self.trap_fired {
                break;
            }
        }
        Ok(counts)
    }

    /// Tick until the CPU completes the instruction in flight (or the next one).
    pub fn step_instruction(&mut self) -> Result<ClockCounts, BoardError> {
        let mut counts = ClockCounts::default();
        if self.suspended {
            return Ok(counts);
        }

        self.trap_fired = false;
        let booting = self.cpu.execution_state() == ExecutionState::Boot;
        let instructions = self.cpu.instructions();
        loop {
            counts += self.cycle()?;
            if self.trap_fired || self.cpu.instructions() != instructions {
                break;
            }
            if booting && self.cpu.execution_state() != ExecutionState::Boot {
                break;
            }
        }
        Ok(counts)
    }

    /// Suspend the board and hand the trap to the registered handler.
    pub fn trigger_trap(
        &mut self,
        reason: TrapReason,
        message: Option<String>,
    ) -> Result<(), BoardError> {
        warn!(
            "{} trap: {}",
            reason,
            message.as_deref().unwrap_or("no message")
        );
        self.trap_fired = true;
        self.suspended = true;

        match self.trap_handler.as_mut() {
            Some(handler) => {
                handler(&Trap { reason, message });
                Ok(())
            }
            None => Err(BoardError::UnhandledTrap { reason, message }),
        }
    }

    /// One chip clock, and a CPU and PIA clock every `cpu_divider` chip clocks.
    fn cycle(&mut self) -> Result<ClockCounts, BoardError> {
        let mut counts = ClockCounts { cpu: 0, chip: 1 };
        let mut fault = None;

        if self.sub_clock == 0 {
            self.cpu.cycle(&mut self.bus);
            self.bus.pia.cycle();
            fault = self.cpu.take_fault();
            counts.cpu = 1;
        }

        self.bus.tia.cycle();
        if self.bus.tia.is_cpu_halted() {
            self.cpu.halt();
        } else {
            self.cpu.resume();
        }

        self.sub_clock = (self.sub_clock + 1) % self.config.cpu_divider;
        self.totals += counts;

        if let Some(fault) = fault {
            self.trigger_trap(TrapReason::Cpu, Some(fault.to_string()))?;
        }
        Ok(counts)
    }
}
