//! 6532 RIOT (PIA) interface surface: 128 bytes of RAM, the joystick and
//! console-switch ports, and the interval timer.

use log::trace;

#[derive(Debug, Clone, Copy, Default)]
pub struct JoystickState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl JoystickState {
    /// Port nibble, active low: right, left, down, up from bit 3 down
    fn nibble(&self) -> u8 {
        let pressed = (if self.right { 0x08 } else { 0 })
            | (if self.left { 0x04 } else { 0 })
            | (if self.down { 0x02 } else { 0 })
            | (if self.up { 0x01 } else { 0 });
        !pressed & 0x0F
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsoleSwitches {
    pub reset: bool,
    pub select: bool,
    pub color: bool,
    /// Difficulty A (pro) for the left player
    pub left_difficulty_a: bool,
    pub right_difficulty_a: bool,
}

impl Default for ConsoleSwitches {
    fn default() -> Self {
        Self {
            reset: false,
            select: false,
            color: true,
            left_difficulty_a: false,
            right_difficulty_a: false,
        }
    }
}

impl ConsoleSwitches {
    fn port(&self) -> u8 {
        (if self.reset { 0 } else { 0x01 })
            | (if self.select { 0 } else { 0x02 })
            | (if self.color { 0x08 } else { 0 })
            | (if self.left_difficulty_a { 0x40 } else { 0 })
            | (if self.right_difficulty_a { 0x80 } else { 0 })
    }
}

/// Timer prescalers for TIM1T, TIM8T, TIM64T, TIM1024T
const TIMER_INTERVALS: [u16; 4] = [1, 8, 64, 1024];

#[derive(Debug, Clone)]
pub struct Pia {
    pub ram: [u8; 128],

    pub joystick0: JoystickState,
    pub joystick1: JoystickState,
    pub switches: ConsoleSwitches,

    // Port output latches and data direction registers (1 = output)
    swcha_out: u8,
    swacnt: u8,
    swchb_out: u8,
    swbcnt: u8,

    timer: u8,
    interval: u16,
    /// Clocks until the next timer decrement
    prescaler: u16,
    /// After underflow the timer decrements every clock
    expired: bool,
    interrupt_flag: bool,
}

impl Default for Pia {
    fn default() -> Self {
        Self::new()
    }
}

impl Pia {
    pub fn new() -> Self {
        Self {
            ram: [0; 128],
            joystick0: JoystickState::default(),
            joystick1: JoystickState::default(),
            switches: ConsoleSwitches::default(),
            swcha_out: 0,
            swacnt: 0,
            swchb_out: 0,
            swbcnt: 0,
            timer: 0,
            interval: 1024,
            prescaler: 1023,
            expired: false,
            interrupt_flag: false,
        }
    }

    /// Clears registers and the timer. RAM keeps its contents.
    pub fn reset(&mut self) {
        let ram = self.ram;
        *self = Self {
            ram,
            joystick0: self.joystick0,
            joystick1: self.joystick1,
            switches: self.switches,
            ..Self::new()
        };
    }

    /// Advance one CPU clock.
    pub fn cycle(&mut self) {
        if self.prescaler > 0 {
            self.prescaler -= 1;
            return;
        }

        let (value, underflow) = self.timer.overflowing_sub(1);
        self.timer = value;
        if underflow {
            trace!("PIA timer underflow");
            self.expired = true;
            self.interrupt_flag = true;
        }
        self.prescaler = if self.expired { 0 } else { self.interval - 1 };
    }

    pub fn swcha_input(&self) -> u8 {
        (self.joystick0.nibble() << 4) | self.joystick1.nibble()
    }

    pub fn swchb_input(&self) -> u8 {
        self.switches.port()
    }

    pub fn read_ram(&self, addr: u16) -> u8 {
        self.ram[(addr & 0x7F) as usize]
    }

    pub fn write_ram(&mut self, addr: u16, value: u8) {
        self.ram[(addr & 0x7F) as usize] = value;
    }

    pub fn read_io(&mut self, addr: u16) -> u8 {
        match addr & 0x07 {
            // SWCHA: output bits read back from the latch
            0x00 => (self.swcha_out & self.swacnt) | (self.swcha_input() & !self.swacnt),
            // SWACNT
            0x01 => self.swacnt,
            // SWCHB
            0x02 => (self.swchb_out & self.swbcnt) | (self.swchb_input() & !self.swbcnt),
            // SWBCNT
            0x03 => self.swbcnt,
            // INTIM
            0x04 | 0x06 => {
                self.interrupt_flag = false;
                self.timer
            }
            // TIMINT
            _ => {
                if self.interrupt_flag {
                    0x80
                } else {
                    0
                }
            }
        }
    }

    pub fn write_io(&mut self, addr: u16, value: u8) {
        if addr & 0x14 == 0x14 {
            self.set_timer(TIMER_INTERVALS[(addr & 0x03) as usize], value);
            return;
        }

        match addr & 0x07 {
            0x00 => self.swcha_out = value,
            0x01 => self.swacnt = value,
            0x02 => self.swchb_out = value,
            0x03 => self.swbcnt = value,
            // Edge detect control
            _ => {}
        }
    }

    fn set_timer(&mut self, interval: u16, value: u8) {
        self.timer = value;
        self.interval = interval;
        self.prescaler = interval - 1;
        self.expired = false;
        self.interrupt_flag = false;
    }
}
