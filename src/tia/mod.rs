//! TIA video and timing chip
//!
//! Ticked once per color clock. Each line is 228 clocks: 68 clocks of
//! horizontal blank followed by 160 visible pixels. The chip draws two
//! players, two missiles, the ball and the playfield, latches collisions,
//! handles HMOVE motion and emits a [`Frame`] per VSYNC.

use log::{debug, trace, warn};

use crate::config::TvMode;

pub mod ball;
pub mod metrics;
pub mod missile;
pub mod player;
pub mod playfield;

use ball::Ball;
pub use metrics::Metrics;
use missile::Missile;
use player::Player;
use playfield::Playfield;

pub const H_BLANK_CLOCKS: u8 = 68;
pub const H_CLOCKS: u8 = 228;
pub const H_PIXEL: u8 = 160;
/// Extra blanking inserted by an HMOVE during horizontal blank
pub const HMOVE_BLANK_CLOCKS: u8 = 8;

/// Clocks between a copy decode and its first pixel (missiles and ball).
pub(crate) const RENDER_COUNTER_OFFSET: i8 = -4;

/// Counter values that start a copy, indexed by NUSIZ bits 0-2.
const DECODE_TABLES: [&[u8]; 8] = [
    &[156],
    &[156, 12],
    &[156, 28],
    &[156, 12, 28],
    &[156, 60],
    &[156],
    &[156, 28, 60],
    &[156],
];

pub(crate) fn decodes(nusiz: u8, counter: u8) -> bool {
    DECODE_TABLES[(nusiz & 0x07) as usize].contains(&counter)
}

/// Last clock of the 4-bit motion counter. Every object stops here.
const MAX_MOTION_CLOCK: u8 = 15;

/// HMxx state shared by all movable objects.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Motion {
    /// Motion clock at which movement stops
    clocks: u8,
    moving: bool,
}

impl Motion {
    pub(crate) fn new() -> Self {
        Self {
            clocks: 8,
            moving: false,
        }
    }

    /// HMxx write. The signed high nibble is stored offset by 8.
    pub(crate) fn set(&mut self, value: u8) {
        self.clocks = (value >> 4) ^ 0x08;
    }

    pub(crate) fn clear(&mut self) {
        self.set(0);
    }

    pub(crate) fn start(&mut self) {
        self.moving = true;
    }

    /// Returns whether this motion clock produces an extra position tick.
    /// An HMxx or HMCLR write can move the stop clock behind the counter, in
    /// which case the object runs until the counter is exhausted.
    pub(crate) fn tick(&mut self, clock: u8) -> bool {
        if clock == self.clocks || clock >= MAX_MOTION_CLOCK {
            self.moving = false;
        }
        self.moving
    }

    pub(crate) fn is_moving(&self) -> bool {
        self.moving
    }
}

// Object bits of the collision mask
const M0: u8 = 0x01;
const M1: u8 = 0x02;
const P0: u8 = 0x04;
const P1: u8 = 0x08;
const BL: u8 = 0x10;
const PF: u8 = 0x20;

/// Object pairs and their latch bit. Read register n reports bit 2n in D7
/// and bit 2n+1 in D6.
const COLLISION_PAIRS: [(u8, u8, u16); 15] = [
    (M0, P1, 0x0001), // CXM0P
    (M0, P0, 0x0002),
    (M1, P0, 0x0004), // CXM1P
    (M1, P1, 0x0008),
    (P0, PF, 0x0010), // CXP0FB
    (P0, BL, 0x0020),
    (P1, PF, 0x0040), // CXP1FB
    (P1, BL, 0x0080),
    (M0, PF, 0x0100), // CXM0FB
    (M0, BL, 0x0200),
    (M1, PF, 0x0400), // CXM1FB
    (M1, BL, 0x0800),
    (BL, PF, 0x1000), // CXBLPF
    (P0, P1, 0x4000), // CXPPMM
    (M0, M1, 0x8000),
];

/// Latch bits set by every combination of active objects.
pub static COLLISION_TABLE: [u16; 64] = build_collision_table();

const fn build_collision_table() -> [u16; 64] {
    let mut table = [0u16; 64];
    let mut mask = 0;
    while mask < 64 {
        let mut latches = 0;
        let mut i = 0;
        while i < COLLISION_PAIRS.len() {
            let (a, b, bit) = COLLISION_PAIRS[i];
            if (mask as u8 & a) != 0 && (mask as u8 & b) != 0 {
                latches |= bit;
            }
            i += 1;
        }
        table[mask] = latches;
        mask += 1;
    }
    table
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HState {
    Blank,
    Frame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Priority {
    /// P0/M0 > P1/M1 > BL/PF > BK
    Normal,
    /// Playfield takes the player colors, left half P0, right half P1
    Score,
    /// BL/PF > P0/M0 > P1/M1 > BK
    Playfield,
}

/// A completed frame of color bytes, one per pixel, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub number: u64,
}

#[derive(Debug, Clone)]
pub struct Tia {
    metrics: Metrics,

    // Beam position
    hstate: HState,
    hctr: u8,
    vctr: u32,

    // Horizontal motion
    extended_hblank: bool,
    movement_in_progress: bool,
    movement_clock: u8,

    /// RDY line pulled low by WSYNC
    cpu_halted: bool,

    vsync: bool,
    vblank: bool,

    // Colors (bit 0 dropped)
    pub colup0: u8,
    pub colup1: u8,
    pub colupf: u8,
    pub colubk: u8,
    priority: Priority,

    pub missile0: Missile,
    pub missile1: Missile,
    pub player0: Player,
    pub player1: Player,
    pub ball: Ball,
    pub playfield: Playfield,

    collisions: u16,

    /// AUDC0, AUDC1, AUDF0, AUDF1, AUDV0, AUDV1
    audio: [u8; 6],

    framebuffer: Vec<u8>,
    frame_emitted: bool,
    frame_count: u64,
    finished_frame: Option<Frame>,

    clocks: u64,
}

impl Tia {
    pub fn new(tv_mode: TvMode) -> Self {
        let metrics = Metrics::for_mode(tv_mode);
        debug!(
            "TIA initialized: {:?}, {} visible lines",
            tv_mode,
            metrics.visible_lines
        );
        Self {
            metrics,
            hstate: HState::Blank,
            hctr: 0,
            vctr: 0,
            extended_hblank: false,
            movement_in_progress: false,
            movement_clock: 0,
            cpu_halted: false,
            vsync: false,
            vblank: false,
            colup0: 0,
            colup1: 0,
            colupf: 0,
            colubk: 0,
            priority: Priority::Normal,
            missile0: Missile::new(),
            missile1: Missile::new(),
            player0: Player::new(),
            player1: Player::new(),
            ball: Ball::new(),
            playfield: Playfield::new(),
            collisions: 0,
            audio: [0; 6],
            framebuffer: vec![0; Self::frame_size(&metrics)],
            frame_emitted: false,
            frame_count: 0,
            finished_frame: None,
            clocks: 0,
        }
    }

    fn frame_size(metrics: &Metrics) -> usize {
        H_PIXEL as usize * metrics.visible_lines as usize
    }

    pub fn reset(&mut self) {
        let metrics = self.metrics;
        self.hstate = HState::Blank;
        self.hctr = 0;
        self.vctr = 0;
        self.extended_hblank = false;
        self.movement_in_progress = false;
        self.movement_clock = 0;
        self.cpu_halted = false;
        self.vsync = false;
        self.vblank = false;
        self.colup0 = 0;
        self.colup1 = 0;
        self.colupf = 0;
        self.colubk = 0;
        self.priority = Priority::Normal;
        self.missile0.reset();
        self.missile1.reset();
        self.player0.reset();
        self.player1.reset();
        self.ball.reset();
        self.playfield.reset();
        self.collisions = 0;
        self.audio = [0; 6];
        self.framebuffer = vec![0; Self::frame_size(&metrics)];
        self.frame_emitted = false;
        self.frame_count = 0;
        self.finished_frame = None;
        self.clocks = 0;
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn hctr(&self) -> u8 {
        self.hctr
    }

    pub fn vctr(&self) -> u32 {
        self.vctr
    }

    pub fn in_hblank(&self) -> bool {
        self.hstate == HState::Blank
    }

    /// Whether the CPU is held by WSYNC
    pub fn is_cpu_halted(&self) -> bool {
        self.cpu_halted
    }

    /// Raw collision latches
    pub fn collisions(&self) -> u16 {
        self.collisions
    }

    pub fn audio_registers(&self) -> [u8; 6] {
        self.audio
    }

    pub fn clocks(&self) -> u64 {
        self.clocks
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Pixels of the frame currently being drawn
    pub fn framebuffer(&self) -> &[u8] {
        &self.framebuffer
    }

    /// Take the most recently completed frame, if one is pending.
    pub fn take_frame(&mut self) -> Option<Frame> {
        self.finished_frame.take()
    }

    /// Advance one color clock.
    pub fn cycle(&mut self) {
        self.tick_movement();
        self.playfield.advance_latches();

        match self.hstate {
            HState::Blank => self.tick_hblank(),
            HState::Frame => self.tick_hframe(),
        }

        self.hctr += 1;
        if self.hctr >= H_CLOCKS {
            self.next_line();
        }
        self.clocks += 1;
    }

    fn tick_movement(&mut self) {
        if !self.movement_in_progress || self.hctr & 0x03 != 0 {
            return;
        }

        // Outside of blank the motion clock is absorbed by the regular pixel clock
        let apply = self.hstate == HState::Blank;
        let clock = self.movement_clock;

        let m0 = self.missile0.movement_tick(clock, apply);
        let m1 = self.missile1.movement_tick(clock, apply);
        let p0 = self.player0.movement_tick(clock, apply);
        let p1 = self.player1.movement_tick(clock, apply);
        let bl = self.ball.movement_tick(clock, apply);

        self.movement_in_progress = m0 || m1 || p0 || p1 || bl;
        self.movement_clock = self.movement_clock.saturating_add(1);
    }

    fn tick_hblank(&mut self) {
        if self.hctr == 0 {
            self.extended_hblank = false;
            if self.cpu_halted {
                trace!("WSYNC released at line {}", self.vctr);
                self.cpu_halted = false;
            }
        }

        // HMOVE comb: the first pixels of the line stay black
        if self.hctr >= H_BLANK_CLOCKS {
            let x = self.hctr - H_BLANK_CLOCKS;
            self.playfield.tick(x);
            self.put_pixel(x, 0);
        }

        let blank_end = if self.extended_hblank {
            H_BLANK_CLOCKS + HMOVE_BLANK_CLOCKS
        } else {
            H_BLANK_CLOCKS
        };
        if self.hctr + 1 >= blank_end {
            self.hstate = HState::Frame;
        }
    }

    fn tick_hframe(&mut self) {
        let x = self.hctr - H_BLANK_CLOCKS;

        self.playfield.tick(x);
        self.missile0.tick();
        self.missile1.tick();
        self.player0.tick();
        self.player1.tick();
        self.ball.tick();

        let objects = self.active_objects();
        self.collisions |= COLLISION_TABLE[objects as usize];

        let color = if self.vblank {
            0
        } else {
            self.pixel_color(x, objects)
        };
        self.put_pixel(x, color);
    }

    fn active_objects(&self) -> u8 {
        let mut mask = 0;
        if self.missile0.is_visible() {
            mask |= M0;
        }
        if self.missile1.is_visible() {
            mask |= M1;
        }
        if self.player0.is_visible() {
            mask |= P0;
        }
        if self.player1.is_visible() {
            mask |= P1;
        }
        if self.ball.is_visible() {
            mask |= BL;
        }
        if self.playfield.is_visible() {
            mask |= PF;
        }
        mask
    }

    fn pixel_color(&self, x: u8, objects: u8) -> u8 {
        let p0 = objects & (P0 | M0) != 0;
        let p1 = objects & (P1 | M1) != 0;
        let bl = objects & BL != 0;
        let pf = objects & PF != 0;

        match self.priority {
            Priority::Normal => {
                if p0 {
                    self.colup0
                } else if p1 {
                    self.colup1
                } else if bl || pf {
                    self.colupf
                } else {
                    self.colubk
                }
            }
            Priority::Score => {
                let left = x < H_PIXEL / 2;
                if p0 || (pf && left) {
                    self.colup0
                } else if p1 || pf {
                    self.colup1
                } else if bl {
                    self.colupf
                } else {
                    self.colubk
                }
            }
            Priority::Playfield => {
                if bl || pf {
                    self.colupf
                } else if p0 {
                    self.colup0
                } else if p1 {
                    self.colup1
                } else {
                    self.colubk
                }
            }
        }
    }

    fn put_pixel(&mut self, x: u8, color: u8) {
        if let Some(y) = self.metrics.visible_row(self.vctr) {
            let index = y as usize * H_PIXEL as usize + x as usize;
            if let Some(pixel) = self.framebuffer.get_mut(index) {
                *pixel = color;
            }
        }
    }

    fn next_line(&mut self) {
        self.hctr = 0;
        self.hstate = HState::Blank;
        self.vctr += 1;

        if self.vctr == self.metrics.overscan_start {
            self.finish_frame();
        } else if self.vctr >= self.metrics.max_lines_without_sync {
            warn!(
                "No VSYNC after {} lines, restarting frame",
                self.vctr
            );
            self.finish_frame();
            self.start_frame();
        }
    }

    fn start_frame(&mut self) {
        self.vctr = 0;
        self.frame_emitted = false;
    }

    fn finish_frame(&mut self) {
        if self.frame_emitted {
            return;
        }
        self.frame_emitted = true;

        let size = Self::frame_size(&self.metrics);
        let pixels = std::mem::replace(&mut self.framebuffer, vec![0; size]);
        let frame = Frame {
            width: H_PIXEL as u32,
            height: self.metrics.visible_lines,
            pixels,
            number: self.frame_count,
        };
        debug!("Frame {} complete at line {}", self.frame_count, self.vctr);
        self.frame_count += 1;
        self.finished_frame = Some(frame);
    }

    fn set_vsync(&mut self, value: u8) {
        let vsync = value & 0x02 != 0;
        if vsync && !self.vsync {
            debug!("VSYNC at line {}", self.vctr);
            self.finish_frame();
            self.start_frame();
        }
        self.vsync = vsync;
    }

    fn apply_hmove(&mut self) {
        if self.hstate == HState::Blank && !self.extended_hblank {
            self.extended_hblank = true;
        }
        debug!(
            "HMOVE at line {} clock {} (extended blank: {})",
            self.vctr, self.hctr, self.extended_hblank
        );

        self.movement_clock = 0;
        self.movement_in_progress = true;
        self.missile0.start_movement();
        self.missile1.start_movement();
        self.player0.start_movement();
        self.player1.start_movement();
        self.ball.start_movement();
    }

    fn apply_rsync(&mut self) {
        // The line ends three clocks from now
        self.hctr = H_CLOCKS - 3;
    }

    fn set_resmp(missile: &mut Missile, player: &Player, value: u8) {
        let locked = value & 0x02 != 0;
        if missile.is_locked() && !locked {
            // Unlocked missiles reappear centered on their player
            let offset = H_PIXEL - player.width() / 2;
            missile.counter = ((player.counter as u16 + offset as u16) % H_PIXEL as u16) as u8;
        }
        missile.set_locked(locked);
    }

    pub fn read(&mut self, addr: u16) -> u8 {
        match addr & 0x0F {
            // CXM0P, CXM1P, CXP0FB, CXP1FB, CXM0FB, CXM1FB, CXBLPF, CXPPMM
            reg @ 0x00..=0x07 => {
                let bits = (self.collisions >> (2 * reg)) as u8;
                ((bits & 0x01) << 7) | ((bits & 0x02) << 5)
            }
            // INPT0-INPT3: paddles, not connected
            0x08..=0x0B => 0,
            // INPT4, INPT5: fire buttons released
            0x0C | 0x0D => 0x80,
            _ => 0,
        }
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        let hblank = self.hstate == HState::Blank;

        match addr & 0x3F {
            0x00 => self.set_vsync(value),
            0x01 => {
                // VBLANK: bit 1 blanks the output
                self.vblank = value & 0x02 != 0;
            }
            0x02 => {
                // WSYNC
                trace!("WSYNC at line {} clock {}", self.vctr, self.hctr);
                self.cpu_halted = true;
            }
            0x03 => self.apply_rsync(),
            0x04 => {
                // NUSIZ0
                self.missile0.set_nusiz(value);
                self.player0.set_nusiz(value);
            }
            0x05 => {
                // NUSIZ1
                self.missile1.set_nusiz(value);
                self.player1.set_nusiz(value);
            }
            0x06 => self.colup0 = value & 0xFE,
            0x07 => self.colup1 = value & 0xFE,
            0x08 => self.colupf = value & 0xFE,
            0x09 => self.colubk = value & 0xFE,
            0x0A => {
                // CTRLPF: reflect, score, priority, ball size
                self.playfield.set_ctrlpf(value);
                self.ball.set_ctrlpf(value);
                self.priority = if value & 0x04 != 0 {
                    Priority::Playfield
                } else if value & 0x02 != 0 {
                    Priority::Score
                } else {
                    Priority::Normal
                };
            }
            0x0B => self.player0.set_reflected(value & 0x08 != 0),
            0x0C => self.player1.set_reflected(value & 0x08 != 0),
            0x0D => self.playfield.write(0, value),
            0x0E => self.playfield.write(1, value),
            0x0F => self.playfield.write(2, value),
            0x10 => self.player0.reset_position(hblank),
            0x11 => self.player1.reset_position(hblank),
            0x12 => self.missile0.reset_position(hblank),
            0x13 => self.missile1.reset_position(hblank),
            0x14 => self.ball.reset_position(hblank),
            // AUDC0, AUDC1
            0x15 | 0x16 => self.audio[(addr & 0x3F) as usize - 0x15] = value & 0x0F,
            // AUDF0, AUDF1
            0x17 | 0x18 => self.audio[(addr & 0x3F) as usize - 0x15] = value & 0x1F,
            // AUDV0, AUDV1
            0x19 | 0x1A => self.audio[(addr & 0x3F) as usize - 0x15] = value & 0x0F,
            0x1B => {
                // GRP0
                self.player0.set_graphics(value);
                self.player1.shuffle_graphics();
            }
            0x1C => {
                // GRP1
                self.player1.set_graphics(value);
                self.player0.shuffle_graphics();
                self.ball.shuffle_enabled();
            }
            0x1D => self.missile0.set_enabled(value & 0x02 != 0),
            0x1E => self.missile1.set_enabled(value & 0x02 != 0),
            0x1F => self.ball.set_enabled(value & 0x02 != 0),
            0x20 => self.player0.set_hm(value),
            0x21 => self.player1.set_hm(value),
            0x22 => self.missile0.set_hm(value),
            0x23 => self.missile1.set_hm(value),
            0x24 => self.ball.set_hm(value),
            0x25 => self.player0.set_vertical_delay(value & 0x01 != 0),
            0x26 => self.player1.set_vertical_delay(value & 0x01 != 0),
            0x27 => self.ball.set_vertical_delay(value & 0x01 != 0),
            0x28 => Self::set_resmp(&mut self.missile0, &self.player0, value),
            0x29 => Self::set_resmp(&mut self.missile1, &self.player1, value),
            0x2A => self.apply_hmove(),
            0x2B => {
                // HMCLR
                self.missile0.clear_hm();
                self.missile1.clear_hm();
                self.player0.clear_hm();
                self.player1.clear_hm();
                self.ball.clear_hm();
            }
            0x2C => self.collisions = 0,
            _ => {}
        }
    }
}
