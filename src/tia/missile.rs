use super::{decodes, Motion, RENDER_COUNTER_OFFSET, H_PIXEL};

#[derive(Debug, Clone)]
pub struct Missile {
    /// Horizontal position counter (0..160)
    pub counter: u8,
    enabled: bool,
    /// RESMPx: parked on the player and hidden
    locked: bool,
    nusiz: u8,
    width: u8,
    rendering: bool,
    render_counter: i8,
    motion: Motion,
    visible: bool,
}

impl Default for Missile {
    fn default() -> Self {
        Self::new()
    }
}

impl Missile {
    pub fn new() -> Self {
        Self {
            counter: 0,
            enabled: false,
            locked: false,
            nusiz: 0,
            width: 1,
            rendering: false,
            render_counter: 0,
            motion: Motion::new(),
            visible: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// NUSIZx: copies in bits 0-2, missile width in bits 4-5
    pub fn set_nusiz(&mut self, value: u8) {
        self.nusiz = value & 0x07;
        self.width = 1 << ((value >> 4) & 0x03);
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn reset_position(&mut self, hblank: bool) {
        self.counter = if hblank { 159 } else { 157 };
    }

    pub fn set_hm(&mut self, value: u8) {
        self.motion.set(value);
    }

    pub fn clear_hm(&mut self) {
        self.motion.clear();
    }

    pub fn start_movement(&mut self) {
        self.motion.start();
    }

    /// Motion clock. Returns whether the missile is still moving.
    pub fn movement_tick(&mut self, clock: u8, apply: bool) -> bool {
        if self.motion.tick(clock) && apply {
            self.tick();
        }
        self.motion.is_moving()
    }

    pub fn tick(&mut self) {
        self.visible = self.rendering && self.render_counter >= 0 && self.enabled && !self.locked;

        if decodes(self.nusiz, self.counter) {
            self.rendering = true;
            self.render_counter = RENDER_COUNTER_OFFSET;
        } else if self.rendering {
            self.render_counter += 1;
            if self.render_counter >= self.width as i8 {
                self.rendering = false;
            }
        }

        self.counter = (self.counter + 1) % H_PIXEL;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}
