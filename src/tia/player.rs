use super::{decodes, Motion, H_PIXEL, RENDER_COUNTER_OFFSET};

/// Players start one clock later than missiles, wide players one more.
const PLAYER_RENDER_OFFSET: i8 = RENDER_COUNTER_OFFSET - 1;
const WIDE_PLAYER_RENDER_OFFSET: i8 = RENDER_COUNTER_OFFSET - 2;

#[derive(Debug, Clone)]
pub struct Player {
    /// Horizontal position counter (0..160)
    pub counter: u8,
    nusiz: u8,
    /// Clocks per graphics bit: 1, 2 or 4
    divider: u8,
    reflected: bool,
    vertical_delay: bool,
    graphics_new: u8,
    graphics_old: u8,
    rendering: bool,
    render_counter: i8,
    motion: Motion,
    visible: bool,
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

impl Player {
    pub fn new() -> Self {
        Self {
            counter: 0,
            nusiz: 0,
            divider: 1,
            reflected: false,
            vertical_delay: false,
            graphics_new: 0,
            graphics_old: 0,
            rendering: false,
            render_counter: 0,
            motion: Motion::new(),
            visible: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn set_nusiz(&mut self, value: u8) {
        self.nusiz = value & 0x07;
        self.divider = match self.nusiz {
            5 => 2,
            7 => 4,
            _ => 1,
        };
    }

    /// Width in pixels: 8, 16 or 32
    pub fn width(&self) -> u8 {
        8 * self.divider
    }

    pub fn set_reflected(&mut self, reflected: bool) {
        self.reflected = reflected;
    }

    pub fn set_vertical_delay(&mut self, delay: bool) {
        self.vertical_delay = delay;
    }

    /// GRPx write
    pub fn set_graphics(&mut self, value: u8) {
        self.graphics_new = value;
    }

    /// Latch the new graphics into the delayed register. Happens on a write
    /// to the other player's GRPx.
    pub fn shuffle_graphics(&mut self) {
        self.graphics_old = self.graphics_new;
    }

    fn graphics(&self) -> u8 {
        if self.vertical_delay {
            self.graphics_old
        } else {
            self.graphics_new
        }
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

    /// Motion clock. Returns whether the player is still moving.
    pub fn movement_tick(&mut self, clock: u8, apply: bool) -> bool {
        if self.motion.tick(clock) && apply {
            self.tick();
        }
        self.motion.is_moving()
    }

    pub fn tick(&mut self) {
        self.visible = self.rendering && self.render_counter >= 0 && self.pixel_set();

        if decodes(self.nusiz, self.counter) {
            self.rendering = true;
            self.render_counter = if self.divider > 1 {
                WIDE_PLAYER_RENDER_OFFSET
            } else {
                PLAYER_RENDER_OFFSET
            };
        } else if self.rendering {
            self.render_counter += 1;
            if self.render_counter >= self.width() as i8 {
                self.rendering = false;
            }
        }

        self.counter = (self.counter + 1) % H_PIXEL;
    }

    fn pixel_set(&self) -> bool {
        let pixel = self.render_counter as u8 / self.divider;
        // A NUSIZx write can shrink the player under a copy in flight
        if pixel > 7 {
            return false;
        }
        // Unreflected graphics are drawn MSB first
        let bit = if self.reflected { pixel } else { 7 - pixel };
        (self.graphics() >> bit) & 0x01 != 0
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}
