use super::{Motion, H_PIXEL, RENDER_COUNTER_OFFSET};

/// The ball draws a single copy.
const BALL_DECODE: u8 = 156;

#[derive(Debug, Clone)]
pub struct Ball {
    pub counter: u8,
    enabled_new: bool,
    enabled_old: bool,
    vertical_delay: bool,
    width: u8,
    rendering: bool,
    render_counter: i8,
    motion: Motion,
    visible: bool,
}

impl Default for Ball {
    fn default() -> Self {
        Self::new()
    }
}

impl Ball {
    pub fn new() -> Self {
        Self {
            counter: 0,
            enabled_new: false,
            enabled_old: false,
            vertical_delay: false,
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

    /// Ball size lives in CTRLPF bits 4-5
    pub fn set_ctrlpf(&mut self, value: u8) {
        self.width = 1 << ((value >> 4) & 0x03);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled_new = enabled;
    }

    /// Happens on a GRP1 write
    pub fn shuffle_enabled(&mut self) {
        self.enabled_old = self.enabled_new;
    }

    pub fn set_vertical_delay(&mut self, delay: bool) {
        self.vertical_delay = delay;
    }

    fn enabled(&self) -> bool {
        if self.vertical_delay {
            self.enabled_old
        } else {
            self.enabled_new
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

    pub fn movement_tick(&mut self, clock: u8, apply: bool) -> bool {
        if self.motion.tick(clock) && apply {
            self.tick();
        }
        self.motion.is_moving()
    }

    pub fn tick(&mut self) {
        self.visible = self.rendering && self.render_counter >= 0 && self.enabled();

        if self.counter == BALL_DECODE {
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
