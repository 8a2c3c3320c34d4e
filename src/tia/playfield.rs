/// Clocks between a PFx write and the new pattern showing up
const LATCH_DELAY: u8 = 2;

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    value: u8,
    clocks: u8,
}

#[derive(Debug, Clone)]
pub struct Playfield {
    pf: [u8; 3],
    pending: [Option<PendingWrite>; 3],
    /// PF0 bits 4-7, PF1 reversed, PF2: bit n is the nth 4-pixel cell of the left half
    pattern: u32,
    reflected: bool,
    visible: bool,
}

impl Default for Playfield {
    fn default() -> Self {
        Self::new()
    }
}

impl Playfield {
    pub fn new() -> Self {
        Self {
            pf: [0; 3],
            pending: [None; 3],
            pattern: 0,
            reflected: false,
            visible: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Queue a write to PF0 (0), PF1 (1) or PF2 (2)
    pub fn write(&mut self, register: usize, value: u8) {
        if let Some(slot) = self.pending.get_mut(register) {
            *slot = Some(PendingWrite {
                value,
                clocks: LATCH_DELAY,
            });
        }
    }

    /// CTRLPF bit 0
    pub fn set_ctrlpf(&mut self, value: u8) {
        self.reflected = value & 0x01 != 0;
    }

    /// Advance pending writes by one color clock.
    pub fn advance_latches(&mut self) {
        let mut changed = false;
        for (register, slot) in self.pending.iter_mut().enumerate() {
            if let Some(write) = slot {
                write.clocks -= 1;
                if write.clocks == 0 {
                    self.pf[register] = write.value;
                    *slot = None;
                    changed = true;
                }
            }
        }
        if changed {
            self.update_pattern();
        }
    }

    fn update_pattern(&mut self) {
        self.pattern = ((self.pf[0] >> 4) as u32)
            | ((self.pf[1].reverse_bits() as u32) << 4)
            | ((self.pf[2] as u32) << 12);
    }

    /// Sample the pattern for pixel `x`. The output only changes on 4-pixel boundaries.
    pub fn tick(&mut self, x: u8) {
        if x & 0x03 != 0 {
            return;
        }

        let cell = (x >> 2) as u32;
        let bit = if cell < 20 {
            cell
        } else if self.reflected {
            39 - cell
        } else {
            cell - 20
        };
        self.visible = self.pattern & (1 << bit) != 0;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn pattern(&self) -> u32 {
        self.pattern
    }
}
