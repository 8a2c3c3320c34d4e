use crate::config::TvMode;

const VSYNC_LINES: u32 = 3;

const NTSC_VBLANK_LINES: u32 = 37;
const NTSC_VISIBLE_LINES: u32 = 192;
const NTSC_OVERSCAN_LINES: u32 = 30;

const PAL_VBLANK_LINES: u32 = 45;
const PAL_VISIBLE_LINES: u32 = 228;
const PAL_OVERSCAN_LINES: u32 = 36;

/// Lines a frame may run past its nominal length before it is restarted
/// without a VSYNC.
const SYNC_TOLERANCE_LINES: u32 = 50;

/// Vertical layout of a frame for one TV standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    /// Lines before the first visible line (VSYNC included)
    pub vblank: u32,
    pub visible_lines: u32,
    /// First line after the visible window
    pub overscan_start: u32,
    pub frame_lines: u32,
    pub max_lines_without_sync: u32,
}

impl Metrics {
    pub const fn for_mode(mode: TvMode) -> Self {
        match mode {
            TvMode::Ntsc => Self::from_lines(NTSC_VBLANK_LINES, NTSC_VISIBLE_LINES, NTSC_OVERSCAN_LINES),
            TvMode::Pal | TvMode::Secam => {
                Self::from_lines(PAL_VBLANK_LINES, PAL_VISIBLE_LINES, PAL_OVERSCAN_LINES)
            }
        }
    }

    const fn from_lines(vblank: u32, visible: u32, overscan: u32) -> Self {
        let vblank = VSYNC_LINES + vblank;
        let frame_lines = vblank + visible + overscan;
        Self {
            vblank,
            visible_lines: visible,
            overscan_start: vblank + visible,
            frame_lines,
            max_lines_without_sync: frame_lines + SYNC_TOLERANCE_LINES,
        }
    }

    /// Framebuffer row for vertical counter `vctr`, if it lies in the visible window.
    pub fn visible_row(&self, vctr: u32) -> Option<u32> {
        if vctr >= self.vblank && vctr < self.overscan_start {
            Some(vctr - self.vblank)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ntsc_layout() {
        let metrics = Metrics::for_mode(TvMode::Ntsc);
        assert_eq!(metrics.vblank, 40);
        assert_eq!(metrics.visible_lines, 192);
        assert_eq!(metrics.overscan_start, 232);
        assert_eq!(metrics.frame_lines, 262);
    }

    #[test]
    fn pal_and_secam_share_layout() {
        let pal = Metrics::for_mode(TvMode::Pal);
        assert_eq!(pal, Metrics::for_mode(TvMode::Secam));
        assert_eq!(pal.vblank, 48);
        assert_eq!(pal.overscan_start, 276);
        assert_eq!(pal.frame_lines, 312);
    }

    #[test]
    fn visible_row_window() {
        let metrics = Metrics::for_mode(TvMode::Ntsc);
        assert_eq!(metrics.visible_row(39), None);
        assert_eq!(metrics.visible_row(40), Some(0));
        assert_eq!(metrics.visible_row(231), Some(191));
        assert_eq!(metrics.visible_row(232), None);
    }
}
