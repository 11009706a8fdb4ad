//! Per-scanline sprite selection.
//!
//! The evaluator walks primary sprite memory one entry per step (the raster
//! engine steps it 64 times across a scanline) and stages up to eight matches
//! into secondary memory for the *following* scanline. Unused slots keep a
//! sentinel id so the fetch and compositing stages can treat them uniformly
//! as transparent.

use bitflags::bitflags;

use crate::{
    mem_block::OamRam,
    memory::{OAM_BYTES_PER_SPRITE, SPRITES_PER_LINE},
    ppu::registers::Status,
};

/// Slot id marking "no sprite present".
pub(crate) const SENTINEL_ID: u8 = 64;

bitflags! {
    /// Attribute bits stored in sprite byte 2.
    ///
    /// Bit layout:
    /// ```text
    /// 7 6 5 4 3 2 1 0
    /// V H P . . . p p
    /// ```
    /// - `V`: vertical flip
    /// - `H`: horizontal flip
    /// - `P`: priority (behind the background when set)
    /// - `p`: sprite palette select (0..=3)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) struct SpriteAttributes: u8 {
        const PALETTE = 0b0000_0011;
        const PRIORITY_BEHIND_BACKGROUND = 0b0010_0000;
        const FLIP_HORIZONTAL = 0b0100_0000;
        const FLIP_VERTICAL = 0b1000_0000;
    }
}

impl SpriteAttributes {
    pub(crate) fn palette_index(self) -> u8 {
        self.bits() & 0b11
    }
}

/// One secondary-memory entry: selection data plus the two pattern-plane
/// bytes fetched during dots 256-319.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SpriteSlot {
    /// Primary-memory index of this sprite, or [`SENTINEL_ID`].
    pub(crate) id: u8,
    /// Row within the sprite covered by the target scanline (0..height).
    pub(crate) row: u8,
    /// Raw tile index byte.
    pub(crate) tile: u8,
    /// Raw attribute byte.
    pub(crate) attr: SpriteAttributes,
    /// Screen X of the sprite's left edge.
    pub(crate) x: u8,
    /// Pattern bitplane 0 for the covered row.
    pub(crate) pattern_low: u8,
    /// Pattern bitplane 1 for the covered row.
    pub(crate) pattern_high: u8,
}

impl Default for SpriteSlot {
    fn default() -> Self {
        Self {
            id: SENTINEL_ID,
            row: 0,
            tile: 0,
            attr: SpriteAttributes::empty(),
            x: 0,
            pattern_low: 0,
            pattern_high: 0,
        }
    }
}

impl SpriteSlot {
    pub(crate) fn is_sentinel(&self) -> bool {
        self.id == SENTINEL_ID
    }
}

/// Scanline sprite evaluation state.
///
/// `index` free-runs across the 64 primary entries; `found` counts staged
/// matches. The ninth match raises the overflow status flag and is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct SpriteEvaluator {
    index: u8,
    found: u8,
    staged: [SpriteSlot; SPRITES_PER_LINE],
}

impl SpriteEvaluator {
    /// Rearms the evaluator at the start of a visible/pre-render scanline.
    pub(crate) fn begin_line(&mut self) {
        self.index = 0;
        self.found = 0;
        self.staged = [SpriteSlot::default(); SPRITES_PER_LINE];
    }

    /// Examines the next primary entry against the scanline being prepared.
    ///
    /// `line` is the scanline the evaluated sprites will be composited
    /// against, with the pre-render line passed as -1. Steps are skipped
    /// entirely while sprite rendering is disabled.
    pub(crate) fn step(
        &mut self,
        line: i16,
        sprite_height: u16,
        sprites_enabled: bool,
        oam: &OamRam,
        status: &mut Status,
    ) {
        if !sprites_enabled {
            return;
        }
        let n = usize::from(self.index);
        self.index += 1;
        debug_assert!(n < oam.len() / OAM_BYTES_PER_SPRITE);

        let entry = &oam[n * OAM_BYTES_PER_SPRITE..(n + 1) * OAM_BYTES_PER_SPRITE];
        let row = line - i16::from(entry[0]);
        if row < 0 || row >= sprite_height as i16 {
            return;
        }
        if self.found as usize == SPRITES_PER_LINE {
            status.insert(Status::SPRITE_OVERFLOW);
            return;
        }

        self.staged[self.found as usize] = SpriteSlot {
            id: n as u8,
            row: row as u8,
            tile: entry[1],
            attr: SpriteAttributes::from_bits_retain(entry[2]),
            x: entry[3],
            pattern_low: 0,
            pattern_high: 0,
        };
        self.found += 1;
    }

    /// The staged slots, consumed by the dot-256 handoff into the fetch stage.
    pub(crate) fn staged(&self) -> &[SpriteSlot; SPRITES_PER_LINE] {
        &self.staged
    }

    #[cfg(test)]
    pub(crate) fn found(&self) -> u8 {
        self.found
    }

    pub(crate) fn save_state(&self) -> crate::ppu::savestate::SpriteEvaluatorState {
        crate::ppu::savestate::SpriteEvaluatorState {
            index: self.index,
            found: self.found,
            staged: self.staged.map(Into::into),
        }
    }

    pub(crate) fn load_state(&mut self, state: &crate::ppu::savestate::SpriteEvaluatorState) {
        self.index = state.index;
        self.found = state.found.min(SPRITES_PER_LINE as u8);
        self.staged = state.staged.map(Into::into);
    }
}
