//! Per-dot raster engine.
//!
//! Visible and pre-render scanlines run the same 341-dot grid:
//!
//! ```text
//! dots 0-255    32 background tiles, 8 dots each: nametable / attribute /
//!               pattern low / pattern high fetches, one pixel per dot
//!               (visible lines only), sprite evaluation twice per tile
//! dots 256-319  next scanline's sprite pattern fetch, 8 dots per slot;
//!               horizontal scroll reload at dot 257, full reload at dot 304
//!               on the pre-render line
//! dots 320-335  prefetch of the next scanline's first two tiles
//! dots 336-340  trailing nametable/attribute fetches kept for bus timing
//! ```
//!
//! The background shifters hold two tiles; a reload shifts them left by a
//! whole tile and the sampler picks bit `15 - (fine_x + sub_dot)`, which is
//! how fine X scroll slides the visible window across the pair.

use crate::{
    bus::Mapper,
    memory::{
        ATTRIBUTE_OFFSET, LAST_VISIBLE_LINE, NAMETABLE_WINDOW_MASK, PRE_RENDER_LINE,
        SPRITES_PER_LINE,
    },
    ppu::{
        Ppu,
        registers::{Mask, Status},
        sprites::{SpriteAttributes, SpriteEvaluator, SpriteSlot},
    },
};

/// In-flight state of one scanline's fetch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct LineState {
    /// Background pattern shift registers, bitplanes 0 and 1. Two tiles deep.
    pub(crate) pattern_low: u16,
    pub(crate) pattern_high: u16,
    /// Attribute shift register: 2-bit palette selects, two tiles deep.
    pub(crate) attribute: u16,
    /// Latches filled across the 8-dot tile fetch, loaded into the shifters
    /// at the tile boundary.
    pub(crate) fetch: TileFetch,
    /// Sprite selection for the *next* scanline.
    pub(crate) evaluator: SpriteEvaluator,
    /// Sprite slots being composited on the current scanline; latched from
    /// the evaluator at dot 256 of the previous line and filled with pattern
    /// bytes during its dots 256-319.
    pub(crate) active: [SpriteSlot; SPRITES_PER_LINE],
    /// Pattern address latched at the start of each sprite fetch slot.
    pub(crate) sprite_addr: u16,
}

/// Background tile fetch latches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct TileFetch {
    pub(crate) attribute: u8,
    pub(crate) pattern_addr: u16,
    pub(crate) pattern_low: u8,
    pub(crate) pattern_high: u8,
}

impl Ppu {
    /// Runs one dot of a visible or pre-render scanline.
    pub(crate) fn raster_dot(&mut self, mapper: &mut dyn Mapper) {
        if self.dot == 0 {
            self.line.evaluator.begin_line();
        }
        match self.dot {
            0..=255 => self.background_dot(mapper),
            256..=319 => self.sprite_fetch_dot(mapper),
            320..=335 => self.prefetch_dot(mapper),
            // Trailing fetches with no consumer; the bus still sees them.
            336 => {
                let _ = self.nametable_load(mapper, self.regs.vram.v.raw());
            }
            338 => {
                let _ = self.attribute_load(mapper);
            }
            _ => {}
        }
    }

    // --- Background tiles (dots 0-255 and 320-335) ---------------------

    fn background_dot(&mut self, mapper: &mut dyn Mapper) {
        if self.scanline <= LAST_VISIBLE_LINE {
            self.raster_pixel();
        }
        match self.dot & 7 {
            0 => self.fetch_nametable(mapper),
            2 => self.fetch_attribute(mapper),
            3 => {
                if self.regs.mask.rendering_enabled() {
                    self.regs.vram.v.increment_coarse_x();
                    if self.dot == 251 {
                        // Once per line, alongside the last tile's X step.
                        self.regs.vram.v.increment_coarse_y();
                    }
                }
                self.evaluate_sprite();
            }
            4 => self.line.fetch.pattern_low = self.pattern_load(mapper, self.line.fetch.pattern_addr),
            6 => {
                self.line.fetch.pattern_high =
                    self.pattern_load(mapper, self.line.fetch.pattern_addr + 8)
            }
            7 => {
                self.evaluate_sprite();
                self.reload_shifters();
            }
            _ => {}
        }
    }

    fn prefetch_dot(&mut self, mapper: &mut dyn Mapper) {
        match self.dot & 7 {
            0 => self.fetch_nametable(mapper),
            2 => self.fetch_attribute(mapper),
            3 => {
                if self.regs.mask.rendering_enabled() {
                    self.regs.vram.v.increment_coarse_x();
                }
            }
            4 => self.line.fetch.pattern_low = self.pattern_load(mapper, self.line.fetch.pattern_addr),
            6 => {
                self.line.fetch.pattern_high =
                    self.pattern_load(mapper, self.line.fetch.pattern_addr + 8)
            }
            7 => self.reload_shifters(),
            _ => {}
        }
    }

    fn fetch_nametable(&mut self, mapper: &mut dyn Mapper) {
        let v = self.regs.vram.v;
        let tile = self.nametable_load(mapper, v.raw());
        self.line.fetch.pattern_addr = self.regs.control.background_pattern_base()
            + u16::from(tile) * 16
            + u16::from(v.fine_y());
    }

    fn fetch_attribute(&mut self, mapper: &mut dyn Mapper) {
        self.line.fetch.attribute = self.attribute_load(mapper);
    }

    /// Attribute byte for the tile under `v`, already shifted down to the
    /// 2-bit palette select of the tile's quadrant.
    fn attribute_load(&mut self, mapper: &mut dyn Mapper) -> u8 {
        let v = self.regs.vram.v;
        let scroll_x = v.scroll_x(self.regs.vram.x);
        let scroll_y = v.scroll_y();
        let addr =
            ATTRIBUTE_OFFSET | (v.raw() & 0x0C00) | ((scroll_y >> 5) << 3) | (scroll_x >> 5);
        let mut attribute = self.nametable_load(mapper, addr);
        if scroll_y & 16 != 0 {
            attribute >>= 4;
        }
        if scroll_x & 16 != 0 {
            attribute >>= 2;
        }
        attribute & 0b11
    }

    fn reload_shifters(&mut self) {
        let fetch = self.line.fetch;
        self.line.pattern_low = (self.line.pattern_low << 8) | u16::from(fetch.pattern_low);
        self.line.pattern_high = (self.line.pattern_high << 8) | u16::from(fetch.pattern_high);
        self.line.attribute = (self.line.attribute << 2) | u16::from(fetch.attribute);
    }

    fn evaluate_sprite(&mut self) {
        let line = if self.scanline == PRE_RENDER_LINE {
            -1
        } else {
            self.scanline as i16
        };
        self.line.evaluator.step(
            line,
            self.regs.control.sprite_height(),
            self.regs.mask.contains(Mask::SHOW_SPRITES),
            &self.oam,
            &mut self.regs.status,
        );
    }

    // --- Sprite pattern fetch (dots 256-319) ---------------------------

    fn sprite_fetch_dot(&mut self, mapper: &mut dyn Mapper) {
        if self.dot == 256 {
            // Hand the staged slots to the compositing side; they take
            // effect on the next scanline.
            self.line.active = *self.line.evaluator.staged();
        }
        let slot = usize::from((self.dot - 256) / 8);
        match (self.dot - 256) & 7 {
            0 => {
                if self.dot == 304
                    && self.scanline == PRE_RENDER_LINE
                    && self.regs.mask.rendering_enabled()
                {
                    // Vertical scroll reload: the whole temporary address.
                    self.regs.vram.v = self.regs.vram.t;
                }
                let _ = self.nametable_load(mapper, self.regs.vram.v.raw());
            }
            1 => {
                if self.dot == 257 && self.regs.mask.rendering_enabled() {
                    let t = self.regs.vram.t;
                    self.regs.vram.v.copy_horizontal_from(t);
                }
            }
            2 => {
                let _ = self.attribute_load(mapper);
                self.line.sprite_addr = self.sprite_pattern_addr(slot);
            }
            4 => {
                self.line.active[slot].pattern_low =
                    self.pattern_load(mapper, self.line.sprite_addr)
            }
            6 => {
                self.line.active[slot].pattern_high =
                    self.pattern_load(mapper, self.line.sprite_addr + 8)
            }
            _ => {}
        }
    }

    /// Pattern address for one sprite slot's covered row.
    ///
    /// 8x16 sprites ignore the pattern-table select: bit 0 of the tile index
    /// picks the table and the row skips to the second tile of the pair past
    /// row 7. Sentinel slots fetch from the bare sprite pattern base so the
    /// bus cadence stays identical.
    fn sprite_pattern_addr(&self, slot: usize) -> u16 {
        let entry = self.line.active[slot];
        let height = self.regs.control.sprite_height();
        let mut addr = if height == 8 {
            self.regs.control.sprite_pattern_base() + u16::from(entry.tile) * 16
        } else {
            u16::from(entry.tile & !1) * 16 + u16::from(entry.tile & 1) * 0x1000
        };
        let mut row = u16::from(entry.row);
        if entry.attr.contains(SpriteAttributes::FLIP_VERTICAL) {
            row ^= height - 1;
        }
        addr += row + (row & 8);
        if entry.is_sentinel() {
            addr = self.regs.control.sprite_pattern_base();
        }
        addr
    }

    // --- Pixel compositing ---------------------------------------------

    /// Emits the pixel for the current dot (0-255) of a visible scanline.
    fn raster_pixel(&mut self) {
        let x = usize::from(self.dot);
        let sub = self.dot & 7;
        let mask = 0x8000u16 >> (u16::from(self.regs.vram.x) + sub);

        let mut palette: u16 = 0;
        if self.line.pattern_low & mask != 0 {
            palette |= 1;
        }
        if self.line.pattern_high & mask != 0 {
            palette |= 2;
        }
        if palette != 0 {
            let mut attribute = self.line.attribute;
            if mask >= 0x100 {
                // Sampling the older tile in the high byte.
                attribute >>= 2;
            }
            palette |= (attribute & 0b11) << 2;
        }
        if !self.regs.mask.contains(Mask::SHOW_BACKGROUND)
            || (x < 8 && !self.regs.mask.contains(Mask::BACKGROUND_EDGE))
        {
            palette = 0;
        }

        let mut sprite_palette: u16 = 0;
        let mut sprite_behind = false;
        let mut sprite_zero = false;
        if self.regs.mask.contains(Mask::SHOW_SPRITES)
            && !(x < 8 && !self.regs.mask.contains(Mask::SPRITE_EDGE))
        {
            // Slot 7 down to slot 0 so the lowest id overwrites ties.
            for entry in self.line.active.iter().rev() {
                if entry.is_sentinel() {
                    continue;
                }
                let offset = x as i32 - i32::from(entry.x);
                if !(0..8).contains(&offset) {
                    continue;
                }
                let mut column = offset as u16;
                if entry.attr.contains(SpriteAttributes::FLIP_HORIZONTAL) {
                    column ^= 7;
                }
                let bit = 0x80u8 >> column;
                let mut color: u16 = 0;
                if entry.pattern_low & bit != 0 {
                    color |= 1;
                }
                if entry.pattern_high & bit != 0 {
                    color |= 2;
                }
                if color == 0 {
                    continue;
                }
                if entry.id == 0 && palette != 0 {
                    sprite_zero = true;
                }
                color |= u16::from(entry.attr.palette_index()) << 2;
                sprite_behind = entry
                    .attr
                    .contains(SpriteAttributes::PRIORITY_BEHIND_BACKGROUND);
                sprite_palette = 16 + color;
            }
        }
        if sprite_zero {
            self.regs.status.insert(Status::SPRITE_ZERO_HIT);
        }

        if sprite_palette != 0 && (palette == 0 || !sprite_behind) {
            palette = sprite_palette;
        }
        if !self.regs.mask.rendering_enabled() {
            palette = 0;
        }

        let pixel = (self.regs.mask.emphasis() << 6) | u16::from(self.palette_read(palette));
        self.frame_buffer
            .set_pixel(x, usize::from(self.scanline), pixel);
    }

    // --- Gated collaborator loads --------------------------------------

    /// Nametable fetch for the raster pipeline. While rendering is disabled
    /// the bus is idle and the fetch reads back zero without reaching the
    /// mapper.
    fn nametable_load(&mut self, mapper: &mut dyn Mapper, addr: u16) -> u8 {
        if !self.regs.mask.rendering_enabled() {
            return 0;
        }
        mapper.nametable_read(addr & NAMETABLE_WINDOW_MASK)
    }

    /// Pattern fetch for the raster pipeline, gated like [`Self::nametable_load`].
    fn pattern_load(&mut self, mapper: &mut dyn Mapper, addr: u16) -> u8 {
        if !self.regs.mask.rendering_enabled() {
            return 0;
        }
        mapper.pattern_read(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppu::registers::Mask;
    use crate::ppu::sprites::SENTINEL_ID;

    fn ppu_with_mask(mask: Mask) -> Ppu {
        let mut ppu = Ppu::new();
        ppu.regs.mask = mask;
        ppu.scanline = 10;
        ppu
    }

    fn sprite(id: u8, x: u8, attr: u8, low: u8, high: u8) -> SpriteSlot {
        SpriteSlot {
            id,
            row: 0,
            tile: 0,
            attr: SpriteAttributes::from_bits_retain(attr),
            x,
            pattern_low: low,
            pattern_high: high,
        }
    }

    fn emit(ppu: &mut Ppu, dot: u16) -> u16 {
        ppu.dot = dot;
        ppu.raster_pixel();
        ppu.frame_buffer.pixel(usize::from(dot), 10)
    }

    #[test]
    fn background_samples_through_fine_x() {
        let mut ppu = ppu_with_mask(Mask::SHOW_BACKGROUND | Mask::BACKGROUND_EDGE);
        ppu.palette.as_mut_slice()[1] = 0x21;
        // One lit pixel in the newest tile's first column (bit 7).
        ppu.line.pattern_low = 0x0080;

        assert_eq!(emit(&mut ppu, 8), 0, "bit 15-8 window misses it");
        ppu.regs.vram.x = 7;
        assert_eq!(emit(&mut ppu, 1), 0x21, "fine_x 7 + sub 1 reaches bit 7");
    }

    #[test]
    fn attribute_lane_follows_sampled_tile() {
        let mut ppu = ppu_with_mask(Mask::SHOW_BACKGROUND | Mask::BACKGROUND_EDGE);
        // Older tile palette 1, newer tile palette 2; both planes lit.
        ppu.line.pattern_low = 0xFFFF;
        ppu.line.attribute = 0b0110;
        ppu.palette.as_mut_slice()[0b0101] = 0x11; // palette 1, color 1
        ppu.palette.as_mut_slice()[0b1001] = 0x22; // palette 2, color 1

        assert_eq!(emit(&mut ppu, 8), 0x11, "high-byte sample uses older lane");
        ppu.regs.vram.x = 7;
        assert_eq!(emit(&mut ppu, 1), 0x22, "low-byte sample uses newer lane");
    }

    #[test]
    fn sprite_wins_over_transparent_background() {
        let mut ppu = ppu_with_mask(
            Mask::SHOW_BACKGROUND | Mask::SHOW_SPRITES | Mask::BACKGROUND_EDGE | Mask::SPRITE_EDGE,
        );
        ppu.line.active[0] = sprite(5, 40, 0, 0x80, 0);
        ppu.palette.as_mut_slice()[16 + 1] = 0x15;

        assert_eq!(emit(&mut ppu, 40), 0x15);
        assert_eq!(emit(&mut ppu, 39), 0, "left of the sprite stays backdrop");
        assert_eq!(emit(&mut ppu, 48), 0, "past the 8-pixel span");
    }

    #[test]
    fn behind_priority_yields_to_opaque_background() {
        let mut ppu = ppu_with_mask(
            Mask::SHOW_BACKGROUND | Mask::SHOW_SPRITES | Mask::BACKGROUND_EDGE | Mask::SPRITE_EDGE,
        );
        ppu.line.pattern_low = 0xFFFF;
        ppu.palette.as_mut_slice()[1] = 0x0A;
        ppu.line.active[0] = sprite(3, 40, 0x20, 0xFF, 0);
        ppu.palette.as_mut_slice()[16 + 1] = 0x15;

        assert_eq!(emit(&mut ppu, 40), 0x0A, "background keeps the pixel");

        ppu.line.active[0].attr = SpriteAttributes::empty();
        assert_eq!(emit(&mut ppu, 40), 0x15, "front priority takes it");
    }

    #[test]
    fn lowest_sprite_id_wins_overlaps() {
        let mut ppu = ppu_with_mask(Mask::SHOW_SPRITES | Mask::SPRITE_EDGE);
        ppu.line.active[0] = sprite(2, 40, 0b01, 0xFF, 0);
        ppu.line.active[1] = sprite(9, 40, 0b10, 0xFF, 0);
        ppu.palette.as_mut_slice()[16 + 0b0101] = 0x31;
        ppu.palette.as_mut_slice()[16 + 0b1001] = 0x32;

        assert_eq!(emit(&mut ppu, 40), 0x31, "slot 0 overwrites slot 1");
    }

    #[test]
    fn sentinel_slots_are_transparent() {
        let mut ppu = ppu_with_mask(Mask::SHOW_SPRITES | Mask::SPRITE_EDGE);
        ppu.line.active[0] = sprite(SENTINEL_ID, 40, 0, 0xFF, 0xFF);
        assert_eq!(emit(&mut ppu, 40), 0);
    }

    #[test]
    fn sprite_zero_hit_needs_both_layers_opaque() {
        let mut ppu = ppu_with_mask(
            Mask::SHOW_BACKGROUND | Mask::SHOW_SPRITES | Mask::BACKGROUND_EDGE | Mask::SPRITE_EDGE,
        );
        ppu.line.active[0] = sprite(0, 40, 0, 0xFF, 0);

        emit(&mut ppu, 40);
        assert!(
            !ppu.regs.status.contains(Status::SPRITE_ZERO_HIT),
            "transparent background cannot hit"
        );

        ppu.line.pattern_low = 0xFFFF;
        emit(&mut ppu, 40);
        assert!(ppu.regs.status.contains(Status::SPRITE_ZERO_HIT));
    }

    #[test]
    fn edge_clips_suppress_the_left_column() {
        let mut ppu = ppu_with_mask(Mask::SHOW_BACKGROUND | Mask::SHOW_SPRITES);
        ppu.line.pattern_low = 0xFFFF;
        ppu.palette.as_mut_slice()[1] = 0x0A;
        ppu.line.active[0] = sprite(0, 0, 0, 0xFF, 0);

        assert_eq!(emit(&mut ppu, 3), 0, "both layers clipped in the left 8");
        assert!(!ppu.regs.status.contains(Status::SPRITE_ZERO_HIT));
        assert_eq!(emit(&mut ppu, 9), 0x0A, "background resumes past pixel 7");
    }

    #[test]
    fn rendering_disabled_forces_backdrop() {
        let mut ppu = ppu_with_mask(Mask::empty());
        ppu.line.pattern_low = 0xFFFF;
        ppu.palette.as_mut_slice()[0] = 0x0D;
        ppu.palette.as_mut_slice()[1] = 0x0A;
        assert_eq!(emit(&mut ppu, 40), 0x0D);
    }

    #[test]
    fn emphasis_bits_ride_above_the_color() {
        let mut ppu = ppu_with_mask(
            Mask::SHOW_BACKGROUND | Mask::BACKGROUND_EDGE | Mask::EMPHASIZE_RED,
        );
        ppu.line.pattern_low = 0xFFFF;
        ppu.palette.as_mut_slice()[1] = 0x0A;
        assert_eq!(emit(&mut ppu, 40), (0b001 << 6) | 0x0A);
    }

    #[test]
    fn sprite_pattern_addr_modes() {
        let mut ppu = Ppu::new();
        ppu.regs.write_control(0b0000_1000); // 8x8 sprites from $1000
        ppu.line.active[0] = SpriteSlot {
            id: 1,
            row: 3,
            tile: 5,
            ..SpriteSlot::default()
        };
        assert_eq!(ppu.sprite_pattern_addr(0), 0x1000 + 5 * 16 + 3);

        ppu.line.active[0].attr = SpriteAttributes::FLIP_VERTICAL;
        assert_eq!(ppu.sprite_pattern_addr(0), 0x1000 + 5 * 16 + 4);

        // 8x16: bit 0 of the tile picks the table, row 12 skips to the
        // second tile of the pair.
        ppu.regs.write_control(0b0010_0000);
        ppu.line.active[0] = SpriteSlot {
            id: 1,
            row: 12,
            tile: 5,
            ..SpriteSlot::default()
        };
        assert_eq!(ppu.sprite_pattern_addr(0), 4 * 16 + 0x1000 + 12 + 8);

        // Sentinels fall back to the bare pattern base.
        ppu.regs.write_control(0b0000_1000);
        ppu.line.active[0] = SpriteSlot::default();
        assert_eq!(ppu.sprite_pattern_addr(0), 0x1000);
    }
}
