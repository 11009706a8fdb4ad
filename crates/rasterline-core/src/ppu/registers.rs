//! CPU-visible register state.
//!
//! The bit-packed control/mask/status registers map to [`bitflags`] types
//! with semantic helpers, so masking and shifting stays inside this module
//! instead of leaking into the raster code.

use bitflags::bitflags;

use crate::{
    memory,
    ppu::address::{VramAddr, VramRegisters},
};

bitflags! {
    /// Control register (port 0).
    ///
    /// Bit layout:
    /// ```text
    /// 7 6 5 4 3 2 1 0
    /// N M S B s I n n
    /// ```
    /// - `n n`: nametable select bits, loaded into `t`
    /// - `I`: VRAM increment (0=+1, 1=+32)
    /// - `s`: sprite pattern table for 8x8 sprites
    /// - `B`: background pattern table
    /// - `S`: sprite size (0=8x8, 1=8x16)
    /// - `M`: master/slave select
    /// - `N`: raise the interrupt line at vblank start
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) struct Control: u8 {
        const NAMETABLE = 0b0000_0011;
        const INCREMENT_32 = 0b0000_0100;
        const SPRITE_TABLE = 0b0000_1000;
        const BACKGROUND_TABLE = 0b0001_0000;
        const SPRITE_SIZE_16 = 0b0010_0000;
        const MASTER_SLAVE = 0b0100_0000;
        const NMI_ENABLE = 0b1000_0000;
    }
}

impl Default for Control {
    fn default() -> Self {
        Self::empty()
    }
}

impl Control {
    /// Nametable select bits (0..=3) mirrored into `t` on write.
    pub(crate) fn nametable_index(self) -> u8 {
        self.bits() & 0b11
    }

    /// VRAM address step applied after each data-port access.
    pub(crate) fn vram_increment(self) -> u16 {
        if self.contains(Control::INCREMENT_32) {
            32
        } else {
            1
        }
    }

    /// Pattern table base for 8x8 sprites.
    pub(crate) fn sprite_pattern_base(self) -> u16 {
        if self.contains(Control::SPRITE_TABLE) {
            memory::PATTERN_TABLE_1
        } else {
            memory::PATTERN_TABLE_0
        }
    }

    /// Pattern table base for background tiles.
    pub(crate) fn background_pattern_base(self) -> u16 {
        if self.contains(Control::BACKGROUND_TABLE) {
            memory::PATTERN_TABLE_1
        } else {
            memory::PATTERN_TABLE_0
        }
    }

    /// Sprite height in scanlines (8 or 16).
    pub(crate) fn sprite_height(self) -> u16 {
        if self.contains(Control::SPRITE_SIZE_16) {
            16
        } else {
            8
        }
    }

    pub(crate) fn nmi_enabled(self) -> bool {
        self.contains(Control::NMI_ENABLE)
    }
}

bitflags! {
    /// Mask register (port 1): layer enables, edge clips, grayscale and
    /// emphasis.
    ///
    /// Bit layout:
    /// ```text
    /// 7 6 5 4 3 2 1 0
    /// B G R S B s b g
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) struct Mask: u8 {
        const GRAYSCALE = 0b0000_0001;
        /// Show background in the leftmost eight pixels.
        const BACKGROUND_EDGE = 0b0000_0010;
        /// Show sprites in the leftmost eight pixels.
        const SPRITE_EDGE = 0b0000_0100;
        const SHOW_BACKGROUND = 0b0000_1000;
        const SHOW_SPRITES = 0b0001_0000;
        const EMPHASIZE_RED = 0b0010_0000;
        const EMPHASIZE_GREEN = 0b0100_0000;
        const EMPHASIZE_BLUE = 0b1000_0000;
    }
}

impl Default for Mask {
    fn default() -> Self {
        Self::empty()
    }
}

impl Mask {
    /// `true` when either layer is enabled; gates fetches and scroll
    /// increments.
    pub(crate) fn rendering_enabled(self) -> bool {
        self.intersects(Mask::SHOW_BACKGROUND | Mask::SHOW_SPRITES)
    }

    /// The three emphasis bits packed into the low bits of the result.
    pub(crate) fn emphasis(self) -> u16 {
        u16::from(self.bits() >> 5)
    }
}

bitflags! {
    /// Status register (port 2). Reading clears the vblank flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) struct Status: u8 {
        const SPRITE_OVERFLOW = 0b0010_0000;
        const SPRITE_ZERO_HIT = 0b0100_0000;
        const VERTICAL_BLANK = 0b1000_0000;
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::empty()
    }
}

/// Aggregate of all CPU-visible register state plus the internal latches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub(crate) struct Registers {
    pub(crate) control: Control,
    pub(crate) mask: Mask,
    pub(crate) status: Status,
    /// Sprite memory pointer driven by ports 3/4.
    pub(crate) oam_addr: u8,
    /// Bus-data latch: refreshed by every register write, read back through
    /// write-only ports and the low status bits.
    pub(crate) data_latch: u8,
    /// One-access-delayed buffer behind data-port reads.
    pub(crate) read_buffer: u8,
    /// Internal scroll/address registers (`v`/`t`/`x`/`w`).
    pub(crate) vram: VramRegisters,
}

impl Registers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    /// Applies a control write, syncing the nametable bits into `t`.
    pub(crate) fn write_control(&mut self, value: u8) {
        self.control = Control::from_bits_retain(value);
        self.vram.t.set_nametable(self.control.nametable_index());
    }

    /// Applies a mask write.
    pub(crate) fn write_mask(&mut self, value: u8) {
        self.mask = Mask::from_bits_retain(value);
    }

    /// Effective current VRAM address for data-port accesses.
    pub(crate) fn vram_addr(&self) -> u16 {
        self.vram.v.raw() & crate::memory::VRAM_MIRROR_MASK
    }

    /// Steps `v` after a data-port access.
    pub(crate) fn increment_vram_addr(&mut self) {
        let step = self.control.vram_increment();
        self.vram.v = VramAddr::from_raw(self.vram.v.raw().wrapping_add(step));
    }
}
