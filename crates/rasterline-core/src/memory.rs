//! Video-chip address map.
//!
//! Centralizing address-related constants keeps the hardware layout in one
//! location and prevents magic numbers from sneaking into the register and
//! raster code.

/// Mask for decoding register mirrors (`addr & 0x0007`).
pub const REGISTER_SELECT_MASK: u16 = 0x0007;

/// Address mask applied to every VRAM access to wrap to the 16 KiB space.
pub const VRAM_MIRROR_MASK: u16 = 0x3FFF;

/// Pattern table base address for table 0.
pub const PATTERN_TABLE_0: u16 = 0x0000;
/// Pattern table base address for table 1.
pub const PATTERN_TABLE_1: u16 = 0x1000;
/// First address past the pattern table space (`$0000-$1FFF`).
pub const PATTERN_SPACE_END: u16 = 0x2000;

/// Base address of the nametable window (`$2000`).
pub const NAMETABLE_BASE: u16 = 0x2000;
/// Size of a single nametable in bytes.
pub const NAMETABLE_SIZE: u16 = 0x0400;
/// Mask reducing a VRAM address to a 12-bit nametable-window offset.
///
/// The mapper receives offsets in this window and applies its own mirroring
/// into the physical 2 KiB of nametable RAM it owns.
pub const NAMETABLE_WINDOW_MASK: u16 = 0x0FFF;
/// Offset of the attribute area within a nametable.
pub const ATTRIBUTE_OFFSET: u16 = 0x03C0;

/// Palette RAM base address (`$3F00`).
pub const PALETTE_BASE: u16 = 0x3F00;
/// Palette RAM byte count (32 bytes mirrored through `$3FFF`).
pub const PALETTE_RAM_SIZE: usize = 0x20;

/// Primary sprite memory byte count (64 sprites x 4 bytes).
pub const OAM_RAM_SIZE: usize = 0x100;
/// Bytes per sprite entry in primary sprite memory.
pub const OAM_BYTES_PER_SPRITE: usize = 4;
/// Number of sprite slots selectable per scanline.
pub const SPRITES_PER_LINE: usize = 8;

/// Dots per scanline (the odd-frame skip removes one from the last line).
pub const DOTS_PER_LINE: u16 = 341;
/// Scanlines per frame.
pub const LINES_PER_FRAME: u16 = 262;
/// Last visible scanline.
pub const LAST_VISIBLE_LINE: u16 = 239;
/// Scanline on which the vertical blank flag is raised.
pub const VBLANK_LINE: u16 = 241;
/// The pre-render scanline.
pub const PRE_RENDER_LINE: u16 = 261;

/// CPU-visible register ports, decoded modulo 8.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// Port 0 - control (write only).
    Control = 0,
    /// Port 1 - mask (write only).
    Mask = 1,
    /// Port 2 - status (read only; reading clears the vblank flag).
    Status = 2,
    /// Port 3 - sprite memory address (write only).
    OamAddr = 3,
    /// Port 4 - sprite memory data (read/write, write auto-increments).
    OamData = 4,
    /// Port 5 - scroll (two-phase write).
    Scroll = 5,
    /// Port 6 - VRAM address (two-phase write).
    Addr = 6,
    /// Port 7 - VRAM data (read/write with the buffered-read quirk).
    Data = 7,
}

impl Register {
    /// Port offset backing the register.
    pub const fn offset(self) -> u16 {
        self as u16
    }

    /// Resolves the canonical register for any address in the mirror window.
    pub const fn from_cpu_addr(addr: u16) -> Self {
        match addr & REGISTER_SELECT_MASK {
            0 => Self::Control,
            1 => Self::Mask,
            2 => Self::Status,
            3 => Self::OamAddr,
            4 => Self::OamData,
            5 => Self::Scroll,
            6 => Self::Addr,
            _ => Self::Data,
        }
    }
}
