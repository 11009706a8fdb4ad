//! Externally serializable chip state.
//!
//! Save-state persistence belongs to an outer collaborator, but everything
//! the chip owns has to be exposed for it: [`PpuState`] captures the full
//! register file, both chip-owned memory regions, the raster pipeline in
//! flight and the position counters, so a restored chip resumes
//! bit-identically even mid-frame. With `savestate-serde` the types derive
//! serde; `savestate-postcard` adds a compact byte encoding on top.

#[cfg(feature = "savestate-serde")]
use serde::{Deserialize, Serialize};

use crate::{
    mem_block::{OamRam, PaletteRam},
    ppu::{
        Ppu,
        address::VramAddr,
        registers::{Control, Mask, Status},
        raster::{LineState, TileFetch},
        sprites::{SpriteAttributes, SpriteEvaluator, SpriteSlot},
    },
};

/// Register-file snapshot, bit fields flattened to raw bytes.
#[cfg_attr(feature = "savestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterState {
    pub control: u8,
    pub mask: u8,
    pub status: u8,
    pub oam_addr: u8,
    pub data_latch: u8,
    pub read_buffer: u8,
    /// Current VRAM address `v` (15 bits).
    pub v: u16,
    /// Temporary VRAM address `t` (15 bits).
    pub t: u16,
    /// Fine X scroll `x`.
    pub x: u8,
    /// Write toggle `w`.
    pub w: bool,
}

/// One secondary-memory sprite slot.
#[cfg_attr(feature = "savestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpriteSlotState {
    pub id: u8,
    pub row: u8,
    pub tile: u8,
    pub attr: u8,
    pub x: u8,
    pub pattern_low: u8,
    pub pattern_high: u8,
}

impl From<SpriteSlot> for SpriteSlotState {
    fn from(slot: SpriteSlot) -> Self {
        Self {
            id: slot.id,
            row: slot.row,
            tile: slot.tile,
            attr: slot.attr.bits(),
            x: slot.x,
            pattern_low: slot.pattern_low,
            pattern_high: slot.pattern_high,
        }
    }
}

impl From<SpriteSlotState> for SpriteSlot {
    fn from(state: SpriteSlotState) -> Self {
        Self {
            id: state.id,
            row: state.row,
            tile: state.tile,
            attr: SpriteAttributes::from_bits_retain(state.attr),
            x: state.x,
            pattern_low: state.pattern_low,
            pattern_high: state.pattern_high,
        }
    }
}

/// Sprite evaluation progress within the current scanline.
#[cfg_attr(feature = "savestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpriteEvaluatorState {
    pub index: u8,
    pub found: u8,
    pub staged: [SpriteSlotState; 8],
}

/// Raster pipeline state in flight: shifters, fetch latches, sprite slots.
#[cfg_attr(feature = "savestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RasterState {
    pub pattern_low: u16,
    pub pattern_high: u16,
    pub attribute: u16,
    pub fetch_attribute: u8,
    pub fetch_pattern_addr: u16,
    pub fetch_pattern_low: u8,
    pub fetch_pattern_high: u8,
    pub evaluator: SpriteEvaluatorState,
    pub active: [SpriteSlotState; 8],
    pub sprite_addr: u16,
}

/// Complete snapshot of the chip.
#[cfg_attr(feature = "savestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpuState {
    pub registers: RegisterState,
    pub oam: OamRam,
    pub palette: PaletteRam,
    pub raster: RasterState,
    /// The partially rendered frame plane, row-major.
    pub frame_pixels: Vec<u16>,
    pub scanline: u16,
    pub dot: u16,
    pub frame: u64,
    pub odd_frame: bool,
    pub nmi_line: bool,
}

#[cfg(feature = "savestate-postcard")]
impl PpuState {
    /// Encodes the snapshot with postcard.
    pub fn to_postcard(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decodes a snapshot previously produced by [`PpuState::to_postcard`].
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

impl Ppu {
    /// Captures everything the chip owns.
    pub fn save_state(&self) -> PpuState {
        PpuState {
            registers: RegisterState {
                control: self.regs.control.bits(),
                mask: self.regs.mask.bits(),
                status: self.regs.status.bits(),
                oam_addr: self.regs.oam_addr,
                data_latch: self.regs.data_latch,
                read_buffer: self.regs.read_buffer,
                v: self.regs.vram.v.raw(),
                t: self.regs.vram.t.raw(),
                x: self.regs.vram.x,
                w: self.regs.vram.w,
            },
            oam: self.oam.clone(),
            palette: self.palette.clone(),
            raster: RasterState {
                pattern_low: self.line.pattern_low,
                pattern_high: self.line.pattern_high,
                attribute: self.line.attribute,
                fetch_attribute: self.line.fetch.attribute,
                fetch_pattern_addr: self.line.fetch.pattern_addr,
                fetch_pattern_low: self.line.fetch.pattern_low,
                fetch_pattern_high: self.line.fetch.pattern_high,
                evaluator: self.line.evaluator.save_state(),
                active: self.line.active.map(Into::into),
                sprite_addr: self.line.sprite_addr,
            },
            frame_pixels: self.frame_buffer.pixels().to_vec(),
            scanline: self.scanline,
            dot: self.dot,
            frame: self.frame,
            odd_frame: self.odd_frame,
            nmi_line: self.nmi_line,
        }
    }

    /// Restores a snapshot captured by [`Ppu::save_state`].
    pub fn load_state(&mut self, state: &PpuState) {
        self.regs.control = Control::from_bits_retain(state.registers.control);
        self.regs.mask = Mask::from_bits_retain(state.registers.mask);
        self.regs.status = Status::from_bits_retain(state.registers.status);
        self.regs.oam_addr = state.registers.oam_addr;
        self.regs.data_latch = state.registers.data_latch;
        self.regs.read_buffer = state.registers.read_buffer;
        self.regs.vram.v = VramAddr::from_raw(state.registers.v);
        self.regs.vram.t = VramAddr::from_raw(state.registers.t);
        self.regs.vram.x = state.registers.x & 0b111;
        self.regs.vram.w = state.registers.w;

        self.oam = state.oam.clone();
        self.palette = state.palette.clone();

        self.line = LineState {
            pattern_low: state.raster.pattern_low,
            pattern_high: state.raster.pattern_high,
            attribute: state.raster.attribute,
            fetch: TileFetch {
                attribute: state.raster.fetch_attribute,
                pattern_addr: state.raster.fetch_pattern_addr,
                pattern_low: state.raster.fetch_pattern_low,
                pattern_high: state.raster.fetch_pattern_high,
            },
            evaluator: {
                let mut evaluator = SpriteEvaluator::default();
                evaluator.load_state(&state.raster.evaluator);
                evaluator
            },
            active: state.raster.active.map(Into::into),
            sprite_addr: state.raster.sprite_addr,
        };

        if state.frame_pixels.len() == self.frame_buffer.pixels().len() {
            self.frame_buffer.load_pixels(&state.frame_pixels);
        }
        self.scanline = state.scanline % crate::memory::LINES_PER_FRAME;
        self.dot = state.dot % crate::memory::DOTS_PER_LINE;
        self.frame = state.frame;
        self.odd_frame = state.odd_frame;
        self.nmi_line = state.nmi_line;
    }
}
