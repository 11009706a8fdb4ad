//! The video chip core.
//!
//! [`Ppu`] is an explicitly owned context object: the register file, the
//! chip-owned memory regions, the raster pipeline state and the position
//! counters live here, created at power-on and zeroed by [`Ppu::reset`].
//! The CPU reaches it through [`Ppu::cpu_read`]/[`Ppu::cpu_write`]; the
//! driving loop advances it one dot at a time with [`Ppu::clock`]. Pattern
//! and nametable storage stay behind the [`Mapper`](crate::bus::Mapper)
//! collaborator.

pub mod address;
pub mod buffer;
pub(crate) mod raster;
pub(crate) mod registers;
pub mod savestate;
pub(crate) mod sprites;

use core::fmt;

use tracing::{debug, trace};

use crate::{
    bus::Mapper,
    mem_block::{OamRam, PaletteRam},
    memory::{
        self, LAST_VISIBLE_LINE, LINES_PER_FRAME, PRE_RENDER_LINE, Register, VBLANK_LINE,
    },
    ppu::{
        buffer::FrameBuffer,
        raster::LineState,
        registers::{Mask, Registers, Status},
    },
};

/// Video chip state: registers, chip-owned memories, raster pipeline and
/// position counters.
#[derive(Clone)]
pub struct Ppu {
    pub(crate) regs: Registers,
    /// Primary sprite memory, mutated through ports 3/4.
    pub(crate) oam: OamRam,
    pub(crate) palette: PaletteRam,
    /// Per-scanline raster pipeline state (shifters, latches, sprite slots).
    pub(crate) line: LineState,
    pub(crate) frame_buffer: FrameBuffer,
    /// Current scanline (0..=261; 261 is the pre-render line).
    pub(crate) scanline: u16,
    /// Current dot within the scanline (0..=340).
    pub(crate) dot: u16,
    /// Frames completed since power-on.
    pub(crate) frame: u64,
    /// Frame parity; odd frames shorten the pre-render line by one dot while
    /// rendering is enabled.
    pub(crate) odd_frame: bool,
    /// Level of the interrupt line driven toward the CPU core.
    pub(crate) nmi_line: bool,
}

impl Ppu {
    /// Creates a powered-on chip with cleared memories and registers.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            oam: OamRam::new(),
            palette: PaletteRam::new(),
            line: LineState::default(),
            frame_buffer: FrameBuffer::new(),
            scanline: 0,
            dot: 0,
            frame: 0,
            odd_frame: false,
            nmi_line: false,
        }
    }

    /// Restores the power-on state in place.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.oam.as_mut_slice().fill(0);
        self.palette.as_mut_slice().fill(0);
        self.line = LineState::default();
        self.frame_buffer.clear();
        self.scanline = 0;
        self.dot = 0;
        self.frame = 0;
        self.odd_frame = false;
        self.nmi_line = false;
    }

    /// Advances the chip by one dot.
    ///
    /// Register writes applied between two `clock` calls are visible to the
    /// second one; mid-scanline raster effects depend on that.
    pub fn clock(&mut self, mapper: &mut dyn Mapper) {
        match self.scanline {
            0..=LAST_VISIBLE_LINE | PRE_RENDER_LINE => self.raster_dot(mapper),
            _ => {} // vblank lines only burn time
        }
        self.advance_dot();
    }

    // --- CPU-facing register ports -------------------------------------

    /// Handles a CPU read of one of the eight ports (address taken mod 8).
    pub fn cpu_read(&mut self, addr: u16, mapper: &mut dyn Mapper) -> u8 {
        match Register::from_cpu_addr(addr) {
            Register::Status => self.read_status(),
            Register::OamData => self.read_oam_data(),
            Register::Data => self.read_vram_data(mapper),
            // Write-only ports have no storage of their own; the stale bus
            // latch reads back instead.
            _ => self.regs.data_latch,
        }
    }

    /// Handles a CPU write to one of the eight ports (address taken mod 8).
    pub fn cpu_write(&mut self, addr: u16, value: u8, mapper: &mut dyn Mapper) {
        self.regs.data_latch = value;
        match Register::from_cpu_addr(addr) {
            Register::Control => {
                self.regs.write_control(value);
                let level = self.regs.control.nmi_enabled()
                    && self.regs.status.contains(Status::VERTICAL_BLANK);
                self.set_nmi_line(level);
            }
            Register::Mask => self.regs.write_mask(value),
            Register::Status => {} // read-only
            Register::OamAddr => self.regs.oam_addr = value,
            Register::OamData => self.write_oam_data(value),
            Register::Scroll => self.regs.vram.write_scroll(value),
            Register::Addr => self.regs.vram.write_addr(value),
            Register::Data => self.write_vram_data(value, mapper),
        }
    }

    fn read_status(&mut self) -> u8 {
        let value = (self.regs.status.bits() & 0xE0) | (self.regs.data_latch & 0x1F);
        self.regs.status.remove(Status::VERTICAL_BLANK);
        self.set_nmi_line(false);
        self.regs.vram.reset_toggle();
        value
    }

    fn read_oam_data(&self) -> u8 {
        let value = self.oam[usize::from(self.regs.oam_addr)];
        if self.regs.oam_addr & 3 == 3 {
            // The upper three attribute bits are not wired in hardware.
            value & 0xE3
        } else {
            value
        }
    }

    fn write_oam_data(&mut self, value: u8) {
        self.oam[usize::from(self.regs.oam_addr)] = value;
        self.regs.oam_addr = self.regs.oam_addr.wrapping_add(1);
    }

    fn read_vram_data(&mut self, mapper: &mut dyn Mapper) -> u8 {
        let addr = self.regs.vram_addr();
        let value = if addr < memory::PATTERN_SPACE_END {
            let buffered = self.regs.read_buffer;
            self.regs.read_buffer = mapper.pattern_read(addr);
            buffered
        } else if addr < memory::PALETTE_BASE {
            let buffered = self.regs.read_buffer;
            self.regs.read_buffer = mapper.nametable_read(addr & memory::NAMETABLE_WINDOW_MASK);
            buffered
        } else {
            // Palette reads skip the buffer but still refill it from the
            // nametable memory mirrored underneath.
            self.regs.read_buffer = mapper.nametable_read(addr & memory::NAMETABLE_WINDOW_MASK);
            self.palette_read(addr)
        };
        self.regs.increment_vram_addr();
        value
    }

    fn write_vram_data(&mut self, value: u8, mapper: &mut dyn Mapper) {
        let addr = self.regs.vram_addr();
        if addr < memory::PATTERN_SPACE_END {
            mapper.pattern_write(addr, value);
        } else if addr < memory::PALETTE_BASE {
            mapper.nametable_write(addr & memory::NAMETABLE_WINDOW_MASK, value);
        } else {
            self.palette_write(addr, value);
        }
        self.regs.increment_vram_addr();
    }

    // --- Palette RAM ---------------------------------------------------

    fn palette_index(addr: u16) -> usize {
        // Entries $10/$14/$18/$1C mirror the backdrop column.
        let addr = if addr & 0x13 == 0x10 { addr & !0x10 } else { addr };
        usize::from(addr & 0x1F)
    }

    pub(crate) fn palette_read(&self, addr: u16) -> u8 {
        let value = self.palette[Self::palette_index(addr)];
        if self.regs.mask.contains(Mask::GRAYSCALE) {
            value & 0x30
        } else {
            value
        }
    }

    fn palette_write(&mut self, addr: u16, value: u8) {
        self.palette[Self::palette_index(addr)] = value;
    }

    // --- Position counters and edges -----------------------------------

    fn advance_dot(&mut self) {
        self.dot += 1;
        if self.dot >= self.line_length() {
            self.dot = 0;
            self.advance_scanline();
        }
    }

    /// Dots in the current scanline. The pre-render line of an odd-parity
    /// frame drops its last dot while rendering is enabled, keeping the
    /// two-frame master-clock total exact.
    fn line_length(&self) -> u16 {
        if self.scanline == PRE_RENDER_LINE
            && self.odd_frame
            && self.regs.mask.rendering_enabled()
        {
            memory::DOTS_PER_LINE - 1
        } else {
            memory::DOTS_PER_LINE
        }
    }

    fn advance_scanline(&mut self) {
        self.scanline += 1;
        if self.scanline == LINES_PER_FRAME {
            self.scanline = 0;
            self.frame_edge();
        }
        self.scanline_edge();
    }

    fn scanline_edge(&mut self) {
        if self.scanline == VBLANK_LINE {
            self.regs.status.insert(Status::VERTICAL_BLANK);
            if self.regs.control.nmi_enabled() {
                self.set_nmi_line(true);
            }
        }
        if self.scanline == PRE_RENDER_LINE {
            self.regs.status.remove(Status::VERTICAL_BLANK | Status::SPRITE_ZERO_HIT);
            self.set_nmi_line(false);
        }
    }

    fn frame_edge(&mut self) {
        self.odd_frame = !self.odd_frame;
        self.frame = self.frame.wrapping_add(1);
        debug!(frame = self.frame, "frame complete");
    }

    pub(crate) fn set_nmi_line(&mut self, level: bool) {
        if self.nmi_line != level {
            trace!(level, "interrupt line");
            self.nmi_line = level;
        }
    }

    // --- Accessors -----------------------------------------------------

    /// Frames completed since power-on.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Current scanline (0..=261).
    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    /// Current dot within the scanline (0..=340).
    pub fn dot(&self) -> u16 {
        self.dot
    }

    /// Frame parity flag.
    pub fn odd_frame(&self) -> bool {
        self.odd_frame
    }

    /// Level of the interrupt line toward the CPU core.
    pub fn nmi_line(&self) -> bool {
        self.nmi_line
    }

    /// The output plane. Complete once per frame edge; rows above the
    /// current scanline belong to the frame in progress.
    pub fn frame_buffer(&self) -> &FrameBuffer {
        &self.frame_buffer
    }

    /// Debug-only: overrides the position counters for trace alignment.
    pub fn debug_set_position(&mut self, scanline: u16, dot: u16, frame: u64) {
        self.scanline = scanline % LINES_PER_FRAME;
        self.dot = dot % memory::DOTS_PER_LINE;
        self.frame = frame;
        self.odd_frame = frame & 1 == 1;
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Ppu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ppu")
            .field("regs", &self.regs)
            .field("scanline", &self.scanline)
            .field("dot", &self.dot)
            .field("frame", &self.frame)
            .field("odd_frame", &self.odd_frame)
            .field("nmi_line", &self.nmi_line)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::bus::mock::RamMapper;
    use crate::memory::Register;

    fn write(ppu: &mut Ppu, mapper: &mut RamMapper, reg: Register, value: u8) {
        ppu.cpu_write(reg.offset(), value, mapper);
    }

    fn read(ppu: &mut Ppu, mapper: &mut RamMapper, reg: Register) -> u8 {
        ppu.cpu_read(reg.offset(), mapper)
    }

    fn set_vram_addr(ppu: &mut Ppu, mapper: &mut RamMapper, addr: u16) {
        write(ppu, mapper, Register::Addr, (addr >> 8) as u8);
        write(ppu, mapper, Register::Addr, addr as u8);
    }

    #[test]
    fn status_read_clears_vblank_and_write_toggle_from_any_state() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
        for _ in 0..crate::tests::TEST_COUNT {
            let mut ppu = Ppu::new();
            ppu.regs.status = Status::from_bits_retain(rng.random::<u8>() & 0xE0);
            ppu.regs.vram.w = rng.random();
            ppu.regs.data_latch = rng.random();
            ppu.nmi_line = rng.random();

            let expected = (ppu.regs.status.bits() & 0xE0) | (ppu.regs.data_latch & 0x1F);
            let mut mapper = RamMapper::new();
            let value = read(&mut ppu, &mut mapper, Register::Status);

            assert_eq!(value, expected);
            assert!(!ppu.regs.status.contains(Status::VERTICAL_BLANK));
            assert!(!ppu.regs.vram.w);
            assert!(!ppu.nmi_line);
        }
    }

    #[test]
    fn buffered_data_read_lags_one_access() {
        let mut ppu = Ppu::new();
        let mut mapper = RamMapper::new();
        set_vram_addr(&mut ppu, &mut mapper, 0x2000);
        write(&mut ppu, &mut mapper, Register::Data, 0x12);

        set_vram_addr(&mut ppu, &mut mapper, 0x2000);
        let first = read(&mut ppu, &mut mapper, Register::Data);
        let second = read(&mut ppu, &mut mapper, Register::Data);
        assert_eq!(first, 0x00, "first read returns the stale buffer");
        assert_eq!(second, 0x12);
    }

    #[test]
    fn pattern_space_reads_are_buffered_too() {
        let mut ppu = Ppu::new();
        let mut mapper = RamMapper::new();
        mapper.pattern[0x0005] = 0xAB;
        set_vram_addr(&mut ppu, &mut mapper, 0x0005);
        assert_eq!(read(&mut ppu, &mut mapper, Register::Data), 0x00);
        set_vram_addr(&mut ppu, &mut mapper, 0x0005);
        assert_eq!(read(&mut ppu, &mut mapper, Register::Data), 0xAB);
    }

    #[test]
    fn palette_reads_bypass_buffer_but_refill_it() {
        let mut ppu = Ppu::new();
        let mut mapper = RamMapper::new();
        // Nametable byte mirrored underneath the palette address.
        mapper.nametable[0x705] = 0x77;
        set_vram_addr(&mut ppu, &mut mapper, 0x3F05);
        write(&mut ppu, &mut mapper, Register::Data, 0x2A);

        set_vram_addr(&mut ppu, &mut mapper, 0x3F05);
        assert_eq!(read(&mut ppu, &mut mapper, Register::Data), 0x2A);
        assert_eq!(ppu.regs.read_buffer, 0x77);
    }

    #[test]
    fn data_access_increments_by_one_or_thirty_two() {
        let mut ppu = Ppu::new();
        let mut mapper = RamMapper::new();
        set_vram_addr(&mut ppu, &mut mapper, 0x2000);
        write(&mut ppu, &mut mapper, Register::Data, 0);
        assert_eq!(ppu.regs.vram.v.raw(), 0x2001);

        write(&mut ppu, &mut mapper, Register::Control, 0b0000_0100);
        write(&mut ppu, &mut mapper, Register::Data, 0);
        assert_eq!(ppu.regs.vram.v.raw(), 0x2021);
    }

    #[test]
    fn palette_mirror_folds_backdrop_column() {
        let mut ppu = Ppu::new();
        let mut mapper = RamMapper::new();
        set_vram_addr(&mut ppu, &mut mapper, 0x3F10);
        write(&mut ppu, &mut mapper, Register::Data, 0x2D);
        assert_eq!(ppu.palette[0x00], 0x2D);
        assert_eq!(ppu.palette_read(0x3F10), 0x2D);
        assert_eq!(ppu.palette_read(0x3F00), 0x2D);
    }

    #[test]
    fn grayscale_masks_palette_reads() {
        let mut ppu = Ppu::new();
        let mut mapper = RamMapper::new();
        set_vram_addr(&mut ppu, &mut mapper, 0x3F01);
        write(&mut ppu, &mut mapper, Register::Data, 0x3F);
        write(&mut ppu, &mut mapper, Register::Mask, 0b0000_0001);
        assert_eq!(ppu.palette_read(0x3F01), 0x30);
        write(&mut ppu, &mut mapper, Register::Mask, 0);
        assert_eq!(ppu.palette_read(0x3F01), 0x3F);
    }

    #[test]
    fn oam_writes_auto_increment_reads_do_not() {
        let mut ppu = Ppu::new();
        let mut mapper = RamMapper::new();
        write(&mut ppu, &mut mapper, Register::OamAddr, 0x02);
        write(&mut ppu, &mut mapper, Register::OamData, 0xAA);
        write(&mut ppu, &mut mapper, Register::OamData, 0xBB);
        assert_eq!(ppu.oam[2], 0xAA);
        assert_eq!(ppu.oam[3], 0xBB);

        write(&mut ppu, &mut mapper, Register::OamAddr, 0x02);
        assert_eq!(read(&mut ppu, &mut mapper, Register::OamData), 0xAA);
        assert_eq!(read(&mut ppu, &mut mapper, Register::OamData), 0xAA);
    }

    #[test]
    fn oam_attribute_bytes_read_back_partially_wired() {
        let mut ppu = Ppu::new();
        let mut mapper = RamMapper::new();
        write(&mut ppu, &mut mapper, Register::OamAddr, 0x03);
        write(&mut ppu, &mut mapper, Register::OamData, 0xFF);
        write(&mut ppu, &mut mapper, Register::OamAddr, 0x03);
        assert_eq!(read(&mut ppu, &mut mapper, Register::OamData), 0xE3);
    }

    #[test]
    fn write_only_ports_read_back_the_bus_latch() {
        let mut ppu = Ppu::new();
        let mut mapper = RamMapper::new();
        write(&mut ppu, &mut mapper, Register::Control, 0x5A);
        for reg in [
            Register::Control,
            Register::Mask,
            Register::OamAddr,
            Register::Scroll,
            Register::Addr,
        ] {
            assert_eq!(read(&mut ppu, &mut mapper, reg), 0x5A);
        }
    }

    #[test]
    fn control_write_gates_the_interrupt_line() {
        let mut ppu = Ppu::new();
        let mut mapper = RamMapper::new();
        ppu.regs.status.insert(Status::VERTICAL_BLANK);

        write(&mut ppu, &mut mapper, Register::Control, 0x80);
        assert!(ppu.nmi_line(), "enable during vblank raises the line");
        write(&mut ppu, &mut mapper, Register::Control, 0x00);
        assert!(!ppu.nmi_line(), "disable drops it again");
    }

    #[test]
    fn vblank_edges_follow_the_scanline_counter() {
        let mut ppu = Ppu::new();
        let mut mapper = RamMapper::new();
        write(&mut ppu, &mut mapper, Register::Control, 0x80);

        while !(ppu.scanline() == VBLANK_LINE && ppu.dot() == 0) {
            ppu.clock(&mut mapper);
        }
        assert!(ppu.regs.status.contains(Status::VERTICAL_BLANK));
        assert!(ppu.nmi_line());

        while !(ppu.scanline() == PRE_RENDER_LINE && ppu.dot() == 0) {
            ppu.clock(&mut mapper);
        }
        assert!(!ppu.regs.status.contains(Status::VERTICAL_BLANK));
        assert!(!ppu.nmi_line());
    }
}
