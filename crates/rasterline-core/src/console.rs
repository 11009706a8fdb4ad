//! Deterministic driver loop coupling the video chip to its collaborators.
//!
//! The chip and the CPU core are two state machines advanced by one driver,
//! never by preemptive threads: every dot the chip runs first, then the
//! elapsed master-clock units are banked toward the CPU context, which gets
//! one clock per three dots. Register accesses therefore always land between
//! dots, and a write is visible to the very next dot - the property
//! mid-scanline raster tricks rely on.

use tracing::debug;

use crate::{
    bus::{Mapper, VideoSink},
    ppu::Ppu,
};

/// Master-clock units consumed by one dot.
pub const MASTER_UNITS_PER_DOT: u64 = 4;
/// Master-clock units consumed by one CPU cycle.
pub const MASTER_UNITS_PER_CPU_CYCLE: u64 = 12;

/// The CPU core's cooperative execution context.
///
/// [`CpuContext::clock`] runs one CPU cycle; the provided port is the only
/// window onto the video chip's registers for the duration of the call.
/// [`CpuContext::set_nmi_line`] reports interrupt-line level changes; the
/// context is responsible for its own edge detection.
pub trait CpuContext {
    fn clock(&mut self, port: &mut RegisterPort<'_>);

    fn set_nmi_line(&mut self, level: bool);
}

/// Borrowed register-file view handed to the CPU context for one clock.
///
/// Created per call so the chip/mapper borrows stay explicit and
/// borrow-checked.
pub struct RegisterPort<'a> {
    ppu: &'a mut Ppu,
    mapper: &'a mut dyn Mapper,
}

impl RegisterPort<'_> {
    /// Reads a register port (address taken mod 8), with side effects.
    pub fn read(&mut self, addr: u16) -> u8 {
        self.ppu.cpu_read(addr, &mut *self.mapper)
    }

    /// Writes a register port (address taken mod 8), with side effects.
    pub fn write(&mut self, addr: u16, value: u8) {
        self.ppu.cpu_write(addr, value, &mut *self.mapper)
    }

    /// Live interrupt-line level, for contexts that poll instead of latching.
    pub fn nmi_line(&self) -> bool {
        self.ppu.nmi_line()
    }

    /// Read-only view of the chip, e.g. for raster-position-timed effects.
    pub fn ppu(&self) -> &Ppu {
        self.ppu
    }
}

/// Result of a single dot step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockResult {
    /// A frame completed on this dot (the sink has already been handed it).
    pub frame_advanced: bool,
    /// The CPU context received a clock on this dot.
    pub cpu_clocked: bool,
}

/// Why [`Console::run`] returned to the external scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A frame completed and was delivered to the video sink.
    Frame,
    /// A synchronization request was honored at a scanline boundary.
    Synchronize,
}

/// Owner of the chip and its collaborators, advancing them in lockstep.
pub struct Console {
    ppu: Ppu,
    mapper: Box<dyn Mapper>,
    cpu: Box<dyn CpuContext>,
    sink: Box<dyn VideoSink>,
    /// Shared master clock, in master units (4 per dot).
    master_clock: u64,
    /// Master units banked toward the next CPU cycle.
    cpu_credit: u64,
    last_frame: u64,
    /// Interrupt-line level last pushed into the CPU context.
    nmi_level: bool,
    sync_requested: bool,
}

impl Console {
    pub fn new(
        mapper: Box<dyn Mapper>,
        cpu: Box<dyn CpuContext>,
        sink: Box<dyn VideoSink>,
    ) -> Self {
        Self {
            ppu: Ppu::new(),
            mapper,
            cpu,
            sink,
            master_clock: 0,
            cpu_credit: 0,
            last_frame: 0,
            nmi_level: false,
            sync_requested: false,
        }
    }

    /// Power-cycles the chip and the driver's own counters.
    pub fn reset(&mut self) {
        self.ppu.reset();
        self.master_clock = 0;
        self.cpu_credit = 0;
        self.last_frame = 0;
        self.sync_requested = false;
        if self.nmi_level {
            self.nmi_level = false;
            self.cpu.set_nmi_line(false);
        }
    }

    /// Advances the system by one dot: chip first, then any CPU cycle the
    /// banked master-clock units pay for.
    pub fn step_dot(&mut self) -> ClockResult {
        self.ppu.clock(&mut *self.mapper);
        self.master_clock += MASTER_UNITS_PER_DOT;
        self.propagate_nmi();

        // Frame delivery is synchronous: the sink sees the finished plane
        // before anything else runs on this or a later dot.
        let frame_advanced = self.ppu.frame_count() != self.last_frame;
        if frame_advanced {
            self.last_frame = self.ppu.frame_count();
            self.sink.frame_ready(self.ppu.frame_buffer());
        }

        self.cpu_credit += MASTER_UNITS_PER_DOT;
        let mut cpu_clocked = false;
        while self.cpu_credit >= MASTER_UNITS_PER_CPU_CYCLE {
            self.cpu_credit -= MASTER_UNITS_PER_CPU_CYCLE;
            let mut port = RegisterPort {
                ppu: &mut self.ppu,
                mapper: &mut *self.mapper,
            };
            self.cpu.clock(&mut port);
            cpu_clocked = true;
            self.propagate_nmi();
        }

        ClockResult {
            frame_advanced,
            cpu_clocked,
        }
    }

    /// Runs until the next frame boundary or honored synchronization
    /// request, whichever comes first.
    ///
    /// Synchronization requests are only honored at the top of a scanline,
    /// so a resumed `run` continues from exactly the next scanline.
    pub fn run(&mut self) -> ExitReason {
        loop {
            if self.ppu.dot() == 0 && self.sync_requested {
                self.sync_requested = false;
                debug!(
                    scanline = self.ppu.scanline(),
                    "synchronization exit"
                );
                return ExitReason::Synchronize;
            }
            if self.step_dot().frame_advanced {
                return ExitReason::Frame;
            }
        }
    }

    /// Runs to the next frame boundary, ignoring synchronization requests.
    pub fn run_frame(&mut self) {
        while !self.step_dot().frame_advanced {}
    }

    /// Asks the driver to suspend at the next scanline boundary.
    pub fn request_sync(&mut self) {
        self.sync_requested = true;
    }

    /// Master clock in units of [`MASTER_UNITS_PER_DOT`] per dot.
    pub fn master_clock(&self) -> u64 {
        self.master_clock
    }

    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    pub fn ppu_mut(&mut self) -> &mut Ppu {
        &mut self.ppu
    }

    fn propagate_nmi(&mut self) {
        let level = self.ppu.nmi_line();
        if level != self.nmi_level {
            self.nmi_level = level;
            self.cpu.set_nmi_line(level);
        }
    }
}

impl core::fmt::Debug for Console {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Console")
            .field("ppu", &self.ppu)
            .field("master_clock", &self.master_clock)
            .field("cpu_credit", &self.cpu_credit)
            .field("nmi_level", &self.nmi_level)
            .field("sync_requested", &self.sync_requested)
            .finish()
    }
}
