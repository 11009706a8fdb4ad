//! rasterline-core: the raster/timing engine of a cycle-accurate console
//! video chip.
//!
//! The chip consumes register writes from a CPU core, advances a per-dot
//! scanline state machine in lockstep with a shared master clock, and
//! produces a deterministic 256x240 frame plane plus interrupt signaling -
//! reproducing the scroll-register aliasing, sprite evaluation order and
//! mid-scanline register effects the original silicon is known for.
//!
//! Collaborators stay external: pattern/nametable storage lives behind
//! [`bus::Mapper`], finished frames go to a [`bus::VideoSink`], and the CPU
//! core plugs in as a [`console::CpuContext`] driven by [`console::Console`],
//! the deterministic two-context driver loop.
//!
//! ```no_run
//! use rasterline_core::{Console, CpuContext, ExitReason, Mapper, NullSink, RegisterPort};
//! # struct MyMapper;
//! # impl Mapper for MyMapper {
//! #     fn pattern_read(&mut self, _: u16) -> u8 { 0 }
//! #     fn pattern_write(&mut self, _: u16, _: u8) {}
//! #     fn nametable_read(&mut self, _: u16) -> u8 { 0 }
//! #     fn nametable_write(&mut self, _: u16, _: u8) {}
//! # }
//! # struct MyCpu;
//! # impl CpuContext for MyCpu {
//! #     fn clock(&mut self, _: &mut RegisterPort<'_>) {}
//! #     fn set_nmi_line(&mut self, _: bool) {}
//! # }
//! let mut console = Console::new(Box::new(MyMapper), Box::new(MyCpu), Box::new(NullSink));
//! match console.run() {
//!     ExitReason::Frame => { /* frame delivered to the sink */ }
//!     ExitReason::Synchronize => { /* honored request_sync() */ }
//! }
//! ```

pub mod bus;
pub mod console;
pub mod mem_block;
pub mod memory;
pub mod ppu;

pub use bus::{Mapper, NullSink, VideoSink};
pub use console::{ClockResult, Console, CpuContext, ExitReason, RegisterPort};
pub use ppu::{
    Ppu,
    buffer::{FrameBuffer, SCREEN_HEIGHT, SCREEN_WIDTH},
    savestate::PpuState,
};
