//! Silicon model for the Kria detection board.
//!
//! Three processing elements share one physical memory arena and talk through
//! memory-mapped 32-bit registers:
//!
//! ```text
//! ┌──────────────┐  regs   ┌──────────────┐
//! │  Host (A53)  │────────▶│  DPU         │  fixed-function accelerator
//! │              │         └──────┬───────┘
//! │              │  regs + IRQ    │ tensor
//! │              │────────▶┌──────▼───────┐
//! └──────┬───────┘         │  RISC-V      │  postprocessing co-processor
//!        │                 └──────┬───────┘
//!        ▼                        ▼
//! ┌─────────────────────────────────────────┐
//! │  Shared arena (frame │ tensor │ result) │
//! └─────────────────────────────────────────┘
//! ```
//!
//! This crate has **no dependencies** and **no hardware access**.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | Host-view and co-processor-view register maps, status bits |
//! | [`command`] | Opcodes, command-word packing, frame geometry param |
//! | [`arena`] | Arena base/offset table and sub-region sizing |
//! | [`result`] | Result-buffer word format |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod arena;
pub mod command;
pub mod regs;
pub mod result;
