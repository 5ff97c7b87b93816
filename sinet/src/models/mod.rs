//! # Model Architectures
//!
//! - `rfb`: receptive field blocks applied to each backbone stage.
//! - `pdc`: partial decoder fusing several stages into one probability map.
//! - `sinet`: the full network wiring backbone, RFBs and both decoders.

mod pdc;
mod rfb;
mod sinet;

pub use pdc::*;
pub use rfb::*;
pub use sinet::*;
