//! Quantised neural-network evaluation.
//!
//! Split into the static network data ([`net`]), the incrementally
//! updated first-layer state ([`accumulator`]) and the integer kernels
//! ([`simd`]).

mod accumulator;
pub(crate) mod net;
mod simd;

pub use accumulator::NnState;
pub use net::{NetData, NetDataError, NET_DATA_SIZE};
