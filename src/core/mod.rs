//! # Core Protocol Components
//!
//! Wire-level frames, the stream codec, and the application envelope.
//!
//! ## Wire Format
//! ```text
//! [Kind(1)] [Length(4, BE)] [Body(N)]
//! ```
//!
//! ## Security
//! - Maximum frame size is validated before allocation
//! - The kind tag determines body interpretation; unknown tags are rejected

pub mod codec;
pub mod envelope;
pub mod frame;
