//! Framed single-pass file reading
//!
//! [`FramedLineSource`] classifies a line stream into at most one header
//! line, zero or more data lines, and at most one footer line, using a
//! one-slot lookahead buffer and a single forward pass.

mod footer;
mod framed;
mod model;

pub use footer::FooterDetector;
pub use framed::{FrameSummary, FramedLineSource};
pub use model::{FooterInfo, FooterSpec, HeaderInfo, HeaderSpec, Line};
