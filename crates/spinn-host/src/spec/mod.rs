//! Data specifications
//!
//! A vertex describes the contents of its memory regions as a small program
//! (see [`spinn_chip::dse`]). [`SpecificationWriter`] builds that program and
//! [`SpecificationExecutor`] runs it on the host, producing one byte image per
//! reserved region plus an optional text listing for reports.

pub mod executor;
pub mod writer;

pub use executor::{ExecutedSpecification, RegionImage, SpecificationExecutor};
pub use writer::{DataSpecification, DataWidth, SpecificationWriter};
