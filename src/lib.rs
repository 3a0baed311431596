//! depthwalk: streaming coverage and alignment analytics over BAM/BigWig.
//!
//! The BAM path walks alignment records in file order behind a bounded
//! decoder queue, maintaining dense per-contig coverage (with mate-overlap
//! correction and an optional unique-quality track) while emitting derived
//! outputs in the same pass: AUC, per-region sums, alt-base records,
//! junction co-occurrence, read-end histograms, and the fragment-length
//! distribution. The BigWig path reduces sorted coverage intervals against
//! annotated regions, optionally across many files in parallel.

// Internal modules — not part of the public API.
pub(crate) mod alts;
pub(crate) mod annotation;
pub(crate) mod bigwig;
pub(crate) mod cigar;
pub(crate) mod cli;
pub(crate) mod coverage;
pub(crate) mod errors;
pub(crate) mod fragdist;
pub(crate) mod junctions;
pub(crate) mod pipeline;
pub(crate) mod read_ends;
pub(crate) mod types;

// Flat re-exports for the most commonly used public types.
pub use annotation::ReduceOp;
pub use cli::Args;
pub use errors::EngineError;
pub use pipeline::run;

// Re-exports needed by integration tests in tests/.
#[doc(hidden)]
pub use alts::{parse_mdz, polya_check, AltConfig, AltEmitter, MdzOp};
#[doc(hidden)]
pub use annotation::{write_region_line, Region, RegionIndex};
#[doc(hidden)]
pub use bigwig::reduce_regions;
#[doc(hidden)]
pub use cigar::{scan as scan_cigar, CigarScan};
#[doc(hidden)]
pub use coverage::{
    accrue_record, flush_contig, sum_regions, CoverageBuffer, CoverageOptions, CoverageSink,
    MateOverlapStore,
};
#[doc(hidden)]
pub use fragdist::FragDist;
#[doc(hidden)]
pub use junctions::JunctionAssembler;
#[doc(hidden)]
pub use pipeline::{detect_format, InputFormat};
