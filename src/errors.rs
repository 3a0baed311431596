use std::path::PathBuf;
use thiserror::Error;

/// Fatal and per-file error kinds raised by the engine. Driver code converts
/// these into `anyhow::Error` at the boundary; only `EmptyContigInBigWig` is
/// non-fatal (logged and skipped).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unrecognized input format for {0} (expected .bam/.sam, .bw/.bigwig, or a .txt list)")]
    InputFormatUnknown(PathBuf),

    #[error("could not open {path}: {msg}")]
    CodecOpenFailed { path: PathBuf, msg: String },

    #[error("could not read header for {path}: {msg}")]
    HeaderReadFailed { path: PathBuf, msg: String },

    #[error("malformed auxiliary data: {0}")]
    MalformedAuxiliary(String),

    #[error("--annotation requires both a BED path and an output prefix")]
    MissingRegionArg,

    #[error("no intervals for contig {contig} in {path}")]
    EmptyContigInBigWig { contig: String, path: PathBuf },
}
