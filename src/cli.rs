use crate::annotation::ReduceOp;
use crate::errors::EngineError;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "depthwalk",
    about = "BAM and BigWig coverage, AUC, and alignment summaries",
    version
)]
pub struct Args {
    /// Input alignments (.bam/.sam), coverage (.bw/.bigwig), or a .txt file
    /// listing BigWig paths one per line
    pub input: PathBuf,

    /// BAM decompression threads, or parallel workers for a BigWig list
    #[arg(long, default_value_t = 1)]
    pub threads: usize,

    /// Output annotation coverage in BED insertion order instead of inline
    /// as each contig finishes
    #[arg(long)]
    pub keep_order: bool,

    /// BED of regions to sum coverage over, plus the output prefix for
    /// <prefix>.all.tsv (and <prefix>.unique.tsv with --min-unique-qual)
    #[arg(long, num_args = 1..=2, value_names = ["BED", "PREFIX"])]
    pub annotation: Option<Vec<String>>,

    /// Statistic to run over annotated regions of a BigWig
    #[arg(long, value_enum, default_value = "sum")]
    pub op: ReduceOp,

    /// BigWig read buffer size in bytes
    #[arg(long, default_value_t = 1 << 30)]
    pub bwbuffer: u64,

    /// Print per-base coverage as BED to stdout
    #[arg(long)]
    pub coverage: bool,

    /// Write AUC totals to <PREFIX>.auc.tsv
    #[arg(long, value_name = "PREFIX")]
    pub auc: Option<String>,

    /// Write coverage as <PREFIX>.all.bw (and <PREFIX>.unique.bw with
    /// --min-unique-qual)
    #[arg(long, value_name = "PREFIX")]
    pub bigwig: Option<String>,

    /// Maintain a second coverage track from alignments with at least this
    /// mapping quality
    #[arg(long, value_name = "QUAL")]
    pub min_unique_qual: Option<u8>,

    /// Let overlapping ends of a read pair count twice toward coverage
    #[arg(long)]
    pub double_count: bool,

    /// Report the total number of bases in passing alignments
    #[arg(long)]
    pub num_bases: bool,

    /// Write alternate-base records to <PREFIX>.alts.tsv
    #[arg(long, value_name = "PREFIX")]
    pub alts: Option<String>,

    /// Include soft-clip records in the alts output; totals go to
    /// <PREFIX>.softclip.tsv
    #[arg(long, value_name = "PREFIX")]
    pub include_softclip: Option<String>,

    /// Only emit soft clips that are mostly A or T
    #[arg(long)]
    pub only_polya: bool,

    /// Emit mismatch records even when the read base is N
    #[arg(long)]
    pub include_n: bool,

    /// Append base qualities to mismatch records
    #[arg(long)]
    pub print_qual: bool,

    /// Print POS fields as deltas from the previous record
    #[arg(long)]
    pub delta: bool,

    /// Fail unless MD:Z is present everywhere it is expected
    #[arg(long)]
    pub require_mdz: bool,

    /// Print sequence names and lengths from the header
    #[arg(long)]
    pub head: bool,

    /// Write junction co-occurrence lines to <PREFIX>.jxs.tsv
    #[arg(long, value_name = "PREFIX")]
    pub junctions: Option<String>,

    /// Write read start/end histograms to <PREFIX>.starts.tsv and
    /// <PREFIX>.ends.tsv
    #[arg(long, value_name = "PREFIX")]
    pub read_ends: Option<String>,

    /// Write the fragment length distribution to <PREFIX>.frags.tsv
    #[arg(long, value_name = "PREFIX")]
    pub frag_dist: Option<String>,

    /// Echo a SAM record for each passing alignment
    #[arg(long)]
    pub echo_sam: bool,

    /// Report the end coordinate of each passing alignment
    #[arg(long)]
    pub ends: bool,

    /// Size buffers for long reads (PacBio / Nanopore)
    #[arg(long)]
    pub long_reads: bool,

    /// Lower the poly-A filter minimums (debugging/testing)
    #[arg(long)]
    pub test_polya: bool,

    /// Suppress the progress spinner and set logging level to WARN
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl Args {
    /// The two `--annotation` values, when given. A BED path without an
    /// output prefix is fatal before any processing starts.
    pub fn annotation_parts(&self) -> Result<Option<(PathBuf, &str)>, EngineError> {
        let Some(parts) = self.annotation.as_ref() else {
            return Ok(None);
        };
        match (parts.first(), parts.get(1)) {
            (Some(bed), Some(prefix)) => Ok(Some((PathBuf::from(bed), prefix.as_str()))),
            _ => Err(EngineError::MissingRegionArg),
        }
    }
}
