use rust_htslib::bam::record::{Cigar, CigarStringView};
use std::fmt::Write as _;

/// True when the op consumes query bases (M/I/S/=/X).
pub fn consumes_query(op: &Cigar) -> bool {
    matches!(
        op,
        Cigar::Match(_) | Cigar::Ins(_) | Cigar::SoftClip(_) | Cigar::Equal(_) | Cigar::Diff(_)
    )
}

/// True when the op consumes reference bases (M/D/N/=/X).
pub fn consumes_reference(op: &Cigar) -> bool {
    matches!(
        op,
        Cigar::Match(_) | Cigar::Del(_) | Cigar::RefSkip(_) | Cigar::Equal(_) | Cigar::Diff(_)
    )
}

/// Everything the per-record CIGAR walk produces, gathered in a single pass.
#[derive(Debug, Default)]
pub struct CigarScan {
    /// Bases consuming both query and reference (M/=/X).
    pub mapped_len: u64,
    /// Bases consuming the reference (alignment end = pos + ref_len).
    pub ref_len: i64,
    /// Record-relative [start, end) reference offsets of each N op.
    pub introns: Vec<(u32, u32)>,
    /// Textual CIGAR, rebuilt alongside the walk (empty unless requested).
    pub text: String,
}

/// Walk the CIGAR once, driving every accumulator the analyzers need.
/// `with_junctions` additionally collects intron offsets and the textual
/// CIGAR (its only downstream consumer is the junction output).
pub fn scan(cigar: &CigarStringView, with_junctions: bool) -> CigarScan {
    let mut out = CigarScan::default();
    let mut rel_ref = 0u32;
    for op in cigar.iter() {
        let len = op.len();
        if with_junctions {
            let _ = write!(out.text, "{}{}", len, op.char());
        }
        let ref_op = consumes_reference(op);
        if ref_op {
            out.ref_len += len as i64;
        }
        if ref_op && consumes_query(op) {
            out.mapped_len += len as u64;
        }
        if with_junctions {
            if let Cigar::RefSkip(_) = op {
                out.introns.push((rel_ref, rel_ref + len));
            }
            if ref_op {
                rel_ref += len;
            }
        }
    }
    out
}

/// Absolute [start, end) reference spans of the ops consuming both query and
/// reference (M/=/X), for an alignment starting at `start`. These are the
/// segments that actually deposit coverage; the mate-overlap correction
/// subtracts intersections with them.
pub fn query_ref_spans<'a, I>(ops: I, start: i64) -> Vec<(i64, i64)>
where
    I: IntoIterator<Item = &'a Cigar>,
{
    let mut spans = Vec::new();
    let mut pos = start;
    for op in ops {
        if consumes_reference(op) {
            let len = op.len() as i64;
            if consumes_query(op) {
                spans.push((pos, pos + len));
            }
            pos += len;
        }
    }
    spans
}
