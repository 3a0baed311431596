use crate::annotation::{write_region_line, Region};
use crate::cigar::{consumes_query, consumes_reference, query_ref_spans};
use crate::types::{HashMap, HashMapExt};
use bigtools::Value;
use rust_htslib::bam::record::{Cigar, CigarString, Record};
use std::io::Write;

/// Knobs for the per-record coverage accrual.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoverageOptions {
    /// Skip the mate-overlap correction and let overlapping pair ends count twice.
    pub double_count: bool,
    /// Minimum mapping quality for the unique track; `None` disables the track.
    pub min_unique_qual: Option<u8>,
}

/// Dense per-base counters for the contig currently being accumulated.
/// Both arrays are sized to the longest target and reset between contigs.
pub struct CoverageBuffer {
    all: Vec<u32>,
    unique: Option<Vec<u32>>,
}

impl CoverageBuffer {
    pub fn new(longest_target: usize, with_unique: bool) -> Self {
        Self {
            all: vec![0; longest_target],
            unique: with_unique.then(|| vec![0; longest_target]),
        }
    }

    pub fn all(&self) -> &[u32] {
        &self.all
    }

    pub fn unique(&self) -> Option<&[u32]> {
        self.unique.as_deref()
    }

    pub fn reset(&mut self) {
        self.all.fill(0);
        if let Some(unique) = self.unique.as_mut() {
            unique.fill(0);
        }
    }

    fn incr(&mut self, start: i64, end: i64, also_unique: bool) {
        let (a, b) = clamp_span(start, end, self.all.len());
        for v in &mut self.all[a..b] {
            *v += 1;
        }
        if also_unique {
            if let Some(unique) = self.unique.as_mut() {
                for v in &mut unique[a..b] {
                    *v += 1;
                }
            }
        }
    }

    fn decr(&mut self, start: i64, end: i64, also_unique: bool) {
        let (a, b) = clamp_span(start, end, self.all.len());
        for v in &mut self.all[a..b] {
            *v -= 1;
        }
        if also_unique {
            if let Some(unique) = self.unique.as_mut() {
                for v in &mut unique[a..b] {
                    *v -= 1;
                }
            }
        }
    }
}

fn clamp_span(start: i64, end: i64, len: usize) -> (usize, usize) {
    let a = start.clamp(0, len as i64) as usize;
    let b = end.clamp(0, len as i64) as usize;
    (a, b)
}

/// First-mate span summary held until the second mate of an overlapping
/// proper pair arrives. At most one entry per read name; the whole store is
/// cleared at contig boundaries.
struct MateEntry {
    cigar: CigarString,
    start: i64,
    unique_pass: bool,
}

#[derive(Default)]
pub struct MateOverlapStore {
    entries: HashMap<Vec<u8>, MateEntry>,
}

impl MateOverlapStore {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accrue one record into the coverage arrays, applying the mate-overlap
/// correction, and return the 0-based exclusive reference end position.
///
/// With `cov == None` the walk still computes the end position and the total
/// intron (`N`) length, which the fragment-length and read-end paths need.
pub fn accrue_record(
    rec: &Record,
    mut cov: Option<&mut CoverageBuffer>,
    opts: &CoverageOptions,
    mates: Option<&mut MateOverlapStore>,
    total_intron_len: &mut i64,
) -> i64 {
    let refpos = rec.pos();
    let mrefpos = rec.mpos();
    let unique_enabled = opts.min_unique_qual.is_some();
    let passing_qual = opts
        .min_unique_qual
        .map(|q| rec.mapq() >= q)
        .unwrap_or(false);
    let cur_unique = unique_enabled && passing_qual;

    // Overlapping-mate bookkeeping. The first mate of a same-contig proper
    // pair whose span reaches its mate's start deposits its M/=/X spans; the
    // second mate subtracts the intersection while accruing below.
    let mut mspans: Vec<(i64, i64)> = Vec::new();
    let mut mendpos = 0i64;
    let mut mate_unique_pass = false;
    if cov.is_some() && !opts.double_count && rec.is_proper_pair() {
        if let Some(mates) = mates {
            let name = rec.qname();
            let end_pos = rec.cigar().end_pos();
            if rec.tid() == rec.mtid()
                && end_pos > mrefpos
                && refpos <= mrefpos
                && !mates.entries.contains_key(name)
            {
                mates.entries.insert(
                    name.to_vec(),
                    MateEntry {
                        cigar: CigarString(rec.cigar().iter().copied().collect()),
                        start: refpos,
                        unique_pass: cur_unique,
                    },
                );
            } else if let Some(entry) = mates.entries.remove(name) {
                mspans = query_ref_spans(entry.cigar.iter(), entry.start);
                mendpos = mspans.last().map(|s| s.1).unwrap_or(entry.start);
                mate_unique_pass = entry.unique_pass;
            }
        }
    }

    let mut pos = refpos;
    let mut ms_idx = 0usize;
    for op in rec.cigar().iter() {
        if !consumes_reference(op) {
            continue;
        }
        let len = op.len() as i64;
        if let Cigar::RefSkip(_) = op {
            *total_intron_len += len;
        }
        if consumes_query(op) {
            if let Some(cov) = cov.as_mut() {
                cov.incr(pos, pos + len, cur_unique);
                if !mspans.is_empty() && pos < mendpos {
                    let seg_end = pos + len;
                    while ms_idx < mspans.len() && pos >= mspans[ms_idx].1 {
                        ms_idx += 1;
                    }
                    let mut j = ms_idx;
                    while j < mspans.len() && mspans[j].0 < seg_end {
                        let lo = pos.max(mspans[j].0);
                        let hi = seg_end.min(mspans[j].1);
                        if lo < hi {
                            cov.decr(lo, hi, cur_unique && mate_unique_pass);
                        }
                        if mspans[j].1 <= seg_end {
                            j += 1;
                        } else {
                            break;
                        }
                    }
                    ms_idx = j;
                }
            }
        }
        pos += len;
    }
    pos
}

/// Where run-length coverage intervals go when a contig finalizes.
pub enum CoverageSink<'a> {
    /// Accumulate AUC only.
    Quiet,
    /// `chrom\tstart\tend\tvalue` BED lines.
    Bed(&'a mut dyn Write),
    /// Intervals destined for a BigWig writer at end of run.
    BigWig(&'a mut Vec<(String, Value)>),
}

/// Walk a finished contig's counters, merging equal-valued runs, emitting
/// each run to the sink, and returning the contig's AUC contribution.
/// Zero-valued runs are emitted unless `skip_zeros` (they never add AUC).
pub fn flush_contig(
    arr: &[u32],
    contig_len: usize,
    chrom: &str,
    skip_zeros: bool,
    sink: &mut CoverageSink<'_>,
) -> std::io::Result<u64> {
    let arr = &arr[..contig_len.min(arr.len())];
    let mut auc = 0u64;
    let mut run_start = 0usize;
    let mut run_value = match arr.first() {
        Some(v) => *v,
        None => return Ok(0),
    };
    for (i, &v) in arr.iter().enumerate().skip(1) {
        if v != run_value {
            auc += emit_run(chrom, run_start, i, run_value, skip_zeros, sink)?;
            run_start = i;
            run_value = v;
        }
    }
    auc += emit_run(chrom, run_start, arr.len(), run_value, skip_zeros, sink)?;
    Ok(auc)
}

fn emit_run(
    chrom: &str,
    start: usize,
    end: usize,
    value: u32,
    skip_zeros: bool,
    sink: &mut CoverageSink<'_>,
) -> std::io::Result<u64> {
    if value == 0 && skip_zeros {
        return Ok(0);
    }
    match sink {
        CoverageSink::Quiet => {}
        CoverageSink::Bed(out) => {
            writeln!(out, "{}\t{}\t{}\t{}", chrom, start, end, value)?;
        }
        CoverageSink::BigWig(runs) => {
            runs.push((
                chrom.to_string(),
                Value {
                    start: start as u32,
                    end: end as u32,
                    value: value as f32,
                },
            ));
        }
    }
    Ok((end - start) as u64 * value as u64)
}

/// Reduce a finished contig's counters over that contig's annotated regions:
/// each region's sum lands inline on `out`, or in its slot when BED order
/// must be preserved. The running annotated AUC picks up every sum.
pub fn sum_regions(
    arr: &[u32],
    regions: &mut [Region],
    chrom: &str,
    out: &mut dyn Write,
    annotated_auc: &mut u64,
    keep_order: bool,
    into_unique_slot: bool,
) -> std::io::Result<()> {
    for region in regions.iter_mut() {
        let (a, b) = clamp_span(region.start as i64, region.end as i64, arr.len());
        let sum: u64 = arr[a..b].iter().map(|&v| v as u64).sum();
        *annotated_auc += sum;
        if keep_order {
            if into_unique_slot {
                region.unique_slot = sum as f64;
            } else {
                region.slot = sum as f64;
            }
        } else {
            write_region_line(out, chrom, region.start, region.end, sum as f64, false)?;
        }
    }
    Ok(())
}
