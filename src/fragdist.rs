use crate::types::{HashMap, HashMapExt};
use rust_htslib::bam::record::Record;
use std::io::Write;

const FRAG_LEN_BITLEN: u32 = 32;
const FRAG_LENS_MASK: u64 = 0x0000_0000_FFFF_FFFF;
/// Pairs longer than this are excluded from the Kallisto-comparable stats.
const KALLISTO_MAX_FRAG_LENGTH: i64 = 1000;

/// Fragment-length distribution across proper same-contig pairs.
///
/// The first mate of a pair parks its aligned reference span and accumulated
/// intron length packed into one u64; the second mate combines both to turn
/// `|tlen|` into an intron-corrected fragment length.
#[derive(Default)]
pub struct FragDist {
    dist: HashMap<i64, u64>,
    mates: HashMap<Vec<u8>, u64>,
}

impl FragDist {
    pub fn new() -> Self {
        Self {
            dist: HashMap::new(),
            mates: HashMap::new(),
        }
    }

    /// Feed one record. `end_refpos` is the 0-based exclusive alignment end;
    /// `total_intron_len` is the record's summed N-op length.
    pub fn observe(&mut self, rec: &Record, end_refpos: i64, total_intron_len: i64) {
        // csaw getPESizes eligibility: a clean, same-contig primary pair.
        if rec.is_secondary()
            || rec.is_supplementary()
            || !rec.is_paired()
            || rec.is_mate_unmapped()
            || rec.is_first_in_template() == rec.is_last_in_template()
            || rec.tid() != rec.mtid()
        {
            return;
        }
        let refpos = rec.pos();
        let mrefpos = rec.mpos();
        if let Some(both_lens) = self.mates.remove(rec.qname()) {
            let both_intron_lengths = total_intron_len + (both_lens & FRAG_LENS_MASK) as i64;
            let mreflen = ((both_lens >> FRAG_LEN_BITLEN) & FRAG_LENS_MASK) as i64;
            let rev = rec.is_reverse();
            let mrev = rec.is_mate_reverse();
            // Opposite strands, with the forward mate starting before the
            // reverse mate ends.
            let geometry_ok = rev != mrev
                && ((!rev && refpos < mrefpos + mreflen) || (!mrev && mrefpos < end_refpos));
            if geometry_ok {
                let tlen = rec.insert_size().abs();
                let correction = if both_intron_lengths > tlen {
                    0
                } else {
                    both_intron_lengths
                };
                *self.dist.entry(tlen - correction).or_insert(0) += 1;
            }
        } else {
            let packed =
                (((end_refpos - refpos) as u64) << FRAG_LEN_BITLEN) | (total_intron_len as u64);
            self.mates.insert(rec.qname().to_vec(), packed);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dist.is_empty()
    }

    /// `len\tcount` lines in ascending length order, followed by the STAT
    /// trailer (overall and Kallisto-capped count/mean, mode).
    pub fn write(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let mut lengths: Vec<(i64, u64)> = self.dist.iter().map(|(&l, &c)| (l, c)).collect();
        lengths.sort_unstable();

        let mut count = 0u64;
        let mut mean_sum = 0.0f64;
        let mut kcount = 0u64;
        let mut kmean_sum = 0.0f64;
        let mut mode = 0i64;
        let mut mode_count = 0u64;
        for &(len, c) in &lengths {
            writeln!(out, "{}\t{}", len, c)?;
            count += c;
            mean_sum += (len * c as i64) as f64;
            if len < KALLISTO_MAX_FRAG_LENGTH {
                kcount += c;
                kmean_sum += (len * c as i64) as f64;
            }
            if c > mode_count {
                mode_count = c;
                mode = len;
            }
        }
        let mean = if count > 0 { mean_sum / count as f64 } else { 0.0 };
        let kmean = if kcount > 0 { kmean_sum / kcount as f64 } else { 0.0 };
        writeln!(out, "STAT\tCOUNT\t{}", count)?;
        writeln!(out, "STAT\tMEAN_LENGTH\t{:.3}", mean)?;
        writeln!(out, "STAT\tMODE_LENGTH\t{}", mode)?;
        writeln!(out, "STAT\tMODE_LENGTH_COUNT\t{}", mode_count)?;
        writeln!(out, "STAT\tKALLISTO_COUNT\t{}", kcount)?;
        writeln!(out, "STAT\tKALLISTO_MEAN_LENGTH\t{:.3}", kmean)
    }
}
