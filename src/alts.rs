use crate::errors::EngineError;
use rust_htslib::bam::record::{Cigar, Record};
use std::io::Write;

const POLYA_MIN_COUNT: usize = 3;
const POLYA_MIN_RATIO: f64 = 0.8;

/// One MD:Z operation: a match run, a mismatch with the reference bases, or
/// a deletion (`^`) with the deleted reference bases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MdzOp {
    Match(usize),
    Mismatch(Vec<u8>),
    Deletion(Vec<u8>),
}

/// Parse an MD:Z auxiliary string into its operation sequence.
pub fn parse_mdz(mdz: &str) -> Result<Vec<MdzOp>, EngineError> {
    let bytes = mdz.as_bytes();
    let mut ops = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_digit() {
            let mut run = 0usize;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                run = run * 10 + (bytes[i] - b'0') as usize;
                i += 1;
            }
            if run > 0 {
                ops.push(MdzOp::Match(run));
            }
        } else if b.is_ascii_alphabetic() {
            let st = i;
            while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                i += 1;
            }
            ops.push(MdzOp::Mismatch(bytes[st..i].to_vec()));
        } else if b == b'^' {
            i += 1;
            let st = i;
            while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                i += 1;
            }
            if i == st {
                return Err(EngineError::MalformedAuxiliary(format!(
                    "MD:Z deletion with no bases in \"{mdz}\""
                )));
            }
            ops.push(MdzOp::Deletion(bytes[st..i].to_vec()));
        } else {
            return Err(EngineError::MalformedAuxiliary(format!(
                "unknown MD:Z operation '{}' in \"{mdz}\"",
                b as char
            )));
        }
    }
    Ok(ops)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AltConfig {
    pub include_softclip: bool,
    pub only_polya: bool,
    pub include_n: bool,
    pub print_qual: bool,
    /// `--test-polya`: lowered thresholds for exercising the filter.
    pub test_polya: bool,
}

impl AltConfig {
    fn polya_min_count(&self) -> usize {
        if self.test_polya { 1 } else { POLYA_MIN_COUNT }
    }

    fn polya_min_ratio(&self) -> f64 {
        if self.test_polya { 0.01 } else { POLYA_MIN_RATIO }
    }
}

/// Emits mismatch / insertion / deletion / soft-clip records and keeps the
/// running soft-clipped base total.
#[derive(Debug, Default)]
pub struct AltEmitter {
    pub cfg: AltConfig,
    pub total_softclip_bases: u64,
}

impl AltEmitter {
    pub fn new(cfg: AltConfig) -> Self {
        Self {
            cfg,
            total_softclip_bases: 0,
        }
    }

    /// CIGAR-only mode, for records without MD:Z: deletions, insertions and
    /// soft clips are visible from the CIGAR alone.
    pub fn emit_from_cigar(&mut self, rec: &Record, out: &mut dyn Write) -> std::io::Result<()> {
        if rec.cigar().len() == 1 {
            return Ok(());
        }
        let tid = rec.tid();
        let seq = rec.seq().as_bytes();
        let mut ref_pos = rec.pos();
        let mut seq_pos = 0usize;
        for op in rec.cigar().iter() {
            let run = op.len() as usize;
            match op {
                Cigar::Del(_) => {
                    writeln!(out, "{},{},D,{}", tid, ref_pos, run)?;
                    ref_pos += run as i64;
                }
                Cigar::SoftClip(_) => {
                    self.emit_softclip(tid, ref_pos, &seq, seq_pos, run, out)?;
                    seq_pos += run;
                }
                Cigar::Ins(_) => {
                    writeln!(
                        out,
                        "{},{},I,{}",
                        tid,
                        ref_pos,
                        String::from_utf8_lossy(&seq[seq_pos..seq_pos + run])
                    )?;
                    seq_pos += run;
                }
                Cigar::RefSkip(_) => {
                    ref_pos += run as i64;
                }
                Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_) => {
                    seq_pos += run;
                    ref_pos += run as i64;
                }
                Cigar::HardClip(_) | Cigar::Pad(_) => {}
            }
        }
        Ok(())
    }

    /// Joint CIGAR/MD:Z walk: MD:Z pins the mismatch positions and deleted
    /// bases inside the CIGAR's ref-consuming ops; inserts and clips come
    /// from the CIGAR as in [`emit_from_cigar`](Self::emit_from_cigar).
    pub fn emit_from_cigar_mdz(
        &mut self,
        rec: &Record,
        mdz: &[MdzOp],
        out: &mut dyn Write,
    ) -> Result<(), EngineError> {
        let tid = rec.tid();
        let seq = rec.seq().as_bytes();
        let qual = rec.qual();
        let mut ref_pos = rec.pos();
        let mut seq_pos = 0usize;
        let mut mdzi = 0usize;
        // Bases of the current MD:Z op already consumed by earlier CIGAR ops.
        let mut mdz_used = 0usize;

        for op in rec.cigar().iter() {
            let run = op.len() as usize;
            let needs_mdz = matches!(
                op,
                Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_) | Cigar::Del(_)
            );
            if needs_mdz && mdzi >= mdz.len() {
                return Err(EngineError::MalformedAuxiliary(
                    "ref-consuming CIGAR op after MD:Z was exhausted".to_string(),
                ));
            }
            match op {
                Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_) => {
                    let mut run_left = run;
                    while run_left > 0 {
                        let Some(cur) = mdz.get(mdzi) else {
                            return Err(EngineError::MalformedAuxiliary(
                                "CIGAR match run outlives MD:Z".to_string(),
                            ));
                        };
                        let (total, is_mismatch) = match cur {
                            MdzOp::Match(n) => (*n, false),
                            MdzOp::Mismatch(bases) => (bases.len(), true),
                            MdzOp::Deletion(_) => {
                                return Err(EngineError::MalformedAuxiliary(
                                    "MD:Z deletion inside CIGAR match run".to_string(),
                                ));
                            }
                        };
                        let take = run_left.min(total - mdz_used);
                        if is_mismatch {
                            let read_bases = &seq[seq_pos..seq_pos + take];
                            let n_only = take == 1 && read_bases[0] == b'N';
                            if !n_only || self.cfg.include_n {
                                self.write_mismatch(tid, ref_pos, read_bases, qual, seq_pos, out)?;
                            }
                        }
                        seq_pos += take;
                        ref_pos += take as i64;
                        run_left -= take;
                        mdz_used += take;
                        if mdz_used == total {
                            mdzi += 1;
                            mdz_used = 0;
                        }
                    }
                }
                Cigar::Ins(_) => {
                    writeln!(
                        out,
                        "{},{},I,{}",
                        tid,
                        ref_pos,
                        String::from_utf8_lossy(&seq[seq_pos..seq_pos + run])
                    )?;
                    seq_pos += run;
                }
                Cigar::SoftClip(_) => {
                    self.emit_softclip(tid, ref_pos, &seq, seq_pos, run, out)?;
                    seq_pos += run;
                }
                Cigar::Del(_) => {
                    match mdz.get(mdzi) {
                        Some(MdzOp::Deletion(bases)) if bases.len() == run && mdz_used == 0 => {}
                        _ => {
                            return Err(EngineError::MalformedAuxiliary(format!(
                                "CIGAR deletion of {run} bases does not match MD:Z"
                            )));
                        }
                    }
                    mdzi += 1;
                    writeln!(out, "{},{},D,{}", tid, ref_pos, run)?;
                    ref_pos += run as i64;
                }
                Cigar::RefSkip(_) => {
                    ref_pos += run as i64;
                }
                Cigar::HardClip(_) | Cigar::Pad(_) => {}
            }
        }
        if mdzi != mdz.len() || mdz_used != 0 {
            return Err(EngineError::MalformedAuxiliary(
                "MD:Z not fully consumed by CIGAR".to_string(),
            ));
        }
        Ok(())
    }

    fn write_mismatch(
        &self,
        tid: i32,
        ref_pos: i64,
        read_bases: &[u8],
        qual: &[u8],
        seq_pos: usize,
        out: &mut dyn Write,
    ) -> std::io::Result<()> {
        write!(
            out,
            "{},{},X,{}",
            tid,
            ref_pos,
            String::from_utf8_lossy(read_bases)
        )?;
        if self.cfg.print_qual {
            let quals: String = qual[seq_pos..seq_pos + read_bases.len()]
                .iter()
                .map(|&q| (q.saturating_add(33)) as char)
                .collect();
            write!(out, ",{}", quals)?;
        }
        writeln!(out)
    }

    fn emit_softclip(
        &mut self,
        tid: i32,
        ref_pos: i64,
        seq: &[u8],
        seq_pos: usize,
        run: usize,
        out: &mut dyn Write,
    ) -> std::io::Result<()> {
        if !self.cfg.include_softclip {
            return Ok(());
        }
        let direction = if seq_pos == 0 { '-' } else { '+' };
        self.total_softclip_bases += run as u64;
        let clipped = &seq[seq_pos..seq_pos + run];
        if self.cfg.only_polya {
            if run >= self.cfg.polya_min_count() {
                if let Some((base, count)) = polya_check(clipped, self.cfg.polya_min_ratio()) {
                    writeln!(
                        out,
                        "{},{},S,{},{},{},{}",
                        tid, ref_pos, run, direction, base, count
                    )?;
                }
            }
        } else {
            writeln!(
                out,
                "{},{},S,{}",
                tid,
                ref_pos,
                String::from_utf8_lossy(clipped)
            )?;
        }
        Ok(())
    }
}

/// Poly-A test over clipped bases: the dominant of A/T must reach the ratio
/// threshold. Returns the dominant base and its count.
pub fn polya_check(clipped: &[u8], min_ratio: f64) -> Option<(char, usize)> {
    let run = clipped.len();
    if run == 0 {
        return None;
    }
    let a = clipped.iter().filter(|&&b| b == b'A').count();
    let t = clipped.iter().filter(|&&b| b == b'T').count();
    if a as f64 / run as f64 >= min_ratio {
        Some(('A', a))
    } else if t as f64 / run as f64 >= min_ratio {
        Some(('T', t))
    } else {
        None
    }
}
