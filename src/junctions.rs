use crate::cigar::CigarScan;
use crate::types::{HashMap, HashMapExt};
use rust_htslib::bam::record::Record;
use std::fmt::Write as _;
use std::io::Write;

/// Pairs intron co-occurrence lines across mates.
///
/// Unpaired records emit on their own when they carry at least two introns.
/// A paired first mate (`tlen > 0`) with at least one intron is buffered
/// under its read name until the second mate (`tlen < 0`) arrives; the joint
/// line is emitted when the pair carries at least two introns between them.
/// Buffered first mates whose partner never shows up on the same contig are
/// dropped at contig boundaries.
#[derive(Default)]
pub struct JunctionAssembler {
    pending: HashMap<Vec<u8>, (String, usize)>,
}

impl JunctionAssembler {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn process(
        &mut self,
        rec: &Record,
        scan: &CigarScan,
        tid_name: &str,
        out: &mut dyn Write,
    ) -> std::io::Result<()> {
        let refpos = rec.pos();
        let tlen = rec.insert_size();
        // Cross-contig mates still need a first/second ordering; borrow the
        // sign convention from the contig ids without touching the emitted tlen.
        let tlen_cmp = if rec.tid() != rec.mtid() {
            if rec.mtid() > rec.tid() { 1000 } else { -1000 }
        } else {
            tlen
        };
        // Thresholds below count coordinate items (two per intron).
        let sz = scan.introns.len() * 2;
        let paired = rec.is_paired();

        let line = if sz >= 4 || (paired && sz >= 2) {
            let mut s = String::with_capacity(64 + scan.text.len());
            let _ = write!(
                s,
                "{}\t{}\t{}\t{}\t{}\t",
                tid_name,
                refpos + 1,
                rec.is_reverse() as u8,
                tlen,
                scan.text
            );
            for (i, (istart, iend)) in scan.introns.iter().enumerate() {
                if i > 0 {
                    s.push(',');
                }
                let _ = write!(
                    s,
                    "{}-{}",
                    refpos + *istart as i64 + 1,
                    refpos + *iend as i64
                );
            }
            Some(s)
        } else {
            None
        };

        if paired {
            if tlen_cmp > 0 && sz >= 2 {
                if let Some(line) = line {
                    self.pending.insert(rec.qname().to_vec(), (line, sz));
                }
            } else if tlen_cmp < 0 {
                let mut prev_printed = false;
                let mut mate_sz = 0usize;
                if let Some((prev_line, prev_sz)) = self.pending.remove(rec.qname()) {
                    mate_sz = prev_sz;
                    if prev_sz >= 4 || (prev_sz >= 2 && sz >= 2) {
                        write!(out, "{}", prev_line)?;
                        prev_printed = true;
                    }
                }
                if sz >= 4 || (mate_sz >= 2 && sz >= 2) {
                    if prev_printed {
                        write!(out, "\t")?;
                    }
                    if let Some(line) = line {
                        write!(out, "{}", line)?;
                    }
                    prev_printed = true;
                }
                if prev_printed {
                    writeln!(out)?;
                }
            }
        } else if sz >= 4 {
            if let Some(line) = line {
                writeln!(out, "{}", line)?;
            }
        }
        Ok(())
    }
}
