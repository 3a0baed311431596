use std::io::Write;

/// Per-base read start/end histograms for the contig being accumulated,
/// flushed at contig boundaries as 1-based `chrom\tpos\tcount` lines.
pub struct ReadEnds {
    starts: Vec<u32>,
    ends: Vec<u32>,
}

impl ReadEnds {
    pub fn new(longest_target: usize) -> Self {
        Self {
            starts: vec![0; longest_target],
            ends: vec![0; longest_target],
        }
    }

    /// Record an alignment spanning [start, end) on the reference.
    pub fn observe(&mut self, start: i64, end: i64) {
        if start >= 0 && (start as usize) < self.starts.len() {
            self.starts[start as usize] += 1;
        }
        let last = end - 1;
        if last >= 0 && (last as usize) < self.ends.len() {
            self.ends[last as usize] += 1;
        }
    }

    pub fn flush_contig(
        &mut self,
        chrom: &str,
        contig_len: usize,
        starts_out: &mut dyn Write,
        ends_out: &mut dyn Write,
    ) -> std::io::Result<()> {
        let n = contig_len.min(self.starts.len());
        for j in 0..n {
            if self.starts[j] > 0 {
                writeln!(starts_out, "{}\t{}\t{}", chrom, j + 1, self.starts[j])?;
            }
            if self.ends[j] > 0 {
                writeln!(ends_out, "{}\t{}\t{}", chrom, j + 1, self.ends[j])?;
            }
        }
        self.starts.fill(0);
        self.ends.fill(0);
        Ok(())
    }
}
