use crate::types::{HashMap, HashMapExt};
use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Reducer applied to coverage values over each annotated region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReduceOp {
    #[default]
    Sum,
    Mean,
    Min,
    Max,
}

impl ReduceOp {
    /// `mean` produces fractional values; everything else stays integral
    /// for integer-valued coverage.
    pub fn is_float(self) -> bool {
        matches!(self, ReduceOp::Mean)
    }
}

/// One BED region with scratch slots for deferred (BED-ordered) output.
#[derive(Debug, Clone)]
pub struct Region {
    pub start: u32,
    pub end: u32,
    pub slot: f64,
    pub unique_slot: f64,
}

/// Parsed annotation: regions grouped by contig, preserving both the order
/// regions appear within a contig and the order contigs first appear.
#[derive(Debug, Default)]
pub struct RegionIndex {
    pub by_contig: HashMap<String, Vec<Region>>,
    pub contig_order: Vec<String>,
}

impl RegionIndex {
    /// Load a 3+ column tab-delimited BED (chrom, start, end; extra columns
    /// ignored). Coordinates are 0-based half-open.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open annotation BED {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut index = RegionIndex::default();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let mut cols = line.split('\t');
            let chrom = cols
                .next()
                .ok_or_else(|| anyhow!("empty BED line at {}:{}", path.display(), lineno + 1))?;
            let start: u32 = cols
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| anyhow!("bad BED start at {}:{}", path.display(), lineno + 1))?;
            let end: u32 = cols
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| anyhow!("bad BED end at {}:{}", path.display(), lineno + 1))?;
            index.push(chrom, start, end);
        }
        tracing::info!(contigs = index.by_contig.len(), "annotation region map built");
        Ok(index)
    }

    pub fn push(&mut self, chrom: &str, start: u32, end: u32) {
        let regions = match self.by_contig.get_mut(chrom) {
            Some(r) => r,
            None => {
                self.contig_order.push(chrom.to_string());
                self.by_contig.entry(chrom.to_string()).or_default()
            }
        };
        regions.push(Region {
            start,
            end,
            slot: 0.0,
            unique_slot: 0.0,
        });
    }

    pub fn contains(&self, contig: &str) -> bool {
        self.by_contig.contains_key(contig)
    }

    /// Emit every region in BED insertion order from the stored slots.
    /// `unique_out` receives the unique-track slots when present.
    pub fn write_ordered(
        &self,
        out: &mut dyn Write,
        mut unique_out: Option<&mut (dyn Write + 'static)>,
        float_mode: bool,
    ) -> std::io::Result<()> {
        for contig in &self.contig_order {
            let Some(regions) = self.by_contig.get(contig) else {
                continue;
            };
            for region in regions {
                write_region_line(out, contig, region.start, region.end, region.slot, float_mode)?;
                if let Some(uout) = unique_out.as_deref_mut() {
                    write_region_line(
                        uout,
                        contig,
                        region.start,
                        region.end,
                        region.unique_slot,
                        float_mode,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Same as [`write_ordered`](Self::write_ordered) but reading values from
    /// a caller-owned per-contig table (the multi-file worker path, where the
    /// index itself is shared read-only).
    pub fn write_ordered_from(
        &self,
        values: &HashMap<String, Vec<f64>>,
        out: &mut dyn Write,
        float_mode: bool,
    ) -> std::io::Result<()> {
        for contig in &self.contig_order {
            let Some(regions) = self.by_contig.get(contig) else {
                continue;
            };
            let vals = values.get(contig);
            for (z, region) in regions.iter().enumerate() {
                let v = vals.and_then(|v| v.get(z)).copied().unwrap_or(0.0);
                write_region_line(out, contig, region.start, region.end, v, float_mode)?;
            }
        }
        Ok(())
    }

    /// Emit zero-valued lines for every annotated contig the input never
    /// visited.
    pub fn write_missing(
        &self,
        seen: &HashMap<String, bool>,
        out: &mut dyn Write,
        float_mode: bool,
    ) -> std::io::Result<()> {
        for contig in &self.contig_order {
            if seen.contains_key(contig) {
                continue;
            }
            let Some(regions) = self.by_contig.get(contig) else {
                continue;
            };
            for region in regions {
                write_region_line(out, contig, region.start, region.end, 0.0, float_mode)?;
            }
        }
        Ok(())
    }
}

/// `chrom\tstart\tend\tvalue`, integer-formatted whenever the value is whole
/// and the reducer is integral.
pub fn write_region_line(
    out: &mut dyn Write,
    contig: &str,
    start: u32,
    end: u32,
    value: f64,
    float_mode: bool,
) -> std::io::Result<()> {
    if float_mode || value.fract() != 0.0 {
        writeln!(out, "{}\t{}\t{}\t{:.3}", contig, start, end, value)
    } else {
        writeln!(out, "{}\t{}\t{}\t{}", contig, start, end, value as i64)
    }
}
