use crate::annotation::{write_region_line, RegionIndex, ReduceOp};
use crate::errors::EngineError;
use crate::types::{HashMap, HashMapExt};
use anyhow::{Context, Result};
use bigtools::{BBIRead, BigWigRead, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;

/// Sum `(end - start) * value` over every interval of every contig.
/// Contigs without interval data are logged and skipped.
pub fn total_auc(path: &Path) -> Result<f64> {
    let path_str = path.to_string_lossy();
    let mut bw = BigWigRead::open_file(path_str.as_ref())
        .map_err(|e| EngineError::CodecOpenFailed {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })?;
    let chroms = bw.chroms().to_vec();
    let mut auc = 0.0f64;
    for chrom in chroms {
        if chrom.length < 1 {
            continue;
        }
        let mut seen_any = false;
        let iter = bw
            .get_interval(&chrom.name, 0, chrom.length)
            .with_context(|| format!("interval query failed for {}", chrom.name))?;
        for iv in iter {
            let iv = iv?;
            seen_any = true;
            auc += (iv.end - iv.start) as f64 * iv.value as f64;
        }
        if !seen_any {
            let err = EngineError::EmptyContigInBigWig {
                contig: chrom.name.clone(),
                path: path.to_path_buf(),
            };
            tracing::warn!("{err}, skipping contig");
        }
    }
    Ok(auc)
}

/// Reduce sorted, possibly sparse intervals against possibly-overlapping
/// regions in one forward pass, backing the cursor up when a region starts
/// before the previous one ended.
///
/// `mean` divides by the full region length (uncovered bases count as 0);
/// `min`/`max` range over covered intervals only, 0 for an uncovered region.
/// The second return value is the summed region sums (the annotated-AUC
/// contribution when the op is `sum`).
pub fn reduce_regions(
    intervals: &[Value],
    regions: &[(u32, u32)],
    op: ReduceOp,
) -> (Vec<f64>, f64) {
    let mut values = Vec::with_capacity(regions.len());
    let mut auc = 0.0f64;
    let mut cursor = 0usize;
    for &(rstart, rend) in regions {
        while cursor > 0 && (cursor >= intervals.len() || rstart < intervals[cursor].start) {
            cursor -= 1;
        }
        let mut j = cursor;
        let mut sum = 0.0f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut covered = false;
        while j < intervals.len() {
            let iv = &intervals[j];
            if iv.start >= rend {
                break;
            }
            let lo = rstart.max(iv.start);
            let hi = rend.min(iv.end);
            if lo < hi {
                covered = true;
                sum += (hi - lo) as f64 * iv.value as f64;
                min = min.min(iv.value as f64);
                max = max.max(iv.value as f64);
            }
            if iv.end >= rend {
                break;
            }
            j += 1;
        }
        cursor = j;
        auc += sum;
        let region_len = rend.saturating_sub(rstart) as f64;
        let value = match op {
            ReduceOp::Sum => sum,
            ReduceOp::Mean => {
                if region_len > 0.0 {
                    sum / region_len
                } else {
                    0.0
                }
            }
            ReduceOp::Min => {
                if covered {
                    min
                } else {
                    0.0
                }
            }
            ReduceOp::Max => {
                if covered {
                    max
                } else {
                    0.0
                }
            }
        };
        values.push(value);
    }
    (values, auc)
}

pub struct BwAnnotationOutcome {
    pub annotated_auc: f64,
    pub seen: HashMap<String, bool>,
}

/// Stream one BigWig against the annotation. Contigs absent from the index
/// are not queried; contigs with no interval data are logged to `err_out`
/// and skipped. Region values go inline to `out`, or into `local` when BED
/// order must be preserved.
pub fn process_bigwig(
    path: &Path,
    index: &RegionIndex,
    op: ReduceOp,
    keep_order: bool,
    out: &mut dyn Write,
    local: &mut HashMap<String, Vec<f64>>,
    err_out: &mut dyn Write,
) -> Result<BwAnnotationOutcome> {
    let path_str = path.to_string_lossy();
    let mut bw = BigWigRead::open_file(path_str.as_ref())
        .map_err(|e| EngineError::CodecOpenFailed {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })?;
    let chroms = bw.chroms().to_vec();
    let mut outcome = BwAnnotationOutcome {
        annotated_auc: 0.0,
        seen: HashMap::new(),
    };
    for chrom in chroms {
        let Some(regions) = index.by_contig.get(&chrom.name) else {
            continue;
        };
        let iter = bw
            .get_interval(&chrom.name, 0, chrom.length)
            .with_context(|| format!("interval query failed for {}", chrom.name))?;
        let intervals: Vec<Value> = iter.collect::<std::result::Result<_, _>>()?;
        if intervals.is_empty() {
            let err = EngineError::EmptyContigInBigWig {
                contig: chrom.name.clone(),
                path: path.to_path_buf(),
            };
            writeln!(err_out, "WARNING: {err}, skipping contig")?;
            continue;
        }
        let bounds: Vec<(u32, u32)> = regions.iter().map(|r| (r.start, r.end)).collect();
        let (values, sum_auc) = reduce_regions(&intervals, &bounds, op);
        if op == ReduceOp::Sum {
            outcome.annotated_auc += sum_auc;
        }
        if keep_order {
            local.insert(chrom.name.clone(), values);
        } else {
            for (region, value) in regions.iter().zip(&values) {
                write_region_line(out, &chrom.name, region.start, region.end, *value, op.is_float())?;
            }
        }
        outcome.seen.insert(chrom.name.clone(), true);
    }
    Ok(outcome)
}

/// Process a text file listing BigWig paths, sharded round-robin across
/// worker threads. Every file gets its own `<basename>.all.tsv` and
/// `<basename>.err`; a failing file is reported in its err file and the
/// worker moves on to its next file.
pub fn process_bigwig_list(
    list_path: &Path,
    index: Option<&RegionIndex>,
    op: ReduceOp,
    keep_order: bool,
    threads: usize,
) -> Result<()> {
    let file = File::open(list_path).map_err(|e| EngineError::CodecOpenFailed {
        path: list_path.to_path_buf(),
        msg: e.to_string(),
    })?;
    let mut files: Vec<PathBuf> = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            files.push(PathBuf::from(line));
        }
    }
    let workers = threads.max(1).min(files.len().max(1));
    let mut shards: Vec<Vec<PathBuf>> = vec![Vec::new(); workers];
    for (i, f) in files.into_iter().enumerate() {
        shards[i % workers].push(f);
    }

    thread::scope(|scope| {
        for shard in &shards {
            scope.spawn(move || {
                for path in shard {
                    if let Err(e) = process_one_listed_bigwig(path, index, op, keep_order) {
                        tracing::error!(file = %path.display(), error = %e, "bigwig worker failure");
                    }
                }
            });
        }
    });
    Ok(())
}

fn process_one_listed_bigwig(
    path: &Path,
    index: Option<&RegionIndex>,
    op: ReduceOp,
    keep_order: bool,
) -> Result<()> {
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    let mut err_out = BufWriter::new(File::create(format!("{basename}.err"))?);

    let result = match index {
        Some(index) => {
            let mut out = BufWriter::new(File::create(format!("{basename}.all.tsv"))?);
            let mut local: HashMap<String, Vec<f64>> = HashMap::new();
            match process_bigwig(path, index, op, keep_order, &mut out, &mut local, &mut err_out) {
                Ok(outcome) => {
                    if keep_order {
                        index.write_ordered_from(&local, &mut out, op.is_float())?;
                    } else {
                        index.write_missing(&outcome.seen, &mut out, op.is_float())?;
                    }
                    out.flush()?;
                    println!(
                        "AUC_ANNOTATED_BASES\t{:.3}\t{}",
                        outcome.annotated_auc,
                        path.display()
                    );
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        None => match total_auc(path) {
            Ok(auc) => {
                println!("AUC_ALL_BASES\t{:.3}\t{}", auc, path.display());
                Ok(())
            }
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => {
            writeln!(err_out, "SUCCESS processing bigwig {}", path.display())?;
            err_out.flush()?;
            Ok(())
        }
        Err(e) => {
            writeln!(err_out, "FAILED to process bigwig {}", path.display())?;
            err_out.flush()?;
            Err(e)
        }
    }
}
