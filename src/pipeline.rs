use crate::alts::{parse_mdz, AltConfig, AltEmitter};
use crate::annotation::RegionIndex;
use crate::bigwig;
use crate::cigar;
use crate::cli::Args;
use crate::coverage::{
    accrue_record, flush_contig, sum_regions, CoverageBuffer, CoverageOptions, CoverageSink,
    MateOverlapStore,
};
use crate::errors::EngineError;
use crate::fragdist::FragDist;
use crate::junctions::JunctionAssembler;
use crate::read_ends::ReadEnds;
use crate::types::{HashMap, HashMapExt};
use anyhow::{anyhow, Context, Result};
use bigtools::beddata::BedParserStreamingIterator;
use bigtools::{BigWigWrite, Value};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rust_htslib::bam::record::Aux;
use rust_htslib::bam::{self as hts_bam, Read as HtsRead};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread;

/// Depth of the record queue between the decoder and analyzer threads.
const RECORD_QUEUE_DEPTH: usize = 200;
const PROGRESS_UPDATE_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Bam,
    BigWig,
    BigWigList,
}

/// Input dispatch is by filename suffix alone.
pub fn detect_format(path: &Path) -> Result<InputFormat, EngineError> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "bam" | "sam" => Ok(InputFormat::Bam),
        "bw" | "bigwig" => Ok(InputFormat::BigWig),
        "txt" => Ok(InputFormat::BigWigList),
        _ => Err(EngineError::InputFormatUnknown(path.to_path_buf())),
    }
}

pub fn run(args: &Args) -> Result<()> {
    // A half-given --annotation is fatal before any processing starts.
    args.annotation_parts()?;
    match detect_format(&args.input)? {
        InputFormat::Bam => run_bam(args),
        InputFormat::BigWig => run_bigwig(args),
        InputFormat::BigWigList => {
            let index = match args.annotation_parts()? {
                Some((bed, _)) => Some(RegionIndex::load(&bed)?),
                None => None,
            };
            bigwig::process_bigwig_list(
                &args.input,
                index.as_ref(),
                args.op,
                args.keep_order,
                args.threads,
            )
        }
    }
}

fn run_bigwig(args: &Args) -> Result<()> {
    match args.annotation_parts()? {
        None => {
            // No annotation: a single total-AUC line is the whole output.
            let auc = bigwig::total_auc(&args.input)?;
            println!("AUC_ALL_BASES\t{:.3}", auc);
            Ok(())
        }
        Some((bed, prefix)) => {
            let index = RegionIndex::load(&bed)?;
            let mut out = BufWriter::new(
                File::create(format!("{prefix}.all.tsv"))
                    .with_context(|| format!("failed to create {prefix}.all.tsv"))?,
            );
            let mut local: HashMap<String, Vec<f64>> = HashMap::new();
            let mut err_out = std::io::stderr();
            let outcome = bigwig::process_bigwig(
                &args.input,
                &index,
                args.op,
                args.keep_order,
                &mut out,
                &mut local,
                &mut err_out,
            )?;
            if args.keep_order {
                index.write_ordered_from(&local, &mut out, args.op.is_float())?;
            } else {
                index.write_missing(&outcome.seen, &mut out, args.op.is_float())?;
            }
            out.flush()?;
            println!("AUC_ANNOTATED_BASES\t{:.3}", outcome.annotated_auc);
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    pub records: u64,
    pub passing: u64,
    pub mapped_bases: u64,
    pub sequence_bases: u64,
}

#[derive(Debug, Clone)]
struct TargetInfo {
    name: String,
    len: usize,
}

struct AnnotationSink {
    index: RegionIndex,
    out: Box<dyn Write>,
    unique_out: Option<Box<dyn Write>>,
    seen: HashMap<String, bool>,
}

struct ReadEndsSink {
    hist: ReadEnds,
    starts_out: Box<dyn Write>,
    ends_out: Box<dyn Write>,
}

struct AltSink {
    emitter: AltEmitter,
    out: Box<dyn Write>,
    qual_checked: bool,
}

fn create_out(prefix: &str, suffix: &str) -> Result<Box<dyn Write>> {
    let path = format!("{prefix}.{suffix}");
    let file =
        File::create(&path).with_context(|| format!("failed to create output file {path}"))?;
    Ok(Box::new(BufWriter::new(file)))
}

struct BamAnalyzer<'a> {
    args: &'a Args,
    targets: Vec<TargetInfo>,
    compute_coverage: bool,
    cov_opts: CoverageOptions,
    ptid: i32,
    coverage: Option<CoverageBuffer>,
    mates: MateOverlapStore,
    annot: Option<AnnotationSink>,
    read_ends: Option<ReadEndsSink>,
    fragdist: Option<FragDist>,
    frags_out: Option<Box<dyn Write>>,
    junctions: Option<JunctionAssembler>,
    jxs_out: Option<Box<dyn Write>>,
    alts: Option<AltSink>,
    softclip_out: Option<Box<dyn Write>>,
    cov_bed_out: Option<Box<dyn Write>>,
    bw_all_runs: Option<Vec<(String, Value)>>,
    bw_unique_runs: Option<Vec<(String, Value)>>,
    auc_out: Option<Box<dyn Write>>,
    echo_writer: Option<hts_bam::Writer>,
    stats: Stats,
    all_auc: u64,
    unique_auc: u64,
    annotated_auc: u64,
    unique_annotated_auc: u64,
}

impl<'a> BamAnalyzer<'a> {
    fn new(args: &'a Args, targets: Vec<TargetInfo>, header: &hts_bam::HeaderView) -> Result<Self> {
        let unique = args.min_unique_qual.is_some();
        let compute_coverage = args.coverage
            || args.auc.is_some()
            || args.annotation.is_some()
            || args.bigwig.is_some();
        let longest = targets.iter().map(|t| t.len).max().unwrap_or(0);

        let annot = match args.annotation_parts()? {
            Some((bed, prefix)) => {
                let index = RegionIndex::load(&bed)?;
                let out = create_out(prefix, "all.tsv")?;
                let unique_out = unique.then(|| create_out(prefix, "unique.tsv")).transpose()?;
                Some(AnnotationSink {
                    index,
                    out,
                    unique_out,
                    seen: HashMap::new(),
                })
            }
            None => None,
        };

        let read_ends = match args.read_ends.as_deref() {
            Some(prefix) => Some(ReadEndsSink {
                hist: ReadEnds::new(longest),
                starts_out: create_out(prefix, "starts.tsv")?,
                ends_out: create_out(prefix, "ends.tsv")?,
            }),
            None => None,
        };

        let alts = match args.alts.as_deref() {
            Some(prefix) => Some(AltSink {
                emitter: AltEmitter::new(AltConfig {
                    include_softclip: args.include_softclip.is_some(),
                    only_polya: args.only_polya,
                    include_n: args.include_n,
                    print_qual: args.print_qual,
                    test_polya: args.test_polya,
                }),
                out: create_out(prefix, "alts.tsv")?,
                qual_checked: false,
            }),
            None => None,
        };

        let softclip_out = args
            .include_softclip
            .as_deref()
            .map(|prefix| create_out(prefix, "softclip.tsv"))
            .transpose()?;

        let echo_writer = if args.echo_sam {
            let header = hts_bam::Header::from_template(header);
            Some(hts_bam::Writer::from_stdout(&header, hts_bam::Format::Sam)?)
        } else {
            None
        };

        Ok(Self {
            args,
            compute_coverage,
            cov_opts: CoverageOptions {
                double_count: args.double_count,
                min_unique_qual: args.min_unique_qual,
            },
            ptid: -1,
            coverage: compute_coverage.then(|| CoverageBuffer::new(longest, unique)),
            mates: MateOverlapStore::new(),
            annot,
            read_ends,
            fragdist: args.frag_dist.is_some().then(FragDist::new),
            frags_out: args
                .frag_dist
                .as_deref()
                .map(|prefix| create_out(prefix, "frags.tsv"))
                .transpose()?,
            junctions: args.junctions.is_some().then(JunctionAssembler::new),
            jxs_out: args
                .junctions
                .as_deref()
                .map(|prefix| create_out(prefix, "jxs.tsv"))
                .transpose()?,
            alts,
            softclip_out,
            cov_bed_out: args.coverage.then(|| {
                Box::new(BufWriter::with_capacity(1 << 22, std::io::stdout())) as Box<dyn Write>
            }),
            bw_all_runs: args.bigwig.is_some().then(Vec::new),
            bw_unique_runs: (args.bigwig.is_some() && unique).then(Vec::new),
            auc_out: args
                .auc
                .as_deref()
                .map(|prefix| create_out(prefix, "auc.tsv"))
                .transpose()?,
            echo_writer,
            stats: Stats::default(),
            all_auc: 0,
            unique_auc: 0,
            annotated_auc: 0,
            unique_annotated_auc: 0,
            targets,
        })
    }

    fn process_record(&mut self, rec: &hts_bam::Record) -> Result<()> {
        self.stats.records += 1;
        if rec.is_unmapped() || rec.is_secondary() {
            return Ok(());
        }
        self.stats.passing += 1;
        let tid = rec.tid();
        if self.softclip_out.is_some() {
            self.stats.sequence_bases += rec.seq_len() as u64;
        }

        if tid != self.ptid {
            if self.ptid >= 0 {
                self.finalize_contig()?;
            }
            self.mates.clear();
            if let Some(jx) = self.junctions.as_mut() {
                jx.clear();
            }
        }
        self.ptid = tid;

        let mut total_intron_len = 0i64;
        let mut end_refpos = -1i64;
        if self.compute_coverage {
            end_refpos = accrue_record(
                rec,
                self.coverage.as_mut(),
                &self.cov_opts,
                Some(&mut self.mates),
                &mut total_intron_len,
            );
        }
        if end_refpos < 0 && (self.args.ends || self.fragdist.is_some()) {
            end_refpos = accrue_record(rec, None, &self.cov_opts, None, &mut total_intron_len);
        }

        if self.args.ends {
            println!("{}\t{}", String::from_utf8_lossy(rec.qname()), end_refpos);
        }

        if let Some(fd) = self.fragdist.as_mut() {
            fd.observe(rec, end_refpos, total_intron_len);
        }

        if let Some(re) = self.read_ends.as_mut() {
            let passes = self
                .cov_opts
                .min_unique_qual
                .map(|q| rec.mapq() >= q)
                .unwrap_or(true);
            if passes {
                let end = if end_refpos >= 0 {
                    end_refpos
                } else {
                    rec.cigar().end_pos()
                };
                re.hist.observe(rec.pos(), end);
            }
        }

        if let Some(writer) = self.echo_writer.as_mut() {
            writer.write(rec)?;
        }

        if let Some(alt) = self.alts.as_mut() {
            if !alt.qual_checked {
                alt.qual_checked = true;
                if alt.emitter.cfg.print_qual && rec.qual().first() == Some(&255) {
                    tracing::warn!(
                        "--print-qual specified but quality strings don't seem to be present"
                    );
                    alt.emitter.cfg.print_qual = false;
                }
            }
            match rec.aux(b"MD") {
                Ok(Aux::String(mdz)) => {
                    let ops = parse_mdz(mdz)?;
                    alt.emitter.emit_from_cigar_mdz(rec, &ops, &mut alt.out)?;
                }
                _ => {
                    if self.args.require_mdz {
                        return Err(EngineError::MalformedAuxiliary(format!(
                            "no MD:Z field for aligned read {}",
                            String::from_utf8_lossy(rec.qname())
                        ))
                        .into());
                    }
                    alt.emitter.emit_from_cigar(rec, &mut alt.out)?;
                }
            }
        }

        let want_junctions = self.junctions.is_some();
        if self.args.num_bases || want_junctions {
            let scan = cigar::scan(&rec.cigar(), want_junctions);
            if self.args.num_bases {
                self.stats.mapped_bases += scan.mapped_len;
            }
            if let (Some(jx), Some(out)) = (self.junctions.as_mut(), self.jxs_out.as_mut()) {
                let name = self
                    .targets
                    .get(tid as usize)
                    .map(|t| t.name.as_str())
                    .unwrap_or("*");
                jx.process(rec, &scan, name, out.as_mut())?;
            }
        }

        Ok(())
    }

    /// Flush everything tied to the contig that just finished: run-length
    /// coverage, annotation sums, and read-end histograms.
    fn finalize_contig(&mut self) -> Result<()> {
        let Some(target) = self.targets.get(self.ptid as usize).cloned() else {
            return Ok(());
        };
        let name = target.name;
        let len = target.len;

        if let Some(cov) = self.coverage.as_mut() {
            {
                let mut sink = if let Some(runs) = self.bw_all_runs.as_mut() {
                    CoverageSink::BigWig(runs)
                } else if let Some(out) = self.cov_bed_out.as_mut() {
                    CoverageSink::Bed(out.as_mut())
                } else {
                    CoverageSink::Quiet
                };
                self.all_auc += flush_contig(cov.all(), len, &name, false, &mut sink)?;
            }
            if let Some(unique_arr) = cov.unique() {
                let mut sink = if let Some(runs) = self.bw_unique_runs.as_mut() {
                    CoverageSink::BigWig(runs)
                } else if let Some(out) = self.cov_bed_out.as_mut() {
                    CoverageSink::Bed(out.as_mut())
                } else {
                    CoverageSink::Quiet
                };
                self.unique_auc += flush_contig(unique_arr, len, &name, false, &mut sink)?;
            }
            if let Some(ann) = self.annot.as_mut() {
                if let Some(regions) = ann.index.by_contig.get_mut(&name) {
                    sum_regions(
                        cov.all(),
                        regions,
                        &name,
                        ann.out.as_mut(),
                        &mut self.annotated_auc,
                        self.args.keep_order,
                        false,
                    )?;
                    if let Some(unique_arr) = cov.unique() {
                        if let Some(uout) = ann.unique_out.as_mut() {
                            sum_regions(
                                unique_arr,
                                regions,
                                &name,
                                uout.as_mut(),
                                &mut self.unique_annotated_auc,
                                self.args.keep_order,
                                true,
                            )?;
                        }
                    }
                    if !self.args.keep_order {
                        ann.seen.insert(name.clone(), true);
                    }
                }
            }
            cov.reset();
        }

        if let Some(re) = self.read_ends.as_mut() {
            let ReadEndsSink {
                hist,
                starts_out,
                ends_out,
            } = re;
            hist.flush_contig(&name, len, starts_out.as_mut(), ends_out.as_mut())?;
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.ptid >= 0 {
            self.finalize_contig()?;
        }

        if let Some(ann) = self.annot.as_mut() {
            if self.args.keep_order {
                ann.index
                    .write_ordered(ann.out.as_mut(), ann.unique_out.as_deref_mut(), false)?;
            } else {
                ann.index.write_missing(&ann.seen, ann.out.as_mut(), false)?;
                if let Some(uout) = ann.unique_out.as_deref_mut() {
                    ann.index.write_missing(&ann.seen, uout, false)?;
                }
            }
            ann.out.flush()?;
            if let Some(uout) = ann.unique_out.as_deref_mut() {
                uout.flush()?;
            }
        }

        if let Some(auc_out) = self.auc_out.as_mut() {
            writeln!(auc_out, "ALL_READS_ALL_BASES\t{}", self.all_auc)?;
            if self.cov_opts.min_unique_qual.is_some() {
                writeln!(auc_out, "UNIQUE_READS_ALL_BASES\t{}", self.unique_auc)?;
            }
            if self.annot.is_some() {
                writeln!(auc_out, "ALL_READS_ANNOTATED_BASES\t{}", self.annotated_auc)?;
                if self.cov_opts.min_unique_qual.is_some() {
                    writeln!(
                        auc_out,
                        "UNIQUE_READS_ANNOTATED_BASES\t{}",
                        self.unique_annotated_auc
                    )?;
                }
            }
            auc_out.flush()?;
        }

        if let (Some(fd), Some(out)) = (self.fragdist.as_ref(), self.frags_out.as_mut()) {
            fd.write(out.as_mut())?;
            out.flush()?;
        }

        if let Some(out) = self.jxs_out.as_mut() {
            out.flush()?;
        }

        if let Some(out) = self.cov_bed_out.as_mut() {
            out.flush()?;
        }

        if let Some(alt) = self.alts.as_mut() {
            alt.out.flush()?;
        }

        if let Some(out) = self.softclip_out.as_mut() {
            let clipped = self
                .alts
                .as_ref()
                .map(|a| a.emitter.total_softclip_bases)
                .unwrap_or(0);
            writeln!(out, "{} bases softclipped", clipped)?;
            writeln!(
                out,
                "{} total number of processed sequence bases",
                self.stats.sequence_bases
            )?;
            out.flush()?;
        }

        // BigWig output is written in one shot at end of run; the per-contig
        // runs were collected as contigs finalized.
        if let Some(prefix) = self.args.bigwig.as_deref() {
            let chrom_map: std::collections::HashMap<String, u32> = self
                .targets
                .iter()
                .map(|t| (t.name.clone(), t.len as u32))
                .collect();
            if let Some(runs) = self.bw_all_runs.take() {
                write_bigwig_file(
                    format!("{prefix}.all.bw"),
                    chrom_map.clone(),
                    runs,
                    self.args.threads,
                )?;
            }
            if let Some(runs) = self.bw_unique_runs.take() {
                write_bigwig_file(
                    format!("{prefix}.unique.bw"),
                    chrom_map,
                    runs,
                    self.args.threads,
                )?;
            }
        }

        Ok(())
    }
}

fn write_bigwig_file(
    path: String,
    chrom_map: std::collections::HashMap<String, u32>,
    runs: Vec<(String, Value)>,
    threads: usize,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads.max(1))
        .build()
        .context("failed to build BigWig writer runtime")?;
    let out = BigWigWrite::create_file(path.clone(), chrom_map)
        .map_err(|e| anyhow!("failed to create BigWig {path}: {e}"))?;
    let data = BedParserStreamingIterator::wrap_infallible_iter(runs.into_iter(), true);
    out.write(data, runtime)
        .map_err(|e| anyhow!("failed to write BigWig {path}: {e}"))?;
    Ok(())
}

fn drain_records(
    rx: flume::Receiver<hts_bam::Record>,
    analyzer: &mut BamAnalyzer<'_>,
    progress: Option<&ProgressBar>,
) -> Result<()> {
    for rec in rx.iter() {
        analyzer.process_record(&rec)?;
        if let Some(pb) = progress {
            if analyzer.stats.records % PROGRESS_UPDATE_INTERVAL == 0 {
                pb.set_message(format!("Processed {} reads", analyzer.stats.records));
                pb.tick();
            }
        }
    }
    Ok(())
}

fn run_bam(args: &Args) -> Result<()> {
    tracing::info!(input = %args.input.display(), "processing BAM");
    // An existing file htslib rejects is a header/format parse failure, not
    // an open failure.
    let mut reader = hts_bam::Reader::from_path(&args.input).map_err(|e| {
        if args.input.exists() {
            EngineError::HeaderReadFailed {
                path: args.input.clone(),
                msg: e.to_string(),
            }
        } else {
            EngineError::CodecOpenFailed {
                path: args.input.clone(),
                msg: e.to_string(),
            }
        }
    })?;
    if args.threads > 1 {
        reader.set_threads(args.threads)?;
    }

    let header = reader.header().clone();
    let targets: Vec<TargetInfo> = (0..header.target_count())
        .map(|tid| TargetInfo {
            name: String::from_utf8_lossy(header.tid2name(tid)).into_owned(),
            len: header.target_len(tid).unwrap_or(0) as usize,
        })
        .collect();

    if args.head {
        for (i, t) in targets.iter().enumerate() {
            println!("@{},{},{}", i, t.name, t.len);
        }
    }

    let mut analyzer = BamAnalyzer::new(args, targets, &header)?;

    let progress = if !args.quiet {
        let pb = ProgressBar::new_spinner();
        pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(2));
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Failed to set progress bar template"),
        );
        pb.set_message("Processing alignments...");
        Some(pb)
    } else {
        None
    };

    // Dedicated decoder thread; the analyzer drains the bounded queue on this
    // thread, observing records in exactly the stored file order.
    let (tx, rx) = flume::bounded::<hts_bam::Record>(RECORD_QUEUE_DEPTH);
    let stats = thread::scope(|scope| -> Result<Stats> {
        let reader_jh = scope.spawn(move || -> Result<()> {
            let mut record = hts_bam::Record::new();
            loop {
                match reader.read(&mut record) {
                    None => break,
                    Some(Err(e)) => return Err(e).context("failed to read alignment record"),
                    Some(Ok(())) => {
                        if tx.send(record.clone()).is_err() {
                            // Consumer exited; stop decoding.
                            break;
                        }
                    }
                }
            }
            Ok(())
        });

        // Drain by value so the channel closes even on an analyzer error,
        // which lets a producer blocked on a full queue exit.
        let drained = drain_records(rx, &mut analyzer, progress.as_ref());
        let read_result = reader_jh
            .join()
            .map_err(|_| anyhow!("reader thread panicked"))?;
        drained?;
        read_result?;
        analyzer.finish()?;
        Ok(std::mem::take(&mut analyzer.stats))
    })?;

    if let Some(pb) = progress {
        pb.finish_with_message(format!("Completed: {} reads processed", stats.records));
    }

    println!("Read {} records", stats.records);
    if args.num_bases {
        println!("{} records passed filters", stats.passing);
        println!(
            "{} bases in alignments which passed filters",
            stats.mapped_bases
        );
    }
    tracing::info!(
        total_reads = stats.records,
        passing_reads = stats.passing,
        "depthwalk: processing complete"
    );
    Ok(())
}
