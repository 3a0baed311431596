//! Coverage accrual, mate-overlap correction, run-length emission, and
//! per-region sums over synthetic alignment records.

mod common;

use common::{header_view, record_from_sam};
use depthwalk::{
    accrue_record, flush_contig, sum_regions, CoverageBuffer, CoverageOptions, CoverageSink,
    MateOverlapStore, Region,
};

// ── helpers ──────────────────────────────────────────────────────────────────

fn plain_opts() -> CoverageOptions {
    CoverageOptions {
        double_count: false,
        min_unique_qual: None,
    }
}

fn unique_opts(q: u8) -> CoverageOptions {
    CoverageOptions {
        double_count: false,
        min_unique_qual: Some(q),
    }
}

fn bed_lines(arr: &[u32], len: usize, chrom: &str) -> (Vec<String>, u64) {
    let mut buf: Vec<u8> = Vec::new();
    let auc = {
        let mut sink = CoverageSink::Bed(&mut buf);
        flush_contig(arr, len, chrom, false, &mut sink).expect("flush")
    };
    let lines = String::from_utf8(buf)
        .expect("utf8")
        .lines()
        .map(|s| s.to_string())
        .collect();
    (lines, auc)
}

// ── tests ────────────────────────────────────────────────────────────────────

/// A single 100M read deposits one unit of coverage over its span and
/// contributes its length to the AUC.
#[test]
fn single_read_coverage_and_auc() {
    let hv = header_view(&[("chr0", 2000)]);
    let rec = record_from_sam(&hv, "r1\t0\tchr0\t1001\t60\t100M\t*\t0\t0\t*\t*");

    let mut cov = CoverageBuffer::new(2000, false);
    let mut mates = MateOverlapStore::new();
    let mut intron_len = 0i64;
    let end = accrue_record(
        &rec,
        Some(&mut cov),
        &plain_opts(),
        Some(&mut mates),
        &mut intron_len,
    );
    assert_eq!(end, 1100);
    assert_eq!(intron_len, 0);
    assert!(cov.all()[1000..1100].iter().all(|&v| v == 1));
    assert_eq!(cov.all()[999], 0);
    assert_eq!(cov.all()[1100], 0);

    let (lines, auc) = bed_lines(cov.all(), 2000, "chr0");
    assert_eq!(auc, 100);
    assert!(lines.contains(&"chr0\t1000\t1100\t1".to_string()));
    // Zero runs flank the covered interval.
    assert!(lines.contains(&"chr0\t0\t1000\t0".to_string()));
    assert!(lines.contains(&"chr0\t1100\t2000\t0".to_string()));
}

/// Overlapping proper-pair mates count each overlapped base once.
#[test]
fn overlapping_mates_count_once() {
    let hv = header_view(&[("chr0", 1000)]);
    let a = record_from_sam(&hv, "p1\t99\tchr0\t101\t60\t50M\t=\t131\t80\t*\t*");
    let b = record_from_sam(&hv, "p1\t147\tchr0\t131\t60\t50M\t=\t101\t-80\t*\t*");

    let mut cov = CoverageBuffer::new(1000, false);
    let mut mates = MateOverlapStore::new();
    let mut intron_len = 0i64;
    accrue_record(&a, Some(&mut cov), &plain_opts(), Some(&mut mates), &mut intron_len);
    assert_eq!(mates.len(), 1);
    accrue_record(&b, Some(&mut cov), &plain_opts(), Some(&mut mates), &mut intron_len);
    assert!(mates.is_empty());

    assert!(cov.all()[100..180].iter().all(|&v| v == 1), "each base once");
    let (_, auc) = bed_lines(cov.all(), 1000, "chr0");
    assert_eq!(auc, 80);
}

/// With --double-count the correction is skipped and the overlap counts twice.
#[test]
fn double_count_keeps_overlap() {
    let hv = header_view(&[("chr0", 1000)]);
    let a = record_from_sam(&hv, "p1\t99\tchr0\t101\t60\t50M\t=\t131\t80\t*\t*");
    let b = record_from_sam(&hv, "p1\t147\tchr0\t131\t60\t50M\t=\t101\t-80\t*\t*");

    let opts = CoverageOptions {
        double_count: true,
        min_unique_qual: None,
    };
    let mut cov = CoverageBuffer::new(1000, false);
    let mut mates = MateOverlapStore::new();
    let mut intron_len = 0i64;
    accrue_record(&a, Some(&mut cov), &opts, Some(&mut mates), &mut intron_len);
    accrue_record(&b, Some(&mut cov), &opts, Some(&mut mates), &mut intron_len);

    assert!(mates.is_empty(), "no entries stored when double counting");
    assert!(cov.all()[130..150].iter().all(|&v| v == 2));
    assert!(cov.all()[100..130].iter().all(|&v| v == 1));
    assert!(cov.all()[150..180].iter().all(|&v| v == 1));
}

/// The unique track only sees records at or above the quality threshold,
/// and the overlap correction only touches it when both mates qualify.
#[test]
fn unique_track_quality_gating() {
    let hv = header_view(&[("chr0", 1000)]);

    // Both mates pass: unique matches all.
    let a = record_from_sam(&hv, "p1\t99\tchr0\t101\t60\t50M\t=\t131\t80\t*\t*");
    let b = record_from_sam(&hv, "p1\t147\tchr0\t131\t60\t50M\t=\t101\t-80\t*\t*");
    let mut cov = CoverageBuffer::new(1000, true);
    let mut mates = MateOverlapStore::new();
    let mut intron_len = 0i64;
    accrue_record(&a, Some(&mut cov), &unique_opts(10), Some(&mut mates), &mut intron_len);
    accrue_record(&b, Some(&mut cov), &unique_opts(10), Some(&mut mates), &mut intron_len);
    let unique = cov.unique().expect("unique track enabled");
    assert!(unique[100..180].iter().all(|&v| v == 1));

    // Second mate fails the threshold: it never joins the unique track, and
    // the stored first mate's unique contribution survives untouched.
    let b_low = record_from_sam(&hv, "p2\t147\tchr0\t131\t5\t50M\t=\t101\t-80\t*\t*");
    let a2 = record_from_sam(&hv, "p2\t99\tchr0\t101\t60\t50M\t=\t131\t80\t*\t*");
    let mut cov = CoverageBuffer::new(1000, true);
    let mut mates = MateOverlapStore::new();
    let mut intron_len = 0i64;
    accrue_record(&a2, Some(&mut cov), &unique_opts(10), Some(&mut mates), &mut intron_len);
    accrue_record(&b_low, Some(&mut cov), &unique_opts(10), Some(&mut mates), &mut intron_len);
    let unique = cov.unique().expect("unique track enabled");
    assert!(unique[100..150].iter().all(|&v| v == 1));
    assert!(unique[150..180].iter().all(|&v| v == 0));
    // unique[b] <= all[b] everywhere.
    for (u, a) in unique.iter().zip(cov.all()) {
        assert!(u <= a);
    }
}

/// Ref-skips advance position without depositing coverage and accumulate
/// into the intron total.
#[test]
fn ref_skip_splits_coverage() {
    let hv = header_view(&[("chr0", 1000)]);
    let rec = record_from_sam(&hv, "r1\t0\tchr0\t501\t60\t30M100N30M\t*\t0\t0\t*\t*");

    let mut cov = CoverageBuffer::new(1000, false);
    let mut mates = MateOverlapStore::new();
    let mut intron_len = 0i64;
    let end = accrue_record(
        &rec,
        Some(&mut cov),
        &plain_opts(),
        Some(&mut mates),
        &mut intron_len,
    );
    assert_eq!(end, 660);
    assert_eq!(intron_len, 100);
    assert!(cov.all()[500..530].iter().all(|&v| v == 1));
    assert!(cov.all()[530..630].iter().all(|&v| v == 0));
    assert!(cov.all()[630..660].iter().all(|&v| v == 1));
}

/// The AUC reported by run-length emission equals the plain array sum.
#[test]
fn auc_matches_array_sum() {
    let hv = header_view(&[("chr0", 500)]);
    let recs = [
        "r1\t0\tchr0\t11\t60\t40M\t*\t0\t0\t*\t*",
        "r2\t0\tchr0\t31\t60\t40M\t*\t0\t0\t*\t*",
        "r3\t0\tchr0\t101\t60\t10M20N10M\t*\t0\t0\t*\t*",
    ];
    let mut cov = CoverageBuffer::new(500, false);
    let mut mates = MateOverlapStore::new();
    for sam in recs {
        let rec = record_from_sam(&hv, sam);
        let mut intron_len = 0i64;
        accrue_record(&rec, Some(&mut cov), &plain_opts(), Some(&mut mates), &mut intron_len);
    }
    let expected: u64 = cov.all().iter().map(|&v| v as u64).sum();
    let (_, auc) = bed_lines(cov.all(), 500, "chr0");
    assert_eq!(auc, expected);
}

/// A region sum equals the coverage-array sum over the same window.
#[test]
fn region_sum_matches_window() {
    let hv = header_view(&[("chr0", 2000)]);
    let rec = record_from_sam(&hv, "r1\t0\tchr0\t1001\t60\t100M\t*\t0\t0\t*\t*");
    let mut cov = CoverageBuffer::new(2000, false);
    let mut mates = MateOverlapStore::new();
    let mut intron_len = 0i64;
    accrue_record(&rec, Some(&mut cov), &plain_opts(), Some(&mut mates), &mut intron_len);

    let mut regions = vec![Region {
        start: 950,
        end: 1050,
        slot: 0.0,
        unique_slot: 0.0,
    }];
    let mut out: Vec<u8> = Vec::new();
    let mut annotated_auc = 0u64;
    sum_regions(
        cov.all(),
        &mut regions,
        "chr0",
        &mut out,
        &mut annotated_auc,
        false,
        false,
    )
    .expect("sum");
    assert_eq!(annotated_auc, 50);
    assert_eq!(String::from_utf8(out).unwrap(), "chr0\t950\t1050\t50\n");

    // keep-order stores into the slot instead of printing.
    let mut out: Vec<u8> = Vec::new();
    let mut annotated_auc = 0u64;
    sum_regions(
        cov.all(),
        &mut regions,
        "chr0",
        &mut out,
        &mut annotated_auc,
        true,
        false,
    )
    .expect("sum");
    assert!(out.is_empty());
    assert_eq!(regions[0].slot, 50.0);
}

/// Records without a coverage buffer still report end position and intron
/// length (the fragment-distribution path).
#[test]
fn end_only_walk() {
    let hv = header_view(&[("chr0", 1000)]);
    let rec = record_from_sam(&hv, "r1\t0\tchr0\t101\t60\t20M50N20M\t*\t0\t0\t*\t*");
    let mut intron_len = 0i64;
    let end = accrue_record(&rec, None, &plain_opts(), None, &mut intron_len);
    assert_eq!(end, 190);
    assert_eq!(intron_len, 50);
}
