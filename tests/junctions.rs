//! Junction extraction and mate pairing for co-occurrence output.

mod common;

use common::{header_view, record_from_sam};
use depthwalk::{scan_cigar, JunctionAssembler};
use rust_htslib::bam::Record;

// ── helpers ──────────────────────────────────────────────────────────────────

fn process(jx: &mut JunctionAssembler, rec: &Record, tid_name: &str) -> String {
    let scan = scan_cigar(&rec.cigar(), true);
    let mut out: Vec<u8> = Vec::new();
    jx.process(rec, &scan, tid_name, &mut out).expect("process");
    String::from_utf8(out).unwrap()
}

// ── tests ────────────────────────────────────────────────────────────────────

/// The walker reports record-relative intron offsets and rebuilds the
/// textual CIGAR in the same pass.
#[test]
fn scan_collects_introns() {
    let hv = header_view(&[("chr0", 10000)]);
    let rec = record_from_sam(&hv, "r1\t0\tchr0\t501\t60\t30M100N30M\t*\t0\t0\t*\t*");
    let scan = scan_cigar(&rec.cigar(), true);
    assert_eq!(scan.introns, vec![(30, 130)]);
    assert_eq!(scan.text, "30M100N30M");
    assert_eq!(scan.mapped_len, 60);
    assert_eq!(scan.ref_len, 160);

    // Round trip: re-parsing the rebuilt text yields the original ops.
    let reparsed = rust_htslib::bam::record::CigarString::try_from(scan.text.as_bytes())
        .expect("reparse");
    assert_eq!(
        reparsed.iter().collect::<Vec<_>>(),
        rec.cigar().iter().collect::<Vec<_>>()
    );
}

/// An unpaired read needs at least two introns to emit, and the line carries
/// 1-based absolute intron coordinates.
#[test]
fn unpaired_two_introns_emit() {
    let hv = header_view(&[("chr0", 10000)]);
    let mut jx = JunctionAssembler::new();

    // One intron: silent.
    let single = record_from_sam(&hv, "r1\t0\tchr0\t501\t60\t30M100N30M\t*\t0\t0\t*\t*");
    assert!(process(&mut jx, &single, "chr0").is_empty());

    // Two introns: one line.
    let double = record_from_sam(&hv, "r2\t0\tchr0\t101\t60\t10M50N10M60N10M\t*\t0\t0\t*\t*");
    let out = process(&mut jx, &double, "chr0");
    assert_eq!(
        out,
        "chr0\t101\t0\t0\t10M50N10M60N10M\t111-160,171-230\n"
    );
}

/// Paired mates each carrying one intron emit a joint line once the second
/// mate arrives.
#[test]
fn paired_single_introns_join() {
    let hv = header_view(&[("chr0", 10000)]);
    let mut jx = JunctionAssembler::new();

    let first = record_from_sam(&hv, "p1\t99\tchr0\t101\t60\t10M50N10M\t=\t401\t370\t*\t*");
    assert!(process(&mut jx, &first, "chr0").is_empty());

    let second = record_from_sam(&hv, "p1\t147\tchr0\t401\t60\t10M30N10M\t=\t101\t-370\t*\t*");
    let out = process(&mut jx, &second, "chr0");
    assert_eq!(
        out,
        "chr0\t101\t0\t370\t10M50N10M\t111-160\tchr0\t401\t1\t-370\t10M30N10M\t411-440\n"
    );
}

/// A second mate with no buffered partner and a single intron stays silent.
#[test]
fn second_mate_alone_is_silent() {
    let hv = header_view(&[("chr0", 10000)]);
    let mut jx = JunctionAssembler::new();
    let second = record_from_sam(&hv, "p9\t147\tchr0\t401\t60\t10M30N10M\t=\t101\t-370\t*\t*");
    assert!(process(&mut jx, &second, "chr0").is_empty());
}

/// Clearing the assembler (contig boundary) drops buffered first mates.
#[test]
fn clear_drops_pending_pairs() {
    let hv = header_view(&[("chr0", 10000)]);
    let mut jx = JunctionAssembler::new();
    let first = record_from_sam(&hv, "p1\t99\tchr0\t101\t60\t10M50N10M\t=\t401\t370\t*\t*");
    assert!(process(&mut jx, &first, "chr0").is_empty());
    jx.clear();
    let second = record_from_sam(&hv, "p1\t147\tchr0\t401\t60\t10M30N10M\t=\t101\t-370\t*\t*");
    assert!(process(&mut jx, &second, "chr0").is_empty());
}

/// A second mate with two introns emits even when its partner had none.
#[test]
fn second_mate_two_introns_emits_alone() {
    let hv = header_view(&[("chr0", 10000)]);
    let mut jx = JunctionAssembler::new();
    let second = record_from_sam(
        &hv,
        "p2\t147\tchr0\t201\t60\t10M20N10M30N10M\t=\t101\t-200\t*\t*",
    );
    let out = process(&mut jx, &second, "chr0");
    assert_eq!(out, "chr0\t201\t1\t-200\t10M20N10M30N10M\t211-230,241-270\n");
}
