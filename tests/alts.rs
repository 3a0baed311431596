//! MD:Z parsing and alt-record emission: mismatches, indels, and soft clips
//! with the poly-A filter.

mod common;

use common::{header_view, record_from_sam};
use depthwalk::{parse_mdz, polya_check, AltConfig, AltEmitter, EngineError, MdzOp};

// ── helpers ──────────────────────────────────────────────────────────────────

fn emit_with_mdz(sam: &str, mdz: &str, cfg: AltConfig) -> Result<String, EngineError> {
    let hv = header_view(&[("chr0", 10000)]);
    let rec = record_from_sam(&hv, sam);
    let ops = parse_mdz(mdz)?;
    let mut emitter = AltEmitter::new(cfg);
    let mut out: Vec<u8> = Vec::new();
    emitter.emit_from_cigar_mdz(&rec, &ops, &mut out)?;
    Ok(String::from_utf8(out).unwrap())
}

fn emit_cigar_only(sam: &str, cfg: AltConfig) -> (String, u64) {
    let hv = header_view(&[("chr0", 10000)]);
    let rec = record_from_sam(&hv, sam);
    let mut emitter = AltEmitter::new(cfg);
    let mut out: Vec<u8> = Vec::new();
    emitter.emit_from_cigar(&rec, &mut out).expect("emit");
    (String::from_utf8(out).unwrap(), emitter.total_softclip_bases)
}

// ── tests ────────────────────────────────────────────────────────────────────

#[test]
fn mdz_parse_ops() {
    let ops = parse_mdz("10A5^AC3").expect("parse");
    assert_eq!(
        ops,
        vec![
            MdzOp::Match(10),
            MdzOp::Mismatch(b"A".to_vec()),
            MdzOp::Match(5),
            MdzOp::Deletion(b"AC".to_vec()),
            MdzOp::Match(3),
        ]
    );
    // Leading zero runs are dropped; "0A0" is a lone mismatch.
    let ops = parse_mdz("0A0").expect("parse");
    assert_eq!(ops, vec![MdzOp::Mismatch(b"A".to_vec())]);
    assert!(parse_mdz("5?3").is_err());
}

/// Joint CIGAR/MD:Z walk: one mismatch inside the first match block, then a
/// two-base deletion pinned by the `^AC` op.
#[test]
fn mismatch_and_deletion_records() {
    let out = emit_with_mdz(
        "r1\t0\tchr0\t1\t60\t16M2D3M\t*\t0\t0\tAAAAAAAAAATAAAAAAAA\t*",
        "10A5^AC3",
        AltConfig::default(),
    )
    .expect("emit");
    assert_eq!(out, "0,10,X,T\n0,16,D,2\n");
}

/// A length-1 mismatch reading N is suppressed unless --include-n.
#[test]
fn n_mismatches_filtered() {
    let sam = "r1\t0\tchr0\t1\t60\t10M\t*\t0\t0\tAAAAANAAAA\t*";
    let quiet = emit_with_mdz(sam, "5C4", AltConfig::default()).expect("emit");
    assert!(quiet.is_empty());

    let cfg = AltConfig {
        include_n: true,
        ..AltConfig::default()
    };
    let loud = emit_with_mdz(sam, "5C4", cfg).expect("emit");
    assert_eq!(loud, "0,5,X,N\n");
}

/// Mismatch records carry Phred+33 qualities when requested.
#[test]
fn print_qual_appends_qualities() {
    let cfg = AltConfig {
        print_qual: true,
        ..AltConfig::default()
    };
    let out = emit_with_mdz(
        "r1\t0\tchr0\t1\t60\t10M\t*\t0\t0\tAAAAATAAAA\tIIIIIIIIII",
        "5C4",
        cfg,
    )
    .expect("emit");
    assert_eq!(out, "0,5,X,T,I\n");
}

/// A CIGAR deletion whose length disagrees with MD:Z is malformed.
#[test]
fn deletion_length_mismatch_fails() {
    let err = emit_with_mdz(
        "r1\t0\tchr0\t1\t60\t16M2D3M\t*\t0\t0\tAAAAAAAAAAAAAAAAAAA\t*",
        "16^A3",
        AltConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::MalformedAuxiliary(_)));
}

/// Total ref-consuming CIGAR length must equal the span MD:Z describes.
#[test]
fn mdz_exhaustion_fails() {
    let err = emit_with_mdz(
        "r1\t0\tchr0\t1\t60\t20M\t*\t0\t0\tAAAAAAAAAAAAAAAAAAAA\t*",
        "10",
        AltConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::MalformedAuxiliary(_)));
}

/// CIGAR-only mode sees insertions, deletions, and soft clips.
#[test]
fn cigar_only_records() {
    let cfg = AltConfig {
        include_softclip: true,
        ..AltConfig::default()
    };
    let (out, clipped) = emit_cigar_only(
        "r1\t0\tchr0\t101\t60\t3S5M2I5M1D5M\t*\t0\t0\tGGGAAAAATTAAAAAAAAAA\t*",
        cfg,
    );
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        vec!["0,100,S,GGG", "0,105,I,TT", "0,110,D,1"],
    );
    assert_eq!(clipped, 3);
}

/// The poly-A filter keeps only clips dominated by A or T and reports the
/// dominant base with its count.
#[test]
fn polya_softclips() {
    assert_eq!(polya_check(b"AAAAA", 0.8), Some(('A', 5)));
    assert_eq!(polya_check(b"TTTTA", 0.8), Some(('T', 4)));
    assert_eq!(polya_check(b"ACGTA", 0.8), None);

    let cfg = AltConfig {
        include_softclip: true,
        only_polya: true,
        ..AltConfig::default()
    };
    let (out, clipped) = emit_cigar_only(
        "r1\t0\tchr0\t101\t60\t5S10M\t*\t0\t0\tAAAAACCCCCCCCCC\t*",
        cfg,
    );
    assert_eq!(out, "0,100,S,5,-,A,5\n");
    assert_eq!(clipped, 5);

    // A mixed clip is counted toward the total but not printed.
    let cfg = AltConfig {
        include_softclip: true,
        only_polya: true,
        ..AltConfig::default()
    };
    let (out, clipped) = emit_cigar_only(
        "r1\t0\tchr0\t101\t60\t10M5S\t*\t0\t0\tCCCCCCCCCCACGTA\t*",
        cfg,
    );
    assert!(out.is_empty());
    assert_eq!(clipped, 5);
}

/// Trailing soft clips report the `+` direction at the alignment end.
#[test]
fn trailing_softclip_direction() {
    let cfg = AltConfig {
        include_softclip: true,
        only_polya: true,
        ..AltConfig::default()
    };
    let (out, _) = emit_cigar_only(
        "r1\t0\tchr0\t101\t60\t10M4S\t*\t0\t0\tCCCCCCCCCCAAAA\t*",
        cfg,
    );
    assert_eq!(out, "0,110,S,4,+,A,4\n");
}
