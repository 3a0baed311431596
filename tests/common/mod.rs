//! Shared helpers for building synthetic alignment records against an
//! in-memory header.

use rust_htslib::bam::header::HeaderRecord;
use rust_htslib::bam::{Header, HeaderView, Record};

/// Build a header view for the given `(name, length)` contigs.
pub fn header_view(contigs: &[(&str, usize)]) -> HeaderView {
    let mut header = Header::new();
    for (name, len) in contigs {
        let mut rec = HeaderRecord::new(b"SQ");
        rec.push_tag(b"SN", name);
        rec.push_tag(b"LN", len);
        header.push_record(&rec);
    }
    HeaderView::from_header(&header)
}

/// Parse one SAM line into a record.
pub fn record_from_sam(hv: &HeaderView, sam: &str) -> Record {
    Record::from_sam(hv, sam.as_bytes()).expect("valid SAM line")
}
