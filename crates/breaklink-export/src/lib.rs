//! Pure format serializers for breaklink results (sans-IO).
//!
//! Functions here take in-memory fragments and connection results and
//! return strings. Writing them anywhere is up to the caller.

pub mod svg;

pub use svg::{ExportError, SvgMetadata, build_path_data, report_to_svg, to_svg};
