//! SVG export serializer.
//!
//! Draws fragments, the connectors of a connected string and validation
//! defect markers in plan view using the [`svg`] crate for document
//! construction, XML escaping, and path data formatting.
//!
//! Survey coordinates have northing increasing upward, so every drawing
//! group is wrapped in a `scale(1,-1)` transform and the `viewBox` is
//! flipped to match. Path data therefore carries the input coordinates
//! unchanged. Elevation is not drawn.
//!
//! This is a pure function with no I/O -- it returns a `String`.

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Circle, Description, Element, Group, Path, Title};
use svg::node::{Node, Text, Value};

use breaklink::{ConnectError, ConnectOutcome, ConnectReport, ConnectedString, Fragment, Point, ValidationError};

/// Margin around the drawing, as a fraction of its larger extent.
const MARGIN_RATIO: f64 = 0.05;
/// Defect marker radius, as a fraction of the larger extent.
const MARKER_RATIO: f64 = 0.01;

const FRAGMENT_STROKE: &str = "black";
const CONNECTOR_STROKE: &str = "#D55E00";
const CLOSING_STROKE: &str = "#0072B2";
const DEFECT_FILL: &str = "#CC0000";

/// Errors from SVG export.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The connected string does not match the fragments it was drawn
    /// with.
    #[error("connected string does not match the fragments: {0}")]
    Mismatch(#[from] ConnectError),
}

/// Metadata to embed in the SVG document.
///
/// All fields are optional. Text values are XML-escaped automatically by
/// the `svg` crate.
#[derive(Debug, Clone, Default)]
pub struct SvgMetadata<'a> {
    /// Document title, emitted as `<title>`.
    pub title: Option<&'a str>,

    /// Document description, emitted as `<desc>`.
    pub description: Option<&'a str>,

    /// Serialized connection configuration, emitted inside a
    /// `<metadata>` element wrapped in a namespaced
    /// `<breaklink:config>` element.
    pub config_json: Option<&'a str>,
}

/// Build an SVG path `d` attribute string from plan-view points.
///
/// Uses `M` for the first point and `L` for subsequent points.
/// Returns an empty string for fewer than 2 points.
///
/// # Examples
///
/// ```
/// use breaklink::Point;
/// use breaklink_export::build_path_data;
///
/// let d = build_path_data(&[Point::planar(10.0, 20.0), Point::planar(30.0, 40.0)]);
/// assert_eq!(d, "M10,20 L30,40");
/// ```
#[must_use]
pub fn build_path_data(points: &[Point]) -> String {
    let [first, rest @ ..] = points else {
        return String::new();
    };
    if rest.is_empty() {
        return String::new();
    }

    let mut data = Data::new().move_to((first.x, first.y));
    for p in rest {
        data = data.line_to((p.x, p.y));
    }
    String::from(Value::from(data))
}

/// Plan-view bounding box of every fragment point and defect location.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Bounds {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl Bounds {
    fn of(points: impl IntoIterator<Item = Point>) -> Option<Self> {
        points.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => Self {
                    min_x: p.x,
                    min_y: p.y,
                    max_x: p.x,
                    max_y: p.y,
                },
                Some(b) => Self {
                    min_x: b.min_x.min(p.x),
                    min_y: b.min_y.min(p.y),
                    max_x: b.max_x.max(p.x),
                    max_y: b.max_y.max(p.y),
                },
            })
        })
    }

    /// Larger side, or `1.0` when every point coincides.
    fn extent(&self) -> f64 {
        let extent = (self.max_x - self.min_x).max(self.max_y - self.min_y);
        if extent > 0.0 { extent } else { 1.0 }
    }

    /// `viewBox` in flipped coordinates: `(x, -max_y, width, height)`.
    fn view_box(&self) -> (f64, f64, f64, f64) {
        let margin = self.extent() * MARGIN_RATIO;
        (
            self.min_x - margin,
            -self.max_y - margin,
            (self.max_x - self.min_x) + 2.0 * margin,
            (self.max_y - self.min_y) + 2.0 * margin,
        )
    }
}

/// A group in the flipped plan-view frame.
fn plan_group(id: &str) -> Group {
    Group::new()
        .set("id", id)
        .set("transform", "scale(1,-1)")
        .set("fill", "none")
        .set("stroke-linecap", "round")
        .set("stroke-linejoin", "round")
}

fn stroke_path(d: String, stroke: &str) -> Path {
    Path::new()
        .set("d", d)
        .set("stroke", stroke)
        .set("stroke-width", 1)
        .set("vector-effect", "non-scaling-stroke")
}

/// Serialize fragments, an optional connected string and defects into a
/// plan-view SVG document.
///
/// Fragments are drawn in black, one `<path>` each (fragments with fewer
/// than 2 points are skipped). Connectors of `connected` go in a
/// `connectors` group; zero-length connectors are omitted. When the
/// string can close, the closing connector is drawn dashed in its own
/// group. Each defect becomes a filled circle at its location with its
/// message as a `<title>`.
///
/// # Errors
///
/// Returns [`ExportError::Mismatch`] if `connected` references fragments
/// missing from `fragments`.
pub fn to_svg(
    fragments: &[Fragment],
    connected: Option<&ConnectedString>,
    defects: &[ValidationError],
    metadata: &SvgMetadata<'_>,
) -> Result<String, ExportError> {
    let bounds = Bounds::of(
        fragments
            .iter()
            .flat_map(|f| f.points().iter().copied())
            .chain(defects.iter().map(ValidationError::location)),
    );

    let mut doc = Document::new().set("preserveAspectRatio", "xMidYMid meet");
    doc = match bounds {
        Some(b) => doc.set("viewBox", b.view_box()),
        None => doc.set("viewBox", (0, 0, 1, 1)),
    };

    if let Some(title) = metadata.title {
        doc = doc.add(Title::new(title));
    }

    if let Some(description) = metadata.description {
        doc = doc.add(Description::new().add(Text::new(description)));
    }

    if let Some(config_json) = metadata.config_json {
        let mut config_el = Element::new("breaklink:config");
        config_el.assign("xmlns:breaklink", "https://github.com/breaklink/breaklink/ns/1");
        config_el.append(Text::new(config_json));
        let mut metadata_el = Element::new("metadata");
        metadata_el.append(config_el);
        doc = doc.add(metadata_el);
    }

    let mut fragment_group = plan_group("fragments");
    for (index, fragment) in fragments.iter().enumerate() {
        let d = build_path_data(fragment.points());
        if d.is_empty() {
            continue;
        }
        fragment_group = fragment_group.add(stroke_path(d, FRAGMENT_STROKE).set("data-fragment", index));
    }
    doc = doc.add(fragment_group);

    if let Some(string) = connected {
        let mut connector_group = plan_group("connectors");
        for [from, to] in string.connectors(fragments)? {
            if from.same_position(to) {
                continue;
            }
            connector_group = connector_group.add(stroke_path(build_path_data(&[from, to]), CONNECTOR_STROKE));
        }
        doc = doc.add(connector_group);

        if let Some([from, to]) = string.closing_connector(fragments)?
            && !from.same_position(to)
        {
            let closing = stroke_path(build_path_data(&[from, to]), CLOSING_STROKE).set("stroke-dasharray", "4 2");
            doc = doc.add(plan_group("closing").add(closing));
        }
    }

    if !defects.is_empty() {
        let radius = bounds.map_or(1.0, |b| b.extent()) * MARKER_RATIO;
        let mut defect_group = plan_group("defects");
        for defect in defects {
            let at = defect.location();
            let marker = Circle::new()
                .set("cx", at.x)
                .set("cy", at.y)
                .set("r", radius)
                .set("fill", DEFECT_FILL)
                .set("opacity", 0.8)
                .set("data-kind", defect.kind().to_string())
                .add(Title::new(defect.to_string()));
            defect_group = defect_group.add(marker);
        }
        doc = doc.add(defect_group);
    }

    // The svg crate omits the XML declaration, so we prepend it.
    Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n"))
}

/// Serialize a [`ConnectReport`] produced from `fragments`.
///
/// # Errors
///
/// As [`to_svg`].
pub fn report_to_svg(
    fragments: &[Fragment],
    report: &ConnectReport,
    metadata: &SvgMetadata<'_>,
) -> Result<String, ExportError> {
    let connected = report.outcome.as_ref().and_then(ConnectOutcome::connected);
    to_svg(fragments, connected, &report.defects, metadata)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use breaklink::{ConnectConfig, ConnectedStringEntry, process};

    use super::*;

    fn no_meta() -> SvgMetadata<'static> {
        SvgMetadata::default()
    }

    fn rungs() -> Vec<Fragment> {
        vec![
            Fragment::from_xy(&[(0.0, 0.0), (0.0, 2.0)]),
            Fragment::from_xy(&[(1.0, 2.0), (1.0, 0.0)]),
        ]
    }

    fn entry(fragment: usize, reversed: bool) -> ConnectedStringEntry {
        ConnectedStringEntry { fragment, reversed }
    }

    // --- build_path_data ---

    #[test]
    fn build_path_data_too_few_points() {
        assert_eq!(build_path_data(&[]), "");
        assert_eq!(build_path_data(&[Point::planar(5.0, 5.0)]), "");
    }

    #[test]
    fn build_path_data_three_points() {
        let d = build_path_data(&[
            Point::planar(10.0, 15.0),
            Point::new(12.5, 18.3, 99.0),
            Point::planar(14.0, 20.1),
        ]);
        assert_eq!(d, "M10,15 L12.5,18.3 L14,20.1");
    }

    // --- bounds ---

    #[test]
    fn view_box_is_flipped_with_margin() {
        let b = Bounds::of([Point::planar(0.0, 0.0), Point::planar(10.0, 20.0)]).unwrap();
        let (x, y, w, h) = b.view_box();
        assert!((x - -1.0).abs() < 1e-12);
        assert!((y - -21.0).abs() < 1e-12);
        assert!((w - 12.0).abs() < 1e-12);
        assert!((h - 22.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_bounds_have_unit_extent() {
        let b = Bounds::of([Point::planar(3.0, 3.0)]).unwrap();
        assert!((b.extent() - 1.0).abs() < f64::EPSILON);
        assert_eq!(Bounds::of(std::iter::empty()), None);
    }

    // --- documents ---

    #[test]
    fn empty_input_is_a_valid_document() {
        let svg = to_svg(&[], None, &[], &no_meta()).unwrap();
        assert!(svg.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(svg.contains(r#"viewBox="0 0 1 1""#));
        assert!(!svg.contains("<path"));
    }

    #[test]
    fn fragments_only() {
        let svg = to_svg(&rungs(), None, &[], &no_meta()).unwrap();
        assert!(svg.contains(r#"id="fragments""#));
        assert!(svg.contains(r#"d="M0,0 L0,2""#));
        assert!(svg.contains(r#"d="M1,2 L1,0""#));
        assert!(svg.contains(r#"transform="scale(1,-1)""#));
        assert!(!svg.contains(r#"id="connectors""#));
        assert!(!svg.contains("<circle"));
    }

    #[test]
    fn connectors_and_closing_are_drawn() {
        let string = ConnectedString {
            entries: vec![entry(0, false), entry(1, false)],
            total_length: 5.0,
            can_close: true,
        };
        let svg = to_svg(&rungs(), Some(&string), &[], &no_meta()).unwrap();
        assert!(svg.contains(r#"id="connectors""#));
        assert!(svg.contains(r#"d="M0,2 L1,2""#));
        assert!(svg.contains(r#"id="closing""#));
        assert!(svg.contains(r#"d="M1,0 L0,0""#));
        assert!(svg.contains("stroke-dasharray"));
    }

    #[test]
    fn zero_length_connectors_are_omitted() {
        let fragments = vec![
            Fragment::from_xy(&[(0.0, 0.0), (1.0, 0.0)]),
            Fragment::from_xy(&[(1.0, 0.0), (2.0, 0.0)]),
        ];
        let string = ConnectedString {
            entries: vec![entry(0, false), entry(1, false)],
            total_length: 2.0,
            can_close: false,
        };
        let svg = to_svg(&fragments, Some(&string), &[], &no_meta()).unwrap();
        assert!(svg.contains(r#"id="connectors""#));
        assert_eq!(svg.matches("<path").count(), 2);
        assert!(!svg.contains(r#"id="closing""#));
    }

    #[test]
    fn mismatched_string_is_an_error() {
        let string = ConnectedString {
            entries: vec![entry(0, false), entry(7, false)],
            total_length: 0.0,
            can_close: false,
        };
        assert!(matches!(
            to_svg(&rungs(), Some(&string), &[], &no_meta()),
            Err(ExportError::Mismatch(_))
        ));
    }

    #[test]
    fn defects_become_titled_markers() {
        let fragments = vec![
            Fragment::from_xy(&[(0.0, 0.0), (2.0, 2.0)]),
            Fragment::from_xy(&[(0.0, 2.0), (2.0, 0.0)]),
        ];
        let report = process(&fragments, &ConnectConfig::default()).unwrap();
        assert_eq!(report.defects.len(), 1);
        let svg = report_to_svg(&fragments, &report, &no_meta()).unwrap();
        assert!(svg.contains(r#"id="defects""#));
        assert_eq!(svg.matches("<circle").count(), 1);
        assert!(svg.contains(r#"data-kind="intersecting""#));
        assert!(!svg.contains(r#"id="connectors""#));
    }

    #[test]
    fn metadata_is_embedded_and_escaped() {
        let meta = SvgMetadata {
            title: Some("site <A>"),
            description: Some("snap=0.001"),
            config_json: Some(r#"{"snap_tolerance":0.001}"#),
        };
        let svg = to_svg(&rungs(), None, &[], &meta).unwrap();
        assert!(svg.contains("<title>site &lt;A&gt;</title>"));
        assert!(svg.contains("<desc>"));
        assert!(svg.contains("snap=0.001"));
        assert!(svg.contains("<metadata>"));
        assert!(svg.contains("<breaklink:config"));
    }

    #[test]
    fn report_with_connection_draws_connectors() {
        let report = process(&rungs(), &ConnectConfig::default()).unwrap();
        let svg = report_to_svg(&rungs(), &report, &no_meta()).unwrap();
        assert!(svg.contains(r#"id="connectors""#));
        assert!(!svg.contains(r#"id="defects""#));
    }
}
