//! DrawingML fragments for native charts and tables.
//!
//! Charts carry their data as literal caches (`c:strLit` / `c:numLit`)
//! rather than an embedded workbook: PowerPoint and LibreOffice both render
//! them, and the package stays free of binary parts we would have to build.

use crate::slidespec::{ChartPayload, TablePayload};
use crate::template::{Frame, TableConfig, EMU_PER_INCH};
use once_cell::sync::Lazy;
use regex::Regex;

const NS_CHART: &str = "http://schemas.openxmlformats.org/drawingml/2006/chart";
const NS_TABLE: &str = "http://schemas.openxmlformats.org/drawingml/2006/table";

pub const DEFAULT_HEADER_FILL: &str = "1E40AF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    /// Clustered column.
    Bar,
    Pie,
}

pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

// ── Charts ───────────────────────────────────────────────────────────────

/// A complete `ppt/charts/chartN.xml` part.
pub fn chart_part(kind: ChartKind, payload: &ChartPayload, title: Option<&str>) -> String {
    let series = chart_series(payload, title.unwrap_or("Series 1"));
    let title_xml = match title {
        Some(t) => format!(
            r#"<c:title><c:tx><c:rich><a:bodyPr/><a:lstStyle/><a:p><a:r><a:t>{}</a:t></a:r></a:p></c:rich></c:tx><c:overlay val="0"/></c:title><c:autoTitleDeleted val="0"/>"#,
            escape_xml(t)
        ),
        None => r#"<c:autoTitleDeleted val="1"/>"#.to_string(),
    };
    let plot = match kind {
        ChartKind::Bar => format!(
            concat!(
                r#"<c:barChart><c:barDir val="col"/><c:grouping val="clustered"/><c:varyColors val="0"/>{}"#,
                r#"<c:gapWidth val="150"/><c:axId val="5001"/><c:axId val="5002"/></c:barChart>"#,
                r#"<c:catAx><c:axId val="5001"/><c:scaling><c:orientation val="minMax"/></c:scaling><c:delete val="0"/><c:axPos val="b"/><c:crossAx val="5002"/></c:catAx>"#,
                r#"<c:valAx><c:axId val="5002"/><c:scaling><c:orientation val="minMax"/></c:scaling><c:delete val="0"/><c:axPos val="l"/><c:majorGridlines/><c:crossAx val="5001"/></c:valAx>"#
            ),
            series
        ),
        ChartKind::Pie => format!(
            r#"<c:pieChart><c:varyColors val="1"/>{series}<c:firstSliceAng val="0"/></c:pieChart>"#
        ),
    };
    let legend = match kind {
        ChartKind::Bar => "",
        ChartKind::Pie => r#"<c:legend><c:legendPos val="r"/><c:overlay val="0"/></c:legend>"#,
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<c:chartSpace xmlns:c="{NS_CHART}" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><c:roundedCorners val="0"/><c:chart>{title_xml}<c:plotArea><c:layout/>{plot}</c:plotArea>{legend}<c:plotVisOnly val="1"/></c:chart></c:chartSpace>"#
    )
}

fn chart_series(payload: &ChartPayload, name: &str) -> String {
    let n = payload.categories.len();
    let cats: String = payload
        .categories
        .iter()
        .enumerate()
        .map(|(i, c)| format!(r#"<c:pt idx="{i}"><c:v>{}</c:v></c:pt>"#, escape_xml(c)))
        .collect();
    let vals: String = payload
        .values
        .iter()
        .enumerate()
        .map(|(i, v)| format!(r#"<c:pt idx="{i}"><c:v>{v}</c:v></c:pt>"#))
        .collect();
    format!(
        concat!(
            r#"<c:ser><c:idx val="0"/><c:order val="0"/><c:tx><c:v>{name}</c:v></c:tx>"#,
            r#"<c:cat><c:strLit><c:ptCount val="{n}"/>{cats}</c:strLit></c:cat>"#,
            r#"<c:val><c:numLit><c:formatCode>General</c:formatCode><c:ptCount val="{n}"/>{vals}</c:numLit></c:val></c:ser>"#
        ),
        name = escape_xml(name),
        n = n,
        cats = cats,
        vals = vals
    )
}

/// The slide-side frame that points at a chart part through `rel_id`.
pub fn chart_frame(shape_id: u32, rel_id: &str, frame: &Frame) -> String {
    format!(
        r#"<p:graphicFrame><p:nvGraphicFramePr><p:cNvPr id="{shape_id}" name="Chart {shape_id}"/><p:cNvGraphicFramePr/><p:nvPr/></p:nvGraphicFramePr>{}<a:graphic><a:graphicData uri="{NS_CHART}"><c:chart xmlns:c="{NS_CHART}" r:id="{rel_id}"/></a:graphicData></a:graphic></p:graphicFrame>"#,
        xfrm(frame)
    )
}

// ── Tables ───────────────────────────────────────────────────────────────

/// A native table: one header row plus at most `config.max_rows` body rows.
pub fn table_frame(shape_id: u32, payload: &TablePayload, config: &TableConfig) -> String {
    let frame = &config.position;
    let ncols = payload.columns.len().max(1);
    let rows: Vec<&Vec<String>> = payload.rows.iter().take(config.max_rows).collect();

    let widths = column_widths(frame.width, ncols, config);
    let grid: String = widths
        .iter()
        .map(|w| format!(r#"<a:gridCol w="{w}"/>"#))
        .collect();

    let row_h = (frame.height * EMU_PER_INCH / (rows.len() + 1) as f64).round() as i64;
    let fill = config
        .header_fill
        .as_deref()
        .unwrap_or(DEFAULT_HEADER_FILL)
        .trim_start_matches('#');

    let header: String = payload
        .columns
        .iter()
        .map(|h| header_cell(h, fill))
        .collect();
    let mut body = String::new();
    for row in rows {
        body.push_str(&format!(r#"<a:tr h="{row_h}">"#));
        for col in 0..ncols {
            body.push_str(&body_cell(row.get(col).map(String::as_str).unwrap_or("")));
        }
        body.push_str("</a:tr>");
    }

    format!(
        concat!(
            r#"<p:graphicFrame><p:nvGraphicFramePr><p:cNvPr id="{id}" name="Table {id}"/><p:cNvGraphicFramePr><a:graphicFrameLocks noGrp="1"/></p:cNvGraphicFramePr><p:nvPr/></p:nvGraphicFramePr>{xfrm}"#,
            r#"<a:graphic><a:graphicData uri="{ns}"><a:tbl><a:tblPr firstRow="1" bandRow="1"/><a:tblGrid>{grid}</a:tblGrid>"#,
            r#"<a:tr h="{row_h}">{header}</a:tr>{body}</a:tbl></a:graphicData></a:graphic></p:graphicFrame>"#
        ),
        id = shape_id,
        xfrm = xfrm(frame),
        ns = NS_TABLE,
        grid = grid,
        row_h = row_h,
        header = header,
        body = body
    )
}

/// EMU widths: declared column widths first, the remainder split evenly.
fn column_widths(total_in: f64, ncols: usize, config: &TableConfig) -> Vec<i64> {
    let declared: Vec<Option<f64>> = (0..ncols)
        .map(|i| config.columns.get(i).and_then(|c| c.width))
        .collect();
    let fixed: f64 = declared.iter().flatten().sum();
    let free = declared.iter().filter(|w| w.is_none()).count();
    let share = if free > 0 {
        ((total_in - fixed).max(0.0) / free as f64).max(0.3)
    } else {
        0.0
    };
    declared
        .iter()
        .map(|w| (w.unwrap_or(share) * EMU_PER_INCH).round() as i64)
        .collect()
}

fn header_cell(text: &str, fill: &str) -> String {
    format!(
        r#"<a:tc><a:txBody><a:bodyPr/><a:lstStyle/><a:p><a:r><a:rPr lang="en-US" sz="1200" b="1"><a:solidFill><a:srgbClr val="FFFFFF"/></a:solidFill></a:rPr><a:t>{}</a:t></a:r></a:p></a:txBody><a:tcPr><a:solidFill><a:srgbClr val="{fill}"/></a:solidFill></a:tcPr></a:tc>"#,
        escape_xml(text)
    )
}

fn body_cell(text: &str) -> String {
    let para = if text.is_empty() {
        r#"<a:p><a:endParaRPr lang="en-US" sz="1100"/></a:p>"#.to_string()
    } else {
        format!(
            r#"<a:p><a:r><a:rPr lang="en-US" sz="1100"/><a:t>{}</a:t></a:r></a:p>"#,
            escape_xml(text)
        )
    };
    format!(r#"<a:tc><a:txBody><a:bodyPr/><a:lstStyle/>{para}</a:txBody><a:tcPr/></a:tc>"#)
}

fn xfrm(frame: &Frame) -> String {
    let (x, y, cx, cy) = frame.to_emu();
    format!(r#"<p:xfrm><a:off x="{x}" y="{y}"/><a:ext cx="{cx}" cy="{cy}"/></p:xfrm>"#)
}

// ── Shape tree helpers ───────────────────────────────────────────────────

static RE_SHAPE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<p:cNvPr\b[^>]*?\bid="(\d+)""#).unwrap());

/// One above the largest shape id on the slide.
pub fn next_shape_id(slide_xml: &str) -> u32 {
    RE_SHAPE_ID
        .captures_iter(slide_xml)
        .filter_map(|c| c[1].parse::<u32>().ok())
        .max()
        .unwrap_or(1)
        + 1
}

/// Append `fragment` as the last child of the slide's shape tree.
pub fn append_to_shape_tree(slide_xml: &str, fragment: &str) -> Option<String> {
    let at = slide_xml.rfind("</p:spTree>")?;
    let mut out = String::with_capacity(slide_xml.len() + fragment.len());
    out.push_str(&slide_xml[..at]);
    out.push_str(fragment);
    out.push_str(&slide_xml[at..]);
    Some(out)
}
