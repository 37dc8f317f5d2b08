//! Minimal OOXML package access for PPTX files.
//!
//! A PPTX is a ZIP of XML parts. The renderer needs only a handful of
//! operations: read and replace parts, resolve slide order, add chart parts
//! with their relationships and content types, and write the result back.
//! Parts keep their original archive order so an untouched part round-trips
//! byte-for-byte.
//!
//! Slide order comes from `ppt/presentation.xml` (`<p:sldIdLst>`), whose
//! `r:id` attributes resolve through `ppt/_rels/presentation.xml.rels`.

use crate::error::ReportError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const PRESENTATION_PART: &str = "ppt/presentation.xml";
pub const PRESENTATION_RELS: &str = "ppt/_rels/presentation.xml.rels";
pub const CONTENT_TYPES: &str = "[Content_Types].xml";

pub const REL_CHART: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/chart";
pub const CT_CHART: &str = "application/vnd.openxmlformats-officedocument.drawingml.chart+xml";

/// An opened PPTX package.
#[derive(Debug, Clone)]
pub struct Package {
    source: PathBuf,
    parts: Vec<(String, Vec<u8>)>,
}

impl Package {
    /// Read a package from disk.
    pub async fn open(path: &Path) -> Result<Self, ReportError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| corrupt(path, format!("cannot read: {e}")))?;
        Self::from_bytes(path, bytes)
    }

    /// Parse a package from memory. `source` is used in error messages.
    pub fn from_bytes(source: &Path, bytes: Vec<u8>) -> Result<Self, ReportError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| corrupt(source, format!("not a ZIP package: {e}")))?;
        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| corrupt(source, format!("entry {i}: {e}")))?;
            if file.is_dir() {
                continue;
            }
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .map_err(|e| corrupt(source, format!("{}: {e}", file.name())))?;
            parts.push((file.name().to_string(), data));
        }
        let pkg = Self {
            source: source.to_path_buf(),
            parts,
        };
        if pkg.part(PRESENTATION_PART).is_none() {
            return Err(corrupt(source, format!("missing {PRESENTATION_PART}")));
        }
        Ok(pkg)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_slice())
    }

    /// A part as UTF-8 XML. Invalid UTF-8 means a corrupt template.
    pub fn part_str(&self, name: &str) -> Result<&str, ReportError> {
        let bytes = self
            .part(name)
            .ok_or_else(|| corrupt(&self.source, format!("missing part {name}")))?;
        std::str::from_utf8(bytes).map_err(|e| corrupt(&self.source, format!("{name}: {e}")))
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.part(name).is_some()
    }

    /// Replace a part, or append it if new.
    pub fn set_part(&mut self, name: &str, data: impl Into<Vec<u8>>) {
        let data = data.into();
        match self.parts.iter_mut().find(|(n, _)| n == name) {
            Some((_, d)) => *d = data,
            None => self.parts.push((name.to_string(), data)),
        }
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|(n, _)| n.as_str())
    }

    // ── Slides ───────────────────────────────────────────────────────────

    /// Slide part names in presentation order.
    ///
    /// Falls back to `ppt/slides/slideN.xml` sorted by N when the
    /// presentation lists no slides it can resolve.
    pub fn slide_parts(&self) -> Result<Vec<String>, ReportError> {
        let presentation = self.part_str(PRESENTATION_PART)?;
        let rels = match self.part(PRESENTATION_RELS) {
            Some(_) => parse_relationships(self.part_str(PRESENTATION_RELS)?),
            None => Vec::new(),
        };

        let mut ordered = Vec::new();
        for caps in RE_SLIDE_ID.captures_iter(presentation) {
            let rid = &caps[1];
            if let Some(rel) = rels.iter().find(|r| r.id == rid) {
                let part = resolve_target("ppt", &rel.target);
                if self.has_part(&part) {
                    ordered.push(part);
                }
            }
        }
        if !ordered.is_empty() {
            return Ok(ordered);
        }

        let mut numbered: Vec<(u32, String)> = self
            .part_names()
            .filter_map(|n| {
                let num = n.strip_prefix("ppt/slides/slide")?.strip_suffix(".xml")?;
                Some((num.parse().ok()?, n.to_string()))
            })
            .collect();
        numbered.sort();
        Ok(numbered.into_iter().map(|(_, n)| n).collect())
    }

    /// Part name of the 1-indexed slide `slide_no`, if present.
    pub fn slide_part(&self, slide_no: u32) -> Result<Option<String>, ReportError> {
        let parts = self.slide_parts()?;
        Ok(slide_no
            .checked_sub(1)
            .and_then(|i| parts.get(i as usize).cloned()))
    }

    // ── Relationships and content types ──────────────────────────────────

    /// Add a relationship from `source_part` to `target_part`, creating the
    /// rels part if needed. Returns the new `rId`.
    pub fn add_relationship(
        &mut self,
        source_part: &str,
        rel_type: &str,
        target_part: &str,
    ) -> Result<String, ReportError> {
        let rels_name = rels_part_for(source_part);
        let existing = match self.part(&rels_name) {
            Some(_) => self.part_str(&rels_name)?.to_string(),
            None => EMPTY_RELS.to_string(),
        };
        let next = parse_relationships(&existing)
            .iter()
            .filter_map(|r| r.id.strip_prefix("rId")?.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let rid = format!("rId{next}");
        let target = relative_target(source_part, target_part);
        let entry = format!(r#"<Relationship Id="{rid}" Type="{rel_type}" Target="{target}"/>"#);
        let updated = insert_before_close(&existing, "</Relationships>", &entry)
            .ok_or_else(|| corrupt(&self.source, format!("{rels_name}: no </Relationships>")))?;
        self.set_part(&rels_name, updated);
        Ok(rid)
    }

    /// Register a content-type override for a new part.
    pub fn add_content_type_override(
        &mut self,
        part_name: &str,
        content_type: &str,
    ) -> Result<(), ReportError> {
        let types = self.part_str(CONTENT_TYPES)?.to_string();
        let part_attr = format!("PartName=\"/{part_name}\"");
        if types.contains(&part_attr) {
            return Ok(());
        }
        let entry = format!(r#"<Override {part_attr} ContentType="{content_type}"/>"#);
        let updated = insert_before_close(&types, "</Types>", &entry)
            .ok_or_else(|| corrupt(&self.source, format!("{CONTENT_TYPES}: no </Types>")))?;
        self.set_part(CONTENT_TYPES, updated);
        Ok(())
    }

    /// First free `ppt/charts/chartN.xml` name.
    pub fn next_chart_part(&self) -> String {
        let max = self
            .part_names()
            .filter_map(|n| n.strip_prefix("ppt/charts/chart")?.strip_suffix(".xml")?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("ppt/charts/chart{}.xml", max + 1)
    }

    // ── Output ───────────────────────────────────────────────────────────

    pub fn to_bytes(&self) -> Result<Vec<u8>, ReportError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in &self.parts {
            writer
                .start_file(name.as_str(), options)
                .map_err(|e| ReportError::Internal(format!("zip {name}: {e}")))?;
            writer
                .write_all(data)
                .map_err(|e| ReportError::Internal(format!("zip {name}: {e}")))?;
        }
        let cursor = writer
            .finish()
            .map_err(|e| ReportError::Internal(format!("zip finish: {e}")))?;
        Ok(cursor.into_inner())
    }
}

fn corrupt(path: &Path, detail: String) -> ReportError {
    ReportError::TemplateCorrupt {
        path: path.to_path_buf(),
        detail,
    }
}

const EMPTY_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"></Relationships>"#;

static RE_SLIDE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<p:sldId\b[^>]*?\br:id="([^"]+)""#).unwrap());

static RE_RELATIONSHIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<Relationship\b[^>]*>").unwrap());

static RE_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(\w+)="([^"]*)""#).unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
}

pub fn parse_relationships(xml: &str) -> Vec<Relationship> {
    RE_RELATIONSHIP
        .find_iter(xml)
        .map(|m| {
            let mut rel = Relationship {
                id: String::new(),
                rel_type: String::new(),
                target: String::new(),
            };
            for caps in RE_ATTR.captures_iter(m.as_str()) {
                match &caps[1] {
                    "Id" => rel.id = caps[2].to_string(),
                    "Type" => rel.rel_type = caps[2].to_string(),
                    "Target" => rel.target = caps[2].to_string(),
                    _ => {}
                }
            }
            rel
        })
        .collect()
}

/// `ppt/slides/slide1.xml` → `ppt/slides/_rels/slide1.xml.rels`.
pub fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolve a relationship target against the source part's directory.
pub fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(abs) = target.strip_prefix('/') {
        return abs.to_string();
    }
    let mut segs: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for seg in target.split('/') {
        match seg {
            ".." => {
                segs.pop();
            }
            "." | "" => {}
            s => segs.push(s),
        }
    }
    segs.join("/")
}

/// Target of `to` relative to the directory of `from`.
fn relative_target(from: &str, to: &str) -> String {
    let from_dir: Vec<&str> = from.split('/').collect::<Vec<_>>();
    let from_dir = &from_dir[..from_dir.len().saturating_sub(1)];
    let to_segs: Vec<&str> = to.split('/').collect();
    let common = from_dir
        .iter()
        .zip(&to_segs)
        .take_while(|(a, b)| a == b)
        .count();
    let mut out: Vec<&str> = vec![".."; from_dir.len() - common];
    out.extend(&to_segs[common..]);
    out.join("/")
}

fn insert_before_close(xml: &str, close_tag: &str, entry: &str) -> Option<String> {
    let at = xml.rfind(close_tag)?;
    let mut out = String::with_capacity(xml.len() + entry.len());
    out.push_str(&xml[..at]);
    out.push_str(entry);
    out.push_str(&xml[at..]);
    Some(out)
}

// ── Test fixtures ────────────────────────────────────────────────────────
