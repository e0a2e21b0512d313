//! Structural diff of observations.
//!
//! Observations are projected to `serde_json::Value` trees and walked in
//! parallel. Every leaf that differs, and every field or sequence element
//! present on only one side, becomes a [`Discrepancy`] carrying its
//! [`FieldPath`]. Rendering a diff for humans goes through optional
//! [`FieldComparator`] plugins so that fields like image buffers can be
//! described in domain terms instead of as two opaque strings.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

/// One step of a path into an observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(String),
    Index(usize),
    /// Any sequence index. Produced by anonymization.
    AnyIndex,
}

/// Path of a field inside an observation, e.g. `observation.raw_data.units[3].health`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.0.push(PathSegment::Field(name.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    /// Path without its last segment.
    pub fn parent(&self) -> Option<FieldPath> {
        if self.0.is_empty() {
            None
        } else {
            Some(FieldPath(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Name of the last segment, if it is a field.
    pub fn last_field(&self) -> Option<&str> {
        match self.0.last() {
            Some(PathSegment::Field(name)) => Some(name),
            _ => None,
        }
    }

    /// Same path with every sequence index replaced by `[*]`, so that
    /// `units[3].health` and `units[7].health` compare equal.
    pub fn with_anonymous_array_indices(&self) -> FieldPath {
        FieldPath(
            self.0
                .iter()
                .map(|seg| match seg {
                    PathSegment::Index(_) => PathSegment::AnyIndex,
                    other => other.clone(),
                })
                .collect(),
        )
    }

    /// Look the path up in a value tree. `[*]` never resolves.
    pub fn resolve<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        self.0.iter().try_fold(root, |node, seg| match seg {
            PathSegment::Field(name) => node.get(name.as_str()),
            PathSegment::Index(i) => node.get(*i),
            PathSegment::AnyIndex => None,
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                PathSegment::Field(name) if i == 0 => write!(f, "{}", name)?,
                PathSegment::Field(name) => write!(f, ".{}", name)?,
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
                PathSegment::AnyIndex => write!(f, "[*]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid field path {path:?}: {reason}")]
pub struct ParsePathError {
    pub path: String,
    pub reason: &'static str,
}

impl FromStr for FieldPath {
    type Err = ParsePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParsePathError {
            path: s.to_string(),
            reason,
        };
        let mut segments = Vec::new();
        let mut rest = s;

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('[') {
                let end = after.find(']').ok_or_else(|| err("unclosed '['"))?;
                let inner = &after[..end];
                if inner == "*" {
                    segments.push(PathSegment::AnyIndex);
                } else {
                    let idx = inner.parse().map_err(|_| err("index is not a number"))?;
                    segments.push(PathSegment::Index(idx));
                }
                rest = &after[end + 1..];
            } else {
                if !segments.is_empty() {
                    rest = rest.strip_prefix('.').ok_or_else(|| err("expected '.' or '['"))?;
                }
                let end = rest.find(['.', '[']).unwrap_or(rest.len());
                if end == 0 {
                    return Err(err("empty field name"));
                }
                segments.push(PathSegment::Field(rest[..end].to_string()));
                rest = &rest[end..];
            }
        }

        Ok(FieldPath(segments))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Present on both sides with different values.
    Changed,
    /// Only present in the peer.
    Added,
    /// Only present in the reference.
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub path: FieldPath,
    pub kind: ChangeKind,
}

/// Decides how a changed field is described in a report.
pub trait FieldComparator {
    fn name(&self) -> &str;

    /// Describe the change at `path` given both full trees, or `None` to
    /// leave the field to the default rendering.
    fn describe(&self, path: &FieldPath, reference: &Value, peer: &Value) -> Option<String>;
}

/// Differences between a reference observation and a peer observation.
#[derive(Debug, Clone)]
pub struct DiffResult {
    reference: Value,
    peer: Value,
    discrepancies: Vec<Discrepancy>,
}

impl DiffResult {
    /// A diff made of the given discrepancies, without backing values.
    pub fn from_discrepancies(discrepancies: Vec<Discrepancy>) -> Self {
        Self {
            reference: Value::Null,
            peer: Value::Null,
            discrepancies,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.discrepancies.len()
    }

    /// Paths of every discrepancy, in tree order.
    pub fn all_diffs(&self) -> impl Iterator<Item = &FieldPath> {
        self.discrepancies.iter().map(|d| &d.path)
    }

    /// Human-readable report, one line per discrepancy. Values longer than
    /// `truncate_to` characters are cut; 0 disables truncation.
    pub fn report(&self, comparators: &[&dyn FieldComparator], truncate_to: usize) -> String {
        let mut lines = Vec::with_capacity(self.discrepancies.len());
        for d in &self.discrepancies {
            let line = match d.kind {
                ChangeKind::Added => format!("Added {}.", d.path),
                ChangeKind::Removed => format!("Removed {}.", d.path),
                ChangeKind::Changed => comparators
                    .iter()
                    .find_map(|c| {
                        let line = c.describe(&d.path, &self.reference, &self.peer)?;
                        trace!(comparator = c.name(), path = %d.path, "custom description");
                        Some(line)
                    })
                    .unwrap_or_else(|| {
                        format!(
                            "Changed {}: {} -> {}.",
                            d.path,
                            render_value(d.path.resolve(&self.reference), truncate_to),
                            render_value(d.path.resolve(&self.peer), truncate_to),
                        )
                    }),
            };
            lines.push(line);
        }
        lines.join("\n")
    }
}

fn render_value(value: Option<&Value>, truncate_to: usize) -> String {
    let text = match value {
        Some(v) => v.to_string(),
        None => "<missing>".to_string(),
    };
    truncate(text, truncate_to)
}

fn truncate(text: String, truncate_to: usize) -> String {
    if truncate_to == 0 || text.chars().count() <= truncate_to {
        return text;
    }
    let mut cut: String = text.chars().take(truncate_to).collect();
    cut.push_str("...");
    cut
}

/// Compare two observations field by field.
pub fn compute_diff<T: Serialize>(reference: &T, peer: &T) -> Result<DiffResult, serde_json::Error> {
    let reference = serde_json::to_value(reference)?;
    let peer = serde_json::to_value(peer)?;
    Ok(compute_value_diff(reference, peer))
}

/// Compare two already projected value trees.
pub fn compute_value_diff(reference: Value, peer: Value) -> DiffResult {
    let mut discrepancies = Vec::new();
    walk(&mut Vec::new(), &reference, &peer, &mut discrepancies);
    DiffResult {
        reference,
        peer,
        discrepancies,
    }
}

fn walk(path: &mut Vec<PathSegment>, a: &Value, b: &Value, out: &mut Vec<Discrepancy>) {
    match (a, b) {
        (Value::Object(ma), Value::Object(mb)) => {
            for (key, va) in ma {
                path.push(PathSegment::Field(key.clone()));
                match mb.get(key) {
                    Some(vb) => walk(path, va, vb, out),
                    None => out.push(discrepancy(path, ChangeKind::Removed)),
                }
                path.pop();
            }
            for key in mb.keys().filter(|k| !ma.contains_key(*k)) {
                path.push(PathSegment::Field(key.clone()));
                out.push(discrepancy(path, ChangeKind::Added));
                path.pop();
            }
        }
        (Value::Array(xa), Value::Array(xb)) => {
            for i in 0..xa.len().max(xb.len()) {
                path.push(PathSegment::Index(i));
                match (xa.get(i), xb.get(i)) {
                    (Some(va), Some(vb)) => walk(path, va, vb, out),
                    (Some(_), None) => out.push(discrepancy(path, ChangeKind::Removed)),
                    (None, Some(_)) => out.push(discrepancy(path, ChangeKind::Added)),
                    (None, None) => {}
                }
                path.pop();
            }
        }
        _ => {
            if a != b {
                out.push(discrepancy(path, ChangeKind::Changed));
            }
        }
    }
}

fn discrepancy(path: &[PathSegment], kind: ChangeKind) -> Discrepancy {
    Discrepancy {
        path: FieldPath(path.to_vec()),
        kind,
    }
}

/// Describes changed image buffers by the number of differing pixels.
///
/// Applies to any `data` field whose parent object carries `bits_per_pixel`
/// and `size`, with `data` encoded as hex.
#[derive(Debug, Clone, Copy)]
pub struct ImageDifferencer {
    /// Maximum number of pixel coordinates listed.
    pub max_listed: usize,
}

impl Default for ImageDifferencer {
    fn default() -> Self {
        Self { max_listed: 10 }
    }
}

struct DecodedImage {
    bits_per_pixel: u64,
    width: u64,
    height: u64,
    data: Vec<u8>,
}

impl DecodedImage {
    fn from_tree(path: &FieldPath, root: &Value) -> Option<Self> {
        let image = path.parent()?.resolve(root)?;
        let size = image.get("size")?;
        Some(Self {
            bits_per_pixel: image.get("bits_per_pixel")?.as_u64()?,
            width: size.get("x")?.as_u64()?,
            height: size.get("y")?.as_u64()?,
            data: hex::decode(path.resolve(root)?.as_str()?).ok()?,
        })
    }

    /// Pixels the buffer actually holds, whatever the declared size.
    fn pixels_present(&self) -> u64 {
        let bytes = self.data.len() as u64;
        match self.bits_per_pixel {
            1 => bytes * 8,
            bpp if bpp % 8 == 0 && bpp > 0 => bytes / (bpp / 8),
            _ => 0,
        }
    }

    fn pixel(&self, index: u64) -> Option<u64> {
        match self.bits_per_pixel {
            1 => {
                let byte = self.data.get((index / 8) as usize)?;
                Some(u64::from((byte >> (7 - index % 8)) & 1))
            }
            bpp if bpp % 8 == 0 && bpp > 0 => {
                let width = (bpp / 8) as usize;
                let start = index as usize * width;
                let bytes = self.data.get(start..start + width)?;
                Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
            }
            _ => None,
        }
    }
}

impl FieldComparator for ImageDifferencer {
    fn name(&self) -> &str {
        "image_differencer"
    }

    fn describe(&self, path: &FieldPath, reference: &Value, peer: &Value) -> Option<String> {
        if path.last_field() != Some("data") {
            return None;
        }
        let a = DecodedImage::from_tree(path, reference)?;
        let b = DecodedImage::from_tree(path, peer)?;

        if (a.width, a.height, a.bits_per_pixel) != (b.width, b.height, b.bits_per_pixel) {
            return Some(format!(
                "{}: image shape changed {}x{}@{}bpp -> {}x{}@{}bpp.",
                path, a.width, a.height, a.bits_per_pixel, b.width, b.height, b.bits_per_pixel
            ));
        }

        let mut changed = 0usize;
        let mut listed = Vec::new();
        // Past both buffers every pixel reads as missing on both sides.
        let total = a
            .width
            .saturating_mul(a.height)
            .min(a.pixels_present().max(b.pixels_present()));
        for idx in 0..total {
            let (pa, pb) = (a.pixel(idx), b.pixel(idx));
            if pa != pb {
                changed += 1;
                if listed.len() < self.max_listed {
                    listed.push(format!(
                        "({}, {}): {} -> {}",
                        idx % a.width,
                        idx / a.width,
                        pa.map_or("?".to_string(), |v| v.to_string()),
                        pb.map_or("?".to_string(), |v| v.to_string())
                    ));
                }
            }
        }

        let more = if changed > listed.len() { ", ..." } else { "" };
        Some(format!(
            "{}: {} element(s) changed - [{}{}]",
            path,
            changed,
            listed.join(", "),
            more
        ))
    }
}
