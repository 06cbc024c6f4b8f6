//! GEXF Interchange
//!
//! Reads and writes the subset of GEXF 1.2 needed for static graphs: node
//! and edge lists, typed node attributes, and `viz:position`.
//!
//! GEXF attribute values must be scalars. On export, node attributes are
//! normalized first: coordinate lists under `pos` become `viz:position`,
//! other lists and maps are written as JSON strings, nulls are dropped, and a column
//! holding mixed types is declared as `string`.

use sim_history::{NodeId, Value};
use std::collections::BTreeMap;
use std::io::{self, Write};
use thiserror::Error;

use super::{Attributes, Topology};

/// Attribute name holding node coordinates.
pub const POSITION_ATTRIBUTE: &str = "pos";

#[derive(Debug, Error, PartialEq)]
pub enum GexfError {
    #[error("unterminated tag at byte {0}")]
    UnterminatedTag(usize),
    #[error("malformed attribute in <{0}>")]
    MalformedAttribute(String),
    #[error("<{tag}> is missing the {attribute:?} attribute")]
    MissingAttribute { tag: String, attribute: String },
}

#[derive(Debug)]
struct Tag<'a> {
    name: &'a str,
    attributes: Vec<(&'a str, String)>,
    closing: bool,
    self_closing: bool,
}

impl Tag<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, key: &str) -> Result<&str, GexfError> {
        self.get(key).ok_or_else(|| GexfError::MissingAttribute {
            tag: self.name.to_string(),
            attribute: key.to_string(),
        })
    }
}

/// Splits a document into tags, skipping text, comments and declarations.
fn tags(text: &str) -> Result<Vec<Tag<'_>>, GexfError> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('<') {
        let start = pos + offset;
        if text[start..].starts_with("<!--") {
            let end = text[start..]
                .find("-->")
                .ok_or(GexfError::UnterminatedTag(start))?;
            pos = start + end + 3;
            continue;
        }
        let end = tag_end(text, start).ok_or(GexfError::UnterminatedTag(start))?;
        pos = end + 1;

        let inner = &text[start + 1..end];
        if inner.starts_with('?') || inner.starts_with('!') {
            continue;
        }
        let closing = inner.starts_with('/');
        let self_closing = inner.ends_with('/');
        let inner = inner.trim_start_matches('/').trim_end_matches('/').trim();
        let (name, rest) = match inner.find(char::is_whitespace) {
            Some(i) => (&inner[..i], &inner[i..]),
            None => (inner, ""),
        };
        out.push(Tag {
            name,
            attributes: parse_attributes(name, rest)?,
            closing,
            self_closing,
        });
    }
    Ok(out)
}

/// Byte offset of the `>` closing the tag opened at `start`. A `>` inside a
/// quoted attribute value does not close the tag.
fn tag_end(text: &str, start: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in text.as_bytes().iter().enumerate().skip(start + 1) {
        match (quote, b) {
            (Some(q), _) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'>') => return Some(i),
            (None, _) => {}
        }
    }
    None
}

fn parse_attributes<'a>(tag: &str, mut rest: &'a str) -> Result<Vec<(&'a str, String)>, GexfError> {
    let malformed = || GexfError::MalformedAttribute(tag.to_string());
    let mut attributes = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(attributes);
        }
        let eq = rest.find('=').ok_or_else(malformed)?;
        let key = rest[..eq].trim();
        rest = rest[eq + 1..].trim_start();
        let quote = rest.chars().next().ok_or_else(malformed)?;
        if quote != '"' && quote != '\'' {
            return Err(malformed());
        }
        let close = rest[1..].find(quote).ok_or_else(malformed)?;
        attributes.push((key, unescape(&rest[1..1 + close])));
        rest = &rest[close + 2..];
    }
}

/// Decodes the predefined entities and numeric character references.
/// Anything unrecognized is kept verbatim.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').and_then(|semi| {
            let entity = &rest[1..semi];
            let c = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "amp" => Some('&'),
                _ => {
                    let code = match entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => entity.strip_prefix('#').and_then(|dec| dec.parse().ok()),
                    };
                    code.and_then(char::from_u32)
                }
            };
            c.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn typed_value(kind: &str, raw: &str) -> Value {
    let parsed = match kind {
        "integer" | "long" => raw.parse().map(Value::Int).ok(),
        "float" | "double" => raw.parse().map(Value::Float).ok(),
        "boolean" => raw.parse().map(Value::Bool).ok(),
        _ => None,
    };
    parsed.unwrap_or_else(|| Value::Str(raw.to_string()))
}

/// Parses a GEXF document.
pub fn parse(text: &str) -> Result<Topology, GexfError> {
    let mut topology = Topology::undirected();
    // attribute id -> (title, type), node class only
    let mut declared: BTreeMap<String, (String, String)> = BTreeMap::new();
    let mut in_node_attributes = false;
    let mut current: Option<usize> = None;

    for tag in tags(text)? {
        match (tag.name, tag.closing) {
            ("graph", false) => {
                if tag.get("defaultedgetype") == Some("directed") {
                    topology = Topology::new(true);
                }
            }
            ("attributes", false) => {
                in_node_attributes = tag.get("class").unwrap_or("node") == "node" && !tag.self_closing;
            }
            ("attributes", true) => in_node_attributes = false,
            ("attribute", false) if in_node_attributes => {
                let id = tag.require("id")?.to_string();
                let title = tag.get("title").unwrap_or(&id).to_string();
                let kind = tag.get("type").unwrap_or("string").to_string();
                declared.insert(id, (title, kind));
            }
            ("node", false) => {
                let id = NodeId::from(tag.require("id")?);
                let mut attrs = Attributes::new();
                if let Some(label) = tag.get("label") {
                    if label != id.as_str() {
                        attrs.insert("label".to_string(), Value::from(label));
                    }
                }
                let index = topology.add_node(id, attrs);
                current = if tag.self_closing { None } else { Some(index) };
            }
            ("node", true) => current = None,
            ("attvalue", false) => {
                if let Some(index) = current {
                    let key = tag.require("for")?;
                    let raw = tag.require("value")?;
                    let (title, value) = match declared.get(key) {
                        Some((title, kind)) => (title.clone(), typed_value(kind, raw)),
                        None => (key.to_string(), Value::from(raw)),
                    };
                    topology.set_node_attribute(index, title, value);
                }
            }
            ("viz:position", false) => {
                if let Some(index) = current {
                    let coords: Vec<Value> = ["x", "y", "z"]
                        .iter()
                        .filter_map(|axis| tag.get(axis))
                        .filter_map(|raw| raw.parse::<f64>().ok())
                        .map(Value::Float)
                        .collect();
                    topology.set_node_attribute(index, POSITION_ATTRIBUTE, Value::List(coords));
                }
            }
            ("edge", false) => {
                let source = NodeId::from(tag.require("source")?);
                let target = NodeId::from(tag.require("target")?);
                let weight = tag.get("weight").and_then(|w| w.parse().ok());
                topology.add_edge(source, target, weight);
            }
            _ => {}
        }
    }
    Ok(topology)
}

/// Converts a coordinate list into (x, y, z) if it has 2 or 3 numbers.
fn position(value: &Value) -> Option<(f64, f64, Option<f64>)> {
    let coords: Vec<f64> = value.as_list()?.iter().filter_map(Value::as_f64).collect();
    match (coords.len(), value.as_list()?.len()) {
        (2, 2) => Some((coords[0], coords[1], None)),
        (3, 3) => Some((coords[0], coords[1], Some(coords[2]))),
        _ => None,
    }
}

/// Makes a value representable as a GEXF attvalue.
fn sanitize(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::List(_) | Value::Map(_) => Some(Value::Str(value.to_text())),
        scalar => Some(scalar.clone()),
    }
}

fn gexf_type(value: &Value) -> &'static str {
    match value {
        Value::Int(_) => "long",
        Value::Float(_) => "double",
        Value::Bool(_) => "boolean",
        _ => "string",
    }
}

/// Writes `topology` as GEXF. `overlays[i]`, when given, adds or replaces
/// attributes of node `i` (used to export agent state).
pub fn write<W: Write>(mut out: W, topology: &Topology, overlays: &[Attributes]) -> io::Result<()> {
    let mut nodes: Vec<(Attributes, Option<(f64, f64, Option<f64>)>)> = Vec::with_capacity(topology.len());
    let mut columns: BTreeMap<String, &'static str> = BTreeMap::new();

    for index in 0..topology.len() {
        let mut merged = topology.attributes(index).cloned().unwrap_or_default();
        if let Some(overlay) = overlays.get(index) {
            merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let pos = merged.get(POSITION_ATTRIBUTE).and_then(position);
        if pos.is_some() {
            merged.remove(POSITION_ATTRIBUTE);
        }

        let mut clean = Attributes::new();
        for (key, value) in merged {
            let Some(value) = sanitize(&value) else { continue };
            if key != "label" {
                let kind = gexf_type(&value);
                columns
                    .entry(key.clone())
                    .and_modify(|existing| {
                        if *existing != kind {
                            *existing = "string";
                        }
                    })
                    .or_insert(kind);
            }
            clean.insert(key, value);
        }
        nodes.push((clean, pos));
    }

    let column_ids: BTreeMap<&str, usize> = columns
        .keys()
        .enumerate()
        .map(|(i, k)| (k.as_str(), i))
        .collect();
    let edge_type = if topology.is_directed() { "directed" } else { "undirected" };

    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        out,
        r#"<gexf xmlns="http://www.gexf.net/1.2draft" xmlns:viz="http://www.gexf.net/1.2draft/viz" version="1.2">"#
    )?;
    writeln!(out, r#"  <graph defaultedgetype="{}" mode="static">"#, edge_type)?;

    if !columns.is_empty() {
        writeln!(out, r#"    <attributes class="node" mode="static">"#)?;
        for (title, kind) in &columns {
            writeln!(
                out,
                r#"      <attribute id="{}" title="{}" type="{}"/>"#,
                column_ids[title.as_str()],
                escape(title),
                kind
            )?;
        }
        writeln!(out, "    </attributes>")?;
    }

    writeln!(out, "    <nodes>")?;
    for (index, (attrs, pos)) in nodes.iter().enumerate() {
        let id = topology.node_id(index).map(NodeId::as_str).unwrap_or_default();
        let label = attrs
            .get("label")
            .map(Value::to_text)
            .unwrap_or_else(|| id.to_string());
        writeln!(out, r#"      <node id="{}" label="{}">"#, escape(id), escape(&label))?;

        let values: Vec<_> = attrs.iter().filter(|(k, _)| k.as_str() != "label").collect();
        if !values.is_empty() {
            writeln!(out, "        <attvalues>")?;
            for (key, value) in values {
                writeln!(
                    out,
                    r#"          <attvalue for="{}" value="{}"/>"#,
                    column_ids[key.as_str()],
                    escape(&value.to_text())
                )?;
            }
            writeln!(out, "        </attvalues>")?;
        }
        if let Some((x, y, z)) = pos {
            match z {
                Some(z) => writeln!(out, r#"        <viz:position x="{}" y="{}" z="{}"/>"#, x, y, z)?,
                None => writeln!(out, r#"        <viz:position x="{}" y="{}"/>"#, x, y)?,
            }
        }
        writeln!(out, "      </node>")?;
    }
    writeln!(out, "    </nodes>")?;

    writeln!(out, "    <edges>")?;
    for (i, edge) in topology.edges().iter().enumerate() {
        let source = topology.node_id(edge.source).map(NodeId::as_str).unwrap_or_default();
        let target = topology.node_id(edge.target).map(NodeId::as_str).unwrap_or_default();
        match edge.weight {
            Some(w) => writeln!(
                out,
                r#"      <edge id="{}" source="{}" target="{}" weight="{}"/>"#,
                i,
                escape(source),
                escape(target),
                w
            )?,
            None => writeln!(
                out,
                r#"      <edge id="{}" source="{}" target="{}"/>"#,
                i,
                escape(source),
                escape(target)
            )?,
        }
    }
    writeln!(out, "    </edges>")?;
    writeln!(out, "  </graph>")?;
    writeln!(out, "</gexf>")?;
    out.flush()
}
