//! Parsed source-map consumer.
//!
//! Implements the subset of the source-map v3 format the resolver needs:
//! decoding the base64-VLQ `mappings` string into per-line segment tables and
//! answering `original_position_for` queries with least-upper-bound bias.
//! Decoding is tolerant; a malformed segment invalidates only itself.

use serde::Deserialize;
use thiserror::Error;

/// Errors produced while parsing a source map.
#[derive(Error, Debug)]
pub enum SourceMapError {
    /// The map is not valid JSON or misses required fields.
    #[error("invalid source map JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct RawSourceMap {
    #[serde(default)]
    sources: Vec<Option<String>>,
    #[serde(default, rename = "sourceRoot")]
    source_root: Option<String>,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    mappings: String,
}

/// One decoded mapping segment carrying source information.
#[derive(Clone, Copy, Debug)]
struct Segment {
    generated_column: u32,
    source: u32,
    original_line: u32,
    original_column: u32,
    name: Option<u32>,
}

/// The original position a generated position maps back to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginalPosition {
    /// Original source path, `sourceRoot` applied.
    pub source: String,
    /// 1-based line in the original source.
    pub line: u32,
    /// 0-based column in the original source.
    pub column: u32,
    /// Original identifier name, when mapped.
    pub name: Option<String>,
}

/// An immutable, queryable parsed source map.
#[derive(Debug)]
pub struct SourceMapConsumer {
    sources: Vec<String>,
    names: Vec<String>,
    /// Segments per generated line, ordered by generated column.
    lines: Vec<Vec<Segment>>,
}

impl SourceMapConsumer {
    /// Parse a source map from its JSON bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, SourceMapError> {
        let raw: RawSourceMap = serde_json::from_slice(bytes)?;

        let root = raw
            .source_root
            .as_deref()
            .map(|root| root.trim_end_matches('/'))
            .filter(|root| !root.is_empty());
        let sources = raw
            .sources
            .into_iter()
            .map(|source| {
                let source = source.unwrap_or_default();
                match root {
                    Some(root) if !source.is_empty() => format!("{root}/{source}"),
                    _ => source,
                }
            })
            .collect();

        Ok(SourceMapConsumer {
            sources,
            names: raw.names,
            lines: decode_mappings(&raw.mappings),
        })
    }

    /// Find the original position for a generated position.
    ///
    /// `line` is 1-based, `column` 0-based, matching runtime stack frames.
    /// Uses least-upper-bound bias: the answering segment is the one with the
    /// smallest generated column that is `>= column` on the queried line.
    pub fn original_position_for(&self, line: u32, column: u32) -> Option<OriginalPosition> {
        let segments = self.lines.get(line.checked_sub(1)? as usize)?;
        let index = segments.partition_point(|segment| segment.generated_column < column);
        let segment = segments.get(index)?;
        let source = self.sources.get(segment.source as usize)?.clone();
        if source.is_empty() {
            return None;
        }
        Some(OriginalPosition {
            source,
            line: segment.original_line + 1,
            column: segment.original_column,
            name: segment
                .name
                .and_then(|index| self.names.get(index as usize).cloned()),
        })
    }
}

fn base64_digit(byte: u8) -> Option<i64> {
    match byte {
        b'A'..=b'Z' => Some((byte - b'A') as i64),
        b'a'..=b'z' => Some((byte - b'a') as i64 + 26),
        b'0'..=b'9' => Some((byte - b'0') as i64 + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

/// Decode one VLQ value, advancing the byte cursor.
fn decode_vlq(bytes: &[u8], cursor: &mut usize) -> Option<i64> {
    let mut result: i64 = 0;
    let mut shift = 0u32;
    loop {
        let digit = base64_digit(*bytes.get(*cursor)?)?;
        *cursor += 1;
        result = result.checked_add((digit & 31).checked_shl(shift)?)?;
        if digit & 32 == 0 {
            break;
        }
        shift = shift.checked_add(5)?;
    }
    let negative = result & 1 == 1;
    let value = result >> 1;
    Some(if negative { -value } else { value })
}

fn decode_mappings(mappings: &str) -> Vec<Vec<Segment>> {
    let mut lines = Vec::new();
    let mut source: i64 = 0;
    let mut original_line: i64 = 0;
    let mut original_column: i64 = 0;
    let mut name: i64 = 0;

    for group in mappings.split(';') {
        let mut segments = Vec::new();
        let mut generated_column: i64 = 0;

        for encoded in group.split(',') {
            if encoded.is_empty() {
                continue;
            }
            let bytes = encoded.as_bytes();
            let mut cursor = 0;

            let Some(column_delta) = decode_vlq(bytes, &mut cursor) else {
                continue;
            };
            generated_column += column_delta;

            // 1-field segments map generated code to nothing; skip them.
            if cursor >= bytes.len() {
                continue;
            }
            let Some(source_delta) = decode_vlq(bytes, &mut cursor) else {
                continue;
            };
            let Some(line_delta) = decode_vlq(bytes, &mut cursor) else {
                continue;
            };
            let Some(original_column_delta) = decode_vlq(bytes, &mut cursor) else {
                continue;
            };
            source += source_delta;
            original_line += line_delta;
            original_column += original_column_delta;

            let name_index = if cursor < bytes.len() {
                match decode_vlq(bytes, &mut cursor) {
                    Some(delta) => {
                        name += delta;
                        u32::try_from(name).ok()
                    }
                    None => None,
                }
            } else {
                None
            };

            let (Ok(generated_column), Ok(source), Ok(original_line), Ok(original_column)) = (
                u32::try_from(generated_column),
                u32::try_from(source),
                u32::try_from(original_line),
                u32::try_from(original_column),
            ) else {
                continue;
            };
            segments.push(Segment {
                generated_column,
                source,
                original_line,
                original_column,
                name: name_index,
            });
        }

        segments.sort_by_key(|segment| segment.generated_column);
        lines.push(segments);
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn consumer(map: serde_json::Value) -> SourceMapConsumer {
        SourceMapConsumer::parse(map.to_string().as_bytes()).expect("valid map")
    }

    #[test]
    fn decodes_simple_vlq_values() {
        let cases = [("A", 0), ("B", 0), ("C", 1), ("D", -1), ("I", 4), ("gB", 16), ("yC", 41)];
        for (encoded, expected) in cases {
            let mut cursor = 0;
            let decoded = decode_vlq(encoded.as_bytes(), &mut cursor);
            // "B" encodes -0, which normalizes to 0.
            assert_eq!(decoded, Some(expected), "decoding {encoded}");
        }
    }

    #[test]
    fn maps_position_through_single_segment() {
        // [0, 0, 16, 4]: generated (1, 0) -> original (17, 4).
        let consumer = consumer(json!({
            "version": 3,
            "sources": ["pages/Home.tsx"],
            "names": [],
            "mappings": "AAgBI"
        }));

        let position = consumer.original_position_for(1, 0).expect("position");
        assert_eq!(position.source, "pages/Home.tsx");
        assert_eq!(position.line, 17);
        assert_eq!(position.column, 4);
    }

    #[test]
    fn least_upper_bound_picks_next_segment() {
        // Segments at generated columns 0 and 4; original lines 1 and 2.
        let consumer = consumer(json!({
            "version": 3,
            "sources": ["src/app.ts"],
            "names": [],
            "mappings": "AAAA,IACA"
        }));

        let exact = consumer.original_position_for(1, 4).expect("position");
        assert_eq!(exact.line, 2);

        let between = consumer.original_position_for(1, 2).expect("position");
        assert_eq!(between.line, 2, "query between segments resolves upward");

        assert!(consumer.original_position_for(1, 5).is_none());
    }

    #[test]
    fn source_root_is_joined() {
        let consumer = consumer(json!({
            "version": 3,
            "sourceRoot": "webpack://app/",
            "sources": ["src/index.ts"],
            "names": [],
            "mappings": "AAAA"
        }));

        let position = consumer.original_position_for(1, 0).expect("position");
        assert_eq!(position.source, "webpack://app/src/index.ts");
    }

    #[test]
    fn names_resolve_when_indexed() {
        // [0, 0, 0, 0, 0] with one name.
        let consumer = consumer(json!({
            "version": 3,
            "sources": ["src/index.ts"],
            "names": ["handleClick"],
            "mappings": "AAAAA"
        }));

        let position = consumer.original_position_for(1, 0).expect("position");
        assert_eq!(position.name.as_deref(), Some("handleClick"));
    }

    #[test]
    fn later_lines_use_semicolon_groups() {
        // Line 10 carries [5, 0, 41, 0]: generated (10, 5) -> original (42, 0).
        let consumer = consumer(json!({
            "version": 3,
            "sources": ["src/deep.ts"],
            "names": [],
            "mappings": ";;;;;;;;;KAyCA"
        }));

        let position = consumer.original_position_for(10, 5).expect("position");
        assert_eq!(position.line, 42);
        assert_eq!(position.column, 0);
    }

    #[test]
    fn malformed_segments_are_skipped() {
        let consumer = consumer(json!({
            "version": 3,
            "sources": ["src/app.ts"],
            "names": [],
            "mappings": "!!!,AAAA"
        }));

        assert!(consumer.original_position_for(1, 0).is_some());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(SourceMapConsumer::parse(b"not json").is_err());
    }
}
