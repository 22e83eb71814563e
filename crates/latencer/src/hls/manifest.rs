//! Manifest text → typed directive records.
//!
//! Master playlists go through `m3u8-rs`. Media playlists are scanned line by
//! line because m3u8-rs 6 drops the LL-HLS tags (`EXT-X-PART`,
//! `EXT-X-PART-INF`, `EXT-X-SERVER-CONTROL`) and the interleaving of parts and
//! segments is exactly what the probe needs.

use chrono::{DateTime, FixedOffset};
use m3u8_rs::{QuotedOrUnquoted, VariantStream};
use tracing::trace;

/// One record of a parsed manifest, in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    VariantStream {
        bandwidth: u64,
        name: String,
        uri: String,
    },
    Segment {
        duration: f64,
        uri: String,
    },
    Part {
        duration: f64,
        uri: String,
        independent: bool,
    },
    ProgramDateTime(DateTime<FixedOffset>),
    TargetDuration(u64),
    MediaSequence(u64),
    PartInf {
        part_target: f64,
    },
    ServerControl {
        can_block_reload: bool,
        part_hold_back: Option<f64>,
    },
    EndList,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ManifestError {
    #[error("missing #EXTM3U header")]
    MissingHeader,

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("invalid master playlist: {0}")]
    Master(String),
}

impl ManifestError {
    fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            line,
            reason: reason.into(),
        }
    }
}

/// Returns `true` if the text is a master (multivariant) playlist.
pub fn is_master_playlist(content: &str) -> bool {
    content.contains("#EXT-X-STREAM-INF")
}

/// Parses either kind of playlist into directives.
pub fn parse_directives(content: &str) -> Result<Vec<Directive>, ManifestError> {
    if is_master_playlist(content) {
        parse_master_directives(content)
    } else {
        parse_media_directives(content)
    }
}

/// Parses a master playlist into one [`Directive::VariantStream`] per variant.
///
/// I-frame-only variants are not playable renditions and are left out.
pub fn parse_master_directives(content: &str) -> Result<Vec<Directive>, ManifestError> {
    ensure_header(content)?;

    let master = m3u8_rs::parse_master_playlist_res(content.as_bytes())
        .map_err(|e| ManifestError::Master(e.to_string()))?;

    master
        .variants
        .iter()
        .filter(|variant| !variant.is_i_frame)
        .map(|variant| {
            if variant.uri.trim().is_empty() {
                return Err(ManifestError::Master(
                    "variant stream without URI".to_string(),
                ));
            }
            Ok(Directive::VariantStream {
                bandwidth: variant.bandwidth,
                name: variant_name(variant),
                uri: variant.uri.clone(),
            })
        })
        .collect()
}

/// `NAME` attribute if present, otherwise `<height>p`, otherwise the URI.
fn variant_name(variant: &VariantStream) -> String {
    let named = variant
        .other_attributes
        .as_ref()
        .and_then(|attrs| attrs.get("NAME"))
        .map(|value| match value {
            QuotedOrUnquoted::Quoted(s) | QuotedOrUnquoted::Unquoted(s) => s.trim().to_string(),
        })
        .filter(|name| !name.is_empty());

    named
        .or_else(|| variant.resolution.as_ref().map(|r| format!("{}p", r.height)))
        .unwrap_or_else(|| variant.uri.clone())
}

/// Scans a media playlist into segment, part and playlist-level directives.
pub fn parse_media_directives(content: &str) -> Result<Vec<Directive>, ManifestError> {
    ensure_header(content)?;

    let mut directives = Vec::new();
    // (line number, duration) of an EXTINF still waiting for its URI line
    let mut pending_segment: Option<(usize, f64)> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with("#EXTM3U") {
            continue;
        }

        if !line.starts_with('#') {
            let Some((_, duration)) = pending_segment.take() else {
                return Err(ManifestError::malformed(
                    line_no,
                    format!("URI `{line}` without a preceding #EXTINF"),
                ));
            };
            directives.push(Directive::Segment {
                duration,
                uri: line.to_string(),
            });
            continue;
        }

        let (tag, value) = match line.split_once(':') {
            Some((tag, value)) => (tag, value),
            None => (line, ""),
        };

        match tag {
            "#EXTINF" => {
                if pending_segment.is_some() {
                    return Err(ManifestError::malformed(line_no, "#EXTINF without URI"));
                }
                let duration_str = value.split_once(',').map_or(value, |(d, _)| d);
                pending_segment = Some((line_no, parse_float(line_no, "EXTINF", duration_str)?));
            }
            "#EXT-X-PART" => directives.push(parse_part(line_no, value)?),
            "#EXT-X-PROGRAM-DATE-TIME" => {
                directives.push(Directive::ProgramDateTime(parse_date_time(line_no, value)?));
            }
            "#EXT-X-TARGETDURATION" => {
                // Some packagers write a decimal here; round up as the duration bound.
                let target = parse_float(line_no, "EXT-X-TARGETDURATION", value)?;
                directives.push(Directive::TargetDuration(target.ceil() as u64));
            }
            "#EXT-X-MEDIA-SEQUENCE" => {
                let msn = value.trim().parse::<u64>().map_err(|e| {
                    ManifestError::malformed(line_no, format!("EXT-X-MEDIA-SEQUENCE: {e}"))
                })?;
                directives.push(Directive::MediaSequence(msn));
            }
            "#EXT-X-PART-INF" => {
                let attrs = parse_attribute_list(value);
                let part_target = attribute(&attrs, "PART-TARGET").ok_or_else(|| {
                    ManifestError::malformed(line_no, "EXT-X-PART-INF without PART-TARGET")
                })?;
                directives.push(Directive::PartInf {
                    part_target: parse_float(line_no, "PART-TARGET", part_target)?,
                });
            }
            "#EXT-X-SERVER-CONTROL" => {
                let attrs = parse_attribute_list(value);
                let part_hold_back = attribute(&attrs, "PART-HOLD-BACK")
                    .map(|v| parse_float(line_no, "PART-HOLD-BACK", v))
                    .transpose()?;
                directives.push(Directive::ServerControl {
                    can_block_reload: attribute(&attrs, "CAN-BLOCK-RELOAD") == Some("YES"),
                    part_hold_back,
                });
            }
            "#EXT-X-ENDLIST" => directives.push(Directive::EndList),
            _ => trace!(tag, "Ignoring manifest tag"),
        }
    }

    if let Some((line_no, _)) = pending_segment {
        return Err(ManifestError::malformed(line_no, "#EXTINF without URI"));
    }

    Ok(directives)
}

fn ensure_header(content: &str) -> Result<(), ManifestError> {
    match content.lines().map(str::trim).find(|line| !line.is_empty()) {
        Some(first) if first.starts_with("#EXTM3U") => Ok(()),
        _ => Err(ManifestError::MissingHeader),
    }
}

fn parse_part(line_no: usize, value: &str) -> Result<Directive, ManifestError> {
    let attrs = parse_attribute_list(value);
    let duration = attribute(&attrs, "DURATION")
        .ok_or_else(|| ManifestError::malformed(line_no, "EXT-X-PART without DURATION"))?;
    let uri = attribute(&attrs, "URI")
        .filter(|uri| !uri.is_empty())
        .ok_or_else(|| ManifestError::malformed(line_no, "EXT-X-PART without URI"))?;

    Ok(Directive::Part {
        duration: parse_float(line_no, "DURATION", duration)?,
        uri: uri.to_string(),
        independent: attribute(&attrs, "INDEPENDENT") == Some("YES"),
    })
}

fn parse_float(line_no: usize, what: &str, value: &str) -> Result<f64, ManifestError> {
    let parsed = value
        .trim()
        .parse::<f64>()
        .map_err(|e| ManifestError::malformed(line_no, format!("{what} `{value}`: {e}")))?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(ManifestError::malformed(
            line_no,
            format!("{what} `{value}` is not a valid duration"),
        ));
    }
    Ok(parsed)
}

fn parse_date_time(line_no: usize, value: &str) -> Result<DateTime<FixedOffset>, ManifestError> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        // ISO 8601 offsets without a colon (`+0000`) are common in the wild
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map_err(|e| {
            ManifestError::malformed(line_no, format!("EXT-X-PROGRAM-DATE-TIME `{value}`: {e}"))
        })
}

/// Splits an attribute list on commas outside quotes and unquotes the values.
fn parse_attribute_list(rest: &str) -> Vec<(&str, &str)> {
    let mut parts: Vec<&str> = Vec::new();
    let mut in_quotes = false;
    let mut start = 0usize;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(rest[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < rest.len() {
        parts.push(rest[start..].trim());
    }

    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .filter_map(|part| {
            let (k, v) = part.split_once('=')?;
            let mut val = v.trim();
            if let Some(stripped) = val.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                val = stripped;
            }
            Some((k.trim(), val))
        })
        .collect()
}

fn attribute<'a>(attrs: &[(&str, &'a str)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| *v)
}
