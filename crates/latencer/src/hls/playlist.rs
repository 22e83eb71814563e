// Playlist model: immutable snapshots of a rendition playlist and the renditions
// listed by the master manifest.

use chrono::{DateTime, FixedOffset};
use url::Url;

use crate::hls::manifest::{self, Directive, ManifestError};
use crate::hls::sequence::SequenceNumber;

/// One quality variant enumerated by the master manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
    pub name: String,
    pub bandwidth: u64,
    /// URI as written in the master manifest, usually relative to it.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub sequence: SequenceNumber,
    pub duration: f64,
    pub uri: String,
    pub program_date_time: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub sequence: SequenceNumber,
    pub duration: f64,
    pub uri: String,
    pub program_date_time: Option<DateTime<FixedOffset>>,
    pub independent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaItem {
    Segment(Segment),
    Part(Part),
}

impl MediaItem {
    pub fn sequence(&self) -> SequenceNumber {
        match self {
            MediaItem::Segment(segment) => segment.sequence,
            MediaItem::Part(part) => part.sequence,
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            MediaItem::Segment(segment) => &segment.uri,
            MediaItem::Part(part) => &part.uri,
        }
    }

    pub fn duration(&self) -> f64 {
        match self {
            MediaItem::Segment(segment) => segment.duration,
            MediaItem::Part(part) => part.duration,
        }
    }
}

/// Snapshot of a media playlist. Replaced wholesale on every reload.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    /// Playlist URL without its query string.
    pub url: Url,
    pub target_duration: u64,
    pub part_target_duration: f64,
    pub part_hold_back: f64,
    /// `EXT-X-MEDIA-SEQUENCE` of the first listed segment.
    pub media_sequence: u64,
    pub can_block_reload: bool,
    pub end_list: bool,
    items: Vec<MediaItem>,
}

impl Playlist {
    /// Parses media playlist text fetched from `url`.
    ///
    /// Sequence numbers are assigned in document order: parts get the msn of the
    /// segment they belong to and a running part index; a full segment closes its
    /// msn, so the next item starts the following msn at part 0.
    pub fn parse(content: &str, url: &Url) -> Result<Self, ManifestError> {
        if manifest::is_master_playlist(content) {
            return Err(ManifestError::Master(
                "expected a media playlist, got a master playlist".to_string(),
            ));
        }
        let directives = manifest::parse_media_directives(content)?;
        Self::from_directives(directives, url)
    }

    pub fn from_directives(directives: Vec<Directive>, url: &Url) -> Result<Self, ManifestError> {
        let mut playlist = Playlist {
            url: canonical_url(url),
            target_duration: 0,
            part_target_duration: 0.0,
            part_hold_back: 0.0,
            media_sequence: 0,
            can_block_reload: false,
            end_list: false,
            items: Vec::new(),
        };

        let mut msn: Option<u64> = None;
        let mut part_index: i64 = 0;
        let mut pending_pdt: Option<DateTime<FixedOffset>> = None;

        for directive in directives {
            match directive {
                Directive::MediaSequence(sequence) => {
                    playlist.media_sequence = sequence;
                    if playlist.items.is_empty() {
                        msn = Some(sequence);
                    }
                }
                Directive::TargetDuration(target) => playlist.target_duration = target,
                Directive::PartInf { part_target } => playlist.part_target_duration = part_target,
                Directive::ServerControl {
                    can_block_reload,
                    part_hold_back,
                } => {
                    playlist.can_block_reload = can_block_reload;
                    if let Some(hold_back) = part_hold_back {
                        playlist.part_hold_back = hold_back;
                    }
                }
                Directive::EndList => playlist.end_list = true,
                Directive::ProgramDateTime(pdt) => pending_pdt = Some(pdt),
                Directive::Segment { duration, uri } => {
                    let current = *msn.get_or_insert(playlist.media_sequence);
                    playlist.items.push(MediaItem::Segment(Segment {
                        sequence: SequenceNumber::segment(current),
                        duration,
                        uri,
                        program_date_time: pending_pdt.take(),
                    }));
                    msn = Some(current + 1);
                    part_index = 0;
                }
                Directive::Part {
                    duration,
                    uri,
                    independent,
                } => {
                    let current = *msn.get_or_insert(playlist.media_sequence);
                    playlist.items.push(MediaItem::Part(Part {
                        sequence: SequenceNumber::new(current, part_index),
                        duration,
                        uri,
                        program_date_time: pending_pdt.take(),
                        independent,
                    }));
                    part_index += 1;
                }
                Directive::VariantStream { .. } => {
                    return Err(ManifestError::Master(
                        "variant stream entry in a media playlist".to_string(),
                    ));
                }
            }
        }

        if playlist.items.is_empty() {
            return Err(ManifestError::Malformed {
                line: 0,
                reason: "media playlist lists no segments or parts".to_string(),
            });
        }

        Ok(playlist)
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn last_item(&self) -> &MediaItem {
        // A parsed playlist always holds at least one item.
        &self.items[self.items.len() - 1]
    }

    /// Index and value of the last part anywhere in the playlist.
    pub fn last_part(&self) -> Option<(usize, &Part)> {
        self.items
            .iter()
            .enumerate()
            .rev()
            .find_map(|(idx, item)| match item {
                MediaItem::Part(part) => Some((idx, part)),
                MediaItem::Segment(_) => None,
            })
    }

    /// The position the next reload is expected to reach.
    pub fn next_expected(&self) -> SequenceNumber {
        match self.last_item() {
            MediaItem::Segment(segment) => SequenceNumber::new(segment.sequence.msn + 1, 0),
            MediaItem::Part(part) => SequenceNumber::new(part.sequence.msn, part.sequence.part + 1),
        }
    }
}

/// Parses the renditions enumerated by a master manifest, in listing order.
pub fn parse_renditions(content: &str) -> Result<Vec<Rendition>, ManifestError> {
    manifest::parse_master_directives(content)?
        .into_iter()
        .map(|directive| match directive {
            Directive::VariantStream {
                bandwidth,
                name,
                uri,
            } => Ok(Rendition {
                name,
                bandwidth,
                url: uri,
            }),
            other => Err(ManifestError::Master(format!(
                "unexpected directive in master playlist: {other:?}"
            ))),
        })
        .collect()
}

/// Returns an owned copy of the rendition called `name`.
pub fn find_rendition(renditions: &[Rendition], name: &str) -> Option<Rendition> {
    renditions.iter().find(|r| r.name == name).cloned()
}

/// `url` without query string or fragment.
pub fn canonical_url(url: &Url) -> Url {
    let mut canonical = url.clone();
    canonical.set_query(None);
    canonical.set_fragment(None);
    canonical
}
