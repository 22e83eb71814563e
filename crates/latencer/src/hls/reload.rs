// Reload planning: builds the blocking-reload request for the next part.

use tracing::{trace, warn};
use url::Url;

use crate::error::ProbeError;
use crate::hls::playlist::{self, Playlist};
use crate::hls::sequence::SequenceNumber;

pub const MSN_QUERY_PARAM: &str = "_HLS_msn";
pub const PART_QUERY_PARAM: &str = "_HLS_part";

/// A planned blocking-reload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadRequest {
    pub url: Url,
    pub target: SequenceNumber,
}

/// Plans the next blocking reload of `playlist`.
///
/// The target is the part following the last listed part: the next index of
/// the same msn while that part is the final item, otherwise part 0 of the
/// following msn.
pub fn plan_reload(playlist: &Playlist) -> Result<ReloadRequest, ProbeError> {
    let Some((index, part)) = playlist.last_part() else {
        return Err(ProbeError::planning(
            playlist.url.as_str(),
            "playlist lists no parts to block on",
        ));
    };

    let target = if index + 1 == playlist.items().len() {
        SequenceNumber::new(part.sequence.msn, part.sequence.part + 1)
    } else {
        SequenceNumber::new(part.sequence.msn + 1, 0)
    };

    if !playlist.can_block_reload {
        warn!(
            url = %playlist.url,
            "Playlist does not advertise CAN-BLOCK-RELOAD, the reload may return immediately"
        );
    }

    let url = reload_url(&playlist.url, target);
    trace!(url = %url, msn = target.msn, part = target.part, "Planned blocking reload");
    Ok(ReloadRequest { url, target })
}

/// `base` without its query, carrying the blocking-reload parameters for `target`.
pub fn reload_url(base: &Url, target: SequenceNumber) -> Url {
    let mut url = playlist::canonical_url(base);
    url.query_pairs_mut()
        .append_pair(MSN_QUERY_PARAM, &target.msn.to_string())
        .append_pair(PART_QUERY_PARAM, &target.part.to_string());
    url
}
