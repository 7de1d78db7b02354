//! # MPD Playback Source
//!
//! The playback source is whatever knows what is playing and how often each
//! song has been played. The engines only see the [`PlaybackSource`] trait;
//! [`MpcSource`] implements it for Music Player Daemon through the `mpc`
//! command-line client.
//!
//! ## Play counters
//!
//! MPD has no built-in play counter, but clients commonly keep one in the
//! sticker database under `playCount` (myMPD, mpdscribble setups, scripts).
//! `MpcSource` reads that sticker. Songs without the sticker report 0; any
//! other failed read is an error, never a counter of 0.
//!
//! ## Design Decision: mpc vs Direct Protocol
//!
//! Like the rest of the crate this shells out to `mpc` instead of speaking the
//! MPD protocol: mpc handles `MPD_HOST`/password parsing and reconnection, and
//! its plain-text output is trivial to parse.
//!
//! ## Commands used
//!
//! ```text
//! mpc status                               authorization and reachability check
//! mpc current -f <fmt>                     current song metadata
//! mpc sticker <uri> get playCount          current song counter
//! mpc listall -f <fmt>                     full catalog listing
//! mpc sticker "" find playCount            every counter at once
//! mpc idle player                          block until the player changes
//! ```

use crate::error::{ChartError, Result};
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::process::Command;

/// Tab-separated so titles containing spaces or dashes survive intact.
const ITEM_FORMAT: &str = "%file%\t%title%\t%artist%\t%album%";

/// Sticker name MPD clients conventionally store play counts under.
pub const DEFAULT_COUNTER_STICKER: &str = "playCount";

/// One catalog item as reported by the playback source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceItem {
    pub external_id: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Cumulative play counter as reported by the source.
    pub play_count: u32,
    pub artwork: Option<Vec<u8>>,
}

/// The external playback/media subsystem.
pub trait PlaybackSource {
    /// Whether access has been granted. Checked by callers, not enforced here.
    fn is_authorized(&self) -> bool;

    /// The item currently loaded in the player, if any.
    fn current_item(&self) -> Result<Option<SourceItem>>;

    /// Every item the source knows about, with its counter.
    fn list_items(&self) -> Result<Vec<SourceItem>>;

    /// Block until the player state changes (track transition, play/stop).
    fn wait_for_change(&self) -> Result<()>;
}

/// [`PlaybackSource`] backed by the `mpc` client.
#[derive(Debug, Clone)]
pub struct MpcSource {
    /// Passed as `MPD_HOST` when set, e.g. `password@localhost`.
    host: Option<String>,
    sticker: String,
}

impl Default for MpcSource {
    fn default() -> Self {
        Self {
            host: None,
            sticker: DEFAULT_COUNTER_STICKER.to_string(),
        }
    }
}

impl MpcSource {
    #[must_use]
    pub fn new(host: Option<String>, sticker: impl Into<String>) -> Self {
        Self {
            host,
            sticker: sticker.into(),
        }
    }

    /// Run `mpc` with `args` and return stdout, classifying failures.
    fn run(&self, args: &[&str]) -> Result<String> {
        trace!("mpc {}", args.join(" "));
        let mut cmd = Command::new("mpc");
        cmd.args(args);
        if let Some(host) = &self.host {
            cmd.env("MPD_HOST", host);
        }

        let output = cmd.output().map_err(|e| {
            ChartError::SourceUnavailable(format!(
                "failed to execute mpc ({e}); please install mpc (MPD client)"
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(&stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn counter_for(&self, uri: &str) -> Result<u32> {
        let reply = self.run(&["sticker", uri, "get", &self.sticker]);
        counter_from_reply(reply, &self.sticker)
    }
}

impl PlaybackSource for MpcSource {
    fn is_authorized(&self) -> bool {
        match self.run(&["status"]) {
            Err(ChartError::NotAuthorized(reason)) => {
                warn!("MPD refused access: {reason}");
                false
            }
            _ => true,
        }
    }

    fn current_item(&self) -> Result<Option<SourceItem>> {
        let out = self.run(&["current", "-f", ITEM_FORMAT])?;
        let Some(mut item) = out.lines().next().and_then(parse_item_line) else {
            debug!("Nothing loaded in MPD");
            return Ok(None);
        };
        item.play_count = self.counter_for(&item.external_id)?;
        Ok(Some(item))
    }

    fn list_items(&self) -> Result<Vec<SourceItem>> {
        let listing = self.run(&["listall", "-f", ITEM_FORMAT])?;
        let counters = match self.run(&["sticker", "", "find", &self.sticker]) {
            Ok(out) => parse_sticker_find(&out, &self.sticker),
            Err(ChartError::NotAuthorized(reason)) => {
                return Err(ChartError::NotAuthorized(reason));
            }
            Err(e) => {
                warn!("Could not read {} stickers, assuming zero: {e}", self.sticker);
                HashMap::new()
            }
        };

        let items: Vec<SourceItem> = listing
            .lines()
            .filter_map(parse_item_line)
            .map(|mut item| {
                item.play_count = counters.get(&item.external_id).copied().unwrap_or(0);
                item
            })
            .collect();

        debug!("MPD listed {} items, {} with counters", items.len(), counters.len());
        Ok(items)
    }

    fn wait_for_change(&self) -> Result<()> {
        self.run(&["idle", "player"]).map(|_| ())
    }
}

/// Map mpc's stderr onto an error kind.
fn classify_failure(stderr: &str) -> ChartError {
    let lower = stderr.to_lowercase();
    if lower.contains("permission") || lower.contains("password") || lower.contains("ack [4@") {
        ChartError::NotAuthorized(stderr.to_string())
    } else {
        ChartError::SourceUnavailable(format!(
            "failed to talk to MPD, make sure it is running: {stderr}"
        ))
    }
}

/// MPD's reply when a song has never been given the sticker.
fn is_missing_sticker(stderr: &str) -> bool {
    stderr.to_lowercase().contains("no such sticker")
}

/// Counter from a `mpc sticker <uri> get <name>` reply. Only a missing
/// sticker means "never counted"; connection and permission failures are
/// passed on so the caller retries instead of seeing the counter drop to 0.
fn counter_from_reply(reply: Result<String>, sticker: &str) -> Result<u32> {
    match reply {
        Ok(out) => Ok(parse_sticker_value(&out, sticker).unwrap_or(0)),
        Err(ChartError::SourceUnavailable(reason)) if is_missing_sticker(&reason) => {
            trace!("No {sticker} sticker yet: {reason}");
            Ok(0)
        }
        Err(e) => Err(e),
    }
}

fn non_empty(field: &str) -> Option<String> {
    let field = field.trim();
    (!field.is_empty()).then(|| field.to_string())
}

/// Parse one `ITEM_FORMAT` line. Lines without a file are not items.
fn parse_item_line(line: &str) -> Option<SourceItem> {
    let mut fields = line.split('\t');
    let external_id = non_empty(fields.next()?)?;
    Some(SourceItem {
        external_id,
        title: fields.next().and_then(non_empty),
        artist: fields.next().and_then(non_empty),
        album: fields.next().and_then(non_empty),
        ..Default::default()
    })
}

/// Parse `mpc sticker <uri> get <name>` output (`name=value`).
fn parse_sticker_value(output: &str, sticker: &str) -> Option<u32> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix(sticker)?.strip_prefix('='))
        .and_then(|value| value.trim().parse().ok())
}

/// Parse `mpc sticker "" find <name>` output (`uri: name=value` per line).
fn parse_sticker_find(output: &str, sticker: &str) -> HashMap<String, u32> {
    let separator = format!(": {sticker}=");
    output
        .lines()
        .filter_map(|line| {
            let (uri, value) = line.rsplit_once(&separator)?;
            Some((uri.to_string(), value.trim().parse().ok()?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_item_line_full() {
        let item = parse_item_line("a/b/song.flac\tSong - Live\tThe Artist\tAlbum").unwrap();
        assert_eq!(item.external_id, "a/b/song.flac");
        assert_eq!(item.title.as_deref(), Some("Song - Live"));
        assert_eq!(item.artist.as_deref(), Some("The Artist"));
        assert_eq!(item.album.as_deref(), Some("Album"));
        assert_eq!(item.play_count, 0);
    }

    #[test]
    fn test_parse_item_line_missing_tags() {
        let item = parse_item_line("untagged.mp3\t\t\t").unwrap();
        assert_eq!(item.external_id, "untagged.mp3");
        assert!(item.title.is_none());
        assert!(item.artist.is_none());
        assert!(item.album.is_none());

        assert!(parse_item_line("").is_none());
        assert!(parse_item_line("\tTitle\tArtist\t").is_none());
    }

    #[test]
    fn test_parse_sticker_value() {
        assert_eq!(parse_sticker_value("playCount=12\n", "playCount"), Some(12));
        assert_eq!(parse_sticker_value("rating=3\n", "playCount"), None);
        assert_eq!(parse_sticker_value("playCount=abc", "playCount"), None);
        assert_eq!(parse_sticker_value("", "playCount"), None);
    }

    #[test]
    fn test_parse_sticker_find() {
        let out = "a/one.flac: playCount=3\nweird: name.flac: playCount=7\nbroken line\nb.flac: playCount=x\n";
        let counters = parse_sticker_find(out, "playCount");
        assert_eq!(counters.len(), 2);
        assert_eq!(counters["a/one.flac"], 3);
        assert_eq!(counters["weird: name.flac"], 7);
    }

    #[test]
    fn test_missing_sticker_counts_as_zero() {
        let reply = Err(classify_failure("MPD error: no such sticker"));
        assert_eq!(counter_from_reply(reply, "playCount").unwrap(), 0);
        assert_eq!(counter_from_reply(Ok("playCount=7\n".into()), "playCount").unwrap(), 7);
    }

    #[test]
    fn test_failed_sticker_read_is_not_a_zero_counter() {
        let refused = Err(classify_failure("MPD error: Connection refused"));
        assert!(matches!(
            counter_from_reply(refused, "playCount"),
            Err(ChartError::SourceUnavailable(_))
        ));

        let denied = Err(classify_failure("MPD error: you don't have permission for \"sticker\""));
        assert!(matches!(
            counter_from_reply(denied, "playCount"),
            Err(ChartError::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_outage_between_reads_detects_nothing() {
        use crate::detector::PlayCountDetector;

        let replies = [
            Ok("playCount=7\n".to_string()),
            Err(classify_failure("MPD error: Connection refused")),
            Ok("playCount=7\n".to_string()),
        ];
        let mut detector = PlayCountDetector::new();
        let mut detections = 0;
        for reply in replies {
            // A failed read is retried later, the detector never sees it.
            if let Ok(counter) = counter_from_reply(reply, "playCount") {
                detections += usize::from(detector.observe("song.flac", counter).is_some());
            }
        }
        assert_eq!(detections, 0);
    }

    #[test]
    fn test_failure_classification() {
        assert!(matches!(
            classify_failure("MPD error: you don't have permission for \"status\""),
            ChartError::NotAuthorized(_)
        ));
        assert!(matches!(
            classify_failure("ACK [4@0] {sticker} incorrect password"),
            ChartError::NotAuthorized(_)
        ));
        assert!(matches!(
            classify_failure("MPD error: Connection refused"),
            ChartError::SourceUnavailable(_)
        ));
    }

    #[test]
    fn test_default_source_uses_play_count_sticker() {
        let source = MpcSource::default();
        assert_eq!(source.sticker, DEFAULT_COUNTER_STICKER);
        assert!(source.host.is_none());
    }
}
