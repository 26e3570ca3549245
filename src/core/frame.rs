//! Push-channel frame demultiplexing.
//!
//! One transport message may carry several top-level JSON objects glued
//! together with no delimiter. [`FrameSplitter`] recovers the object
//! boundaries with a small brace/quote state machine; each recovered frame
//! is then decoded as a [`PushEvent`] and dispatched.

use serde::Deserialize;
use thiserror::Error;

use crate::candidate::{CandidatePatch, SharedMenu};

/// Incremental splitter state.
///
/// - `depth`: open braces seen outside string literals
/// - `in_string`: inside a `"..."` literal of the current object
/// - `escape`: previous character was a backslash inside a string
#[derive(Debug, Default)]
pub struct FrameSplitter {
    depth: usize,
    in_string: bool,
    escape: bool,
    buf: String,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `text`, pushing every completed object onto `out`.
    pub fn push_str(&mut self, text: &str, out: &mut Vec<String>) {
        for ch in text.chars() {
            self.push_char(ch, out);
        }
    }

    fn push_char(&mut self, ch: char, out: &mut Vec<String>) {
        if self.depth == 0 {
            match ch {
                '{' => {
                    self.depth = 1;
                    self.buf.push(ch);
                }
                '}' => {
                    // Stray close brace: whatever was pending is done.
                    if let Some(frame) = self.take() {
                        out.push(frame);
                    }
                }
                // Whitespace or garbage between objects.
                _ => {}
            }
            return;
        }

        self.buf.push(ch);
        if self.in_string {
            if self.escape {
                self.escape = false;
            } else if ch == '\\' {
                self.escape = true;
            } else if ch == '"' {
                self.in_string = false;
            }
            return;
        }

        match ch {
            '"' => self.in_string = true,
            '{' => self.depth += 1,
            '}' => {
                self.depth -= 1;
                if self.depth == 0 {
                    if let Some(frame) = self.take() {
                        out.push(frame);
                    }
                }
            }
            _ => {}
        }
    }

    /// Flush a trailing partial object, if any, and reset.
    pub fn finish(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        self.depth = 0;
        self.in_string = false;
        self.escape = false;
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

/// Split one transport message into its top-level JSON object strings.
pub fn split_frames(message: &str) -> Vec<String> {
    let mut splitter = FrameSplitter::new();
    let mut out = Vec::new();
    splitter.push_str(message, &mut out);
    if let Some(rest) = splitter.finish() {
        out.push(rest);
    }
    out
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MenuEffects {
    #[serde(default)]
    pub effects: Vec<CandidatePatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MenuUpdatePayload {
    #[serde(default)]
    pub menu: Option<MenuEffects>,
}

/// Inbound push-channel events, tagged by their `type` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PushEvent {
    #[serde(rename = "game-session-menu-update")]
    MenuUpdate {
        #[serde(default)]
        payload: MenuUpdatePayload,
    },
    #[serde(rename = "timed-effect-update")]
    TimedEffectUpdate,
    #[serde(other)]
    Unknown,
}

impl PushEvent {
    pub fn parse(frame: &str) -> Result<Self, FrameError> {
        serde_json::from_str(frame.trim()).map_err(|source| FrameError::Malformed {
            frame: frame.to_string(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed push frame ({} bytes): {source}", .frame.len())]
    Malformed {
        frame: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub frames: usize,
    pub menu_updates: usize,
    /// Candidates actually patched across all menu updates.
    pub patched: usize,
    pub ignored: usize,
    pub errors: Vec<FrameError>,
}

/// Split `message`, decode each frame and apply menu updates to `menu`.
///
/// A bad frame is recorded in the report and skipped; later frames of the
/// same message are still processed.
pub fn dispatch_message(message: &str, menu: &SharedMenu) -> DispatchReport {
    let mut report = DispatchReport::default();
    for frame in split_frames(message) {
        report.frames += 1;
        match PushEvent::parse(&frame) {
            Ok(PushEvent::MenuUpdate { payload }) => {
                report.menu_updates += 1;
                if let Some(m) = payload.menu {
                    report.patched += menu.merge(&m.effects);
                }
            }
            Ok(PushEvent::TimedEffectUpdate) | Ok(PushEvent::Unknown) => report.ignored += 1,
            Err(e) => report.errors.push(e),
        }
    }
    report
}
