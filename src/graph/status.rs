use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize};

use super::now_millis;

/// The enumerated lifecycle states a producer may report.  A missing
/// `statusText` is also valid and means "unknown".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusText {
    Running,
    Failed,
    Finished,
    Terminated,
}

impl StatusText {
    pub fn name(&self) -> &'static str {
        match self {
            StatusText::Running => "running",
            StatusText::Failed => "failed",
            StatusText::Finished => "finished",
            StatusText::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Option<StatusText> {
        match s {
            "running" => Some(StatusText::Running),
            "failed" => Some(StatusText::Failed),
            "finished" => Some(StatusText::Finished),
            "terminated" => Some(StatusText::Terminated),
            _ => None,
        }
    }
}

impl fmt::Display for StatusText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle record attached to a graph, node or node group.
///
/// `Status::default()` is the "empty" status used when a document omits the
/// `status` object entirely; a status built from a supplied object instead
/// gets `startTime`/`heartbeatTime` defaulted to the current time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub progress: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<StatusText>,
}

/// Partial status as it arrives from a producer.  Every field is optional and
/// only the supplied ones are applied by `Status::update_with`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPatch {
    #[serde(default, deserialize_with = "progress_from_number_or_string")]
    pub progress: Option<u32>,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub heartbeat_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub status_text: Option<StatusText>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProgressRepr {
    Number(u32),
    Text(String),
}

/// Progress is a percentage.
pub const MAX_PROGRESS: u32 = 100;

/// Producers send progress both as `50` and as `"50"`.  Values above 100 are
/// clamped.
fn progress_from_number_or_string<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let progress = match Option::<ProgressRepr>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(ProgressRepr::Number(n)) => n,
        Some(ProgressRepr::Text(s)) => s.trim().parse::<u32>().map_err(de::Error::custom)?,
    };
    Ok(Some(progress.min(MAX_PROGRESS)))
}

impl StatusPatch {
    pub fn with_text(status_text: StatusText) -> Self {
        StatusPatch {
            status_text: Some(status_text),
            ..Default::default()
        }
    }
}

impl Status {
    /// Build a full status from a patch treated as a complete document.
    pub fn from_patch(patch: &StatusPatch) -> Self {
        let now = now_millis();
        Status {
            progress: patch.progress.unwrap_or(0),
            start_time: Some(patch.start_time.unwrap_or(now)),
            heartbeat_time: Some(patch.heartbeat_time.unwrap_or(now)),
            end_time: patch.end_time,
            status_text: patch.status_text,
        }
    }

    /// Merge a patch into this status.  Fields absent from the patch are left
    /// exactly as they were.
    pub fn update_with(&mut self, patch: &StatusPatch) {
        if let Some(progress) = patch.progress {
            self.progress = progress;
        }
        if let Some(start_time) = patch.start_time {
            self.start_time = Some(start_time);
        }
        if let Some(heartbeat_time) = patch.heartbeat_time {
            self.heartbeat_time = Some(heartbeat_time);
        }
        if let Some(end_time) = patch.end_time {
            self.end_time = Some(end_time);
        }
        if let Some(status_text) = patch.status_text {
            self.status_text = Some(status_text);
        }
    }

    pub fn is(&self, status_text: StatusText) -> bool {
        self.status_text == Some(status_text)
    }

    /// "50%" style label; absent while there is no progress to show.
    pub fn progress_text(&self) -> Option<String> {
        if self.progress > 0 {
            Some(format!("{}%", self.progress))
        } else {
            None
        }
    }

    /// CSS class used by progress bars in the node templates.
    pub fn progress_style(&self) -> &'static str {
        match self.status_text {
            Some(StatusText::Finished) => "progress-bar-success",
            Some(StatusText::Failed) => "progress-bar-danger",
            Some(StatusText::Terminated) => "progress-bar-warning",
            _ => "progress-bar-striped",
        }
    }
}
