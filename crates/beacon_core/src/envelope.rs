use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Why an inbound frame could not be turned into an [`Envelope`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no `type` field")]
    MissingType,
    #[error("invalid `{kind}` payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
    title: Option<String>,
    time: Option<i64>,
    version: Option<String>,
}

/// A decoded push-update message.
///
/// The set of variants is the message vocabulary this client understands;
/// anything else the server sends lands in [`Envelope::Unknown`] so that a
/// newer server never breaks an older client.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Status(Status),
    JobQueued(JobQueued),
    JobStarted(JobStarted),
    JobCompleted(JobCompleted),
    Unknown { kind: String, data: Value },
}

impl Envelope {
    pub const STATUS: &'static str = "status";
    pub const JOB_QUEUED: &'static str = "job_queued";
    pub const JOB_STARTED: &'static str = "job_started";
    pub const JOB_COMPLETED: &'static str = "job_completed";

    /// Decodes one JSON frame of the form `{"type": .., "data": {..}}`.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let raw: RawFrame = serde_json::from_str(frame)?;
        let kind = raw.kind.ok_or(DecodeError::MissingType)?;
        let envelope = match kind.as_str() {
            Self::STATUS => Envelope::Status(Status::from_raw(raw.data, raw.title, raw.time, raw.version)),
            Self::JOB_QUEUED => Envelope::JobQueued(payload(Self::JOB_QUEUED, raw.data)?),
            Self::JOB_STARTED => Envelope::JobStarted(payload(Self::JOB_STARTED, raw.data)?),
            Self::JOB_COMPLETED => Envelope::JobCompleted(payload(Self::JOB_COMPLETED, raw.data)?),
            _ => Envelope::Unknown {
                kind,
                data: raw.data,
            },
        };
        Ok(envelope)
    }

    /// The wire name of this message's `type`.
    pub fn kind(&self) -> &str {
        match self {
            Envelope::Status(_) => Self::STATUS,
            Envelope::JobQueued(_) => Self::JOB_QUEUED,
            Envelope::JobStarted(_) => Self::JOB_STARTED,
            Envelope::JobCompleted(_) => Self::JOB_COMPLETED,
            Envelope::Unknown { kind, .. } => kind,
        }
    }
}

fn payload<T: for<'de> Deserialize<'de>>(kind: &'static str, data: Value) -> Result<T, DecodeError> {
    T::deserialize(data).map_err(|source| DecodeError::Payload { kind, source })
}

/// Global state plus the route-specific payload of a `status` message.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub title: Option<String>,
    /// Server clock in unix seconds.
    pub server_time: Option<i64>,
    pub version: Option<String>,
    pub data: Value,
}

impl Status {
    // Older servers put the globals next to `type`, newer ones inside `data`.
    fn from_raw(data: Value, title: Option<String>, time: Option<i64>, version: Option<String>) -> Self {
        let title = title.or_else(|| data.get("title").and_then(Value::as_str).map(str::to_owned));
        let server_time = time.or_else(|| data.get("time").and_then(Value::as_i64));
        let version =
            version.or_else(|| data.get("version").and_then(Value::as_str).map(str::to_owned));
        Self {
            title,
            server_time,
            version,
            data,
        }
    }

    /// Deserializes the route-specific payload into a view's own type.
    pub fn payload<'a, T: Deserialize<'a>>(&'a self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobQueued {
    pub name: String,
    #[serde(default)]
    pub number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStarted {
    pub name: String,
    pub number: u32,
    /// Offset of the run from the head of the server's queue. Servers send it
    /// negated, so only the magnitude is meaningful; see
    /// [`JobStarted::queue_position`].
    #[serde(default)]
    pub queue_index: Option<i64>,
    #[serde(default)]
    pub queued: Option<i64>,
    pub started: i64,
    /// Estimated completion time in unix seconds.
    #[serde(default)]
    pub etc: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl JobStarted {
    /// Position the run left in the queue, counted from the oldest entry.
    pub fn queue_position(&self) -> Option<usize> {
        self.queue_index
            .and_then(|index| usize::try_from(index.unsigned_abs()).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobCompleted {
    pub name: String,
    pub number: u32,
    #[serde(default)]
    pub queued: Option<i64>,
    pub started: i64,
    pub completed: i64,
    pub result: RunResult,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl JobCompleted {
    pub fn duration_secs(&self) -> i64 {
        self.completed - self.started
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Artifact {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunResult {
    Queued,
    Running,
    Aborted,
    Failed,
    Success,
    #[default]
    #[serde(other)]
    Unknown,
}

impl RunResult {
    /// True once the run has reached a terminal result.
    pub fn is_complete(self) -> bool {
        matches!(self, RunResult::Aborted | RunResult::Failed | RunResult::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunResult::Queued => "queued",
            RunResult::Running => "running",
            RunResult::Aborted => "aborted",
            RunResult::Failed => "failed",
            RunResult::Success => "success",
            RunResult::Unknown => "unknown",
        }
    }
}
