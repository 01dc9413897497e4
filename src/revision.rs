//! Revisions: one versioned snapshot of a config value and its approval state.
use chrono::{DateTime, TimeZone, Utc};

/// Approval state of a revision. Once `Approved`, the revision is read-only.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    minicbor::Encode,
    minicbor::Decode,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RevisionState {
    #[n(0)]
    Unapproved,
    #[n(1)]
    Approved,
}

impl RevisionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionState::Unapproved => "unapproved",
            RevisionState::Approved => "approved",
        }
    }
}

impl std::fmt::Display for RevisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
#[error("unknown revision state '{0}'")]
pub struct UnknownState(String);

impl std::str::FromStr for RevisionState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unapproved" => Ok(RevisionState::Unapproved),
            "approved" => Ok(RevisionState::Approved),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// One snapshot of a config value. Ids are handed out by the service, never
/// by callers, and grow by one from 1 within a config.
#[derive(
    Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    #[n(0)]
    pub id: i64,
    #[n(1)]
    pub value: String, // opaque payload, usually serialized JSON
    #[n(2)]
    pub author: String,
    #[n(3)]
    pub state: RevisionState,
    #[n(4)]
    pub created_at: TimeStamp,
    #[n(5)]
    pub updated_at: TimeStamp,
}

impl Revision {
    /// The first revision of a freshly created config.
    pub fn seed(value: &str, author: &str) -> Self {
        Self {
            id: 1,
            value: value.to_string(),
            author: author.to_string(),
            state: RevisionState::Unapproved,
            created_at: TimeStamp::new(),
            updated_at: TimeStamp::new(),
        }
    }

    /// A blank revision; the id is assigned when it joins a config.
    pub fn empty() -> Self {
        Self {
            id: 0,
            value: String::new(),
            author: String::new(),
            state: RevisionState::Unapproved,
            created_at: TimeStamp::new(),
            updated_at: TimeStamp::new(),
        }
    }

    /// Overwrite every field the patch supplies and refresh `updated_at`.
    /// The service only calls this on unapproved or freshly copied revisions.
    pub fn apply(&mut self, patch: &RevisionPatch) {
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(author) = &patch.author {
            self.author = author.clone();
        }
        if let Some(value) = &patch.value {
            self.value = value.clone();
        }
        self.updated_at = TimeStamp::new();
    }
}

/// Partial update for a single revision. Absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionPatch {
    pub state: Option<RevisionState>,
    pub author: Option<String>,
    pub value: Option<String>,
}

impl RevisionPatch {
    pub fn approves(&self) -> bool {
        self.state == Some(RevisionState::Approved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn revision_encoding() {
        let original = Revision::seed("{\"retries\": 3}", "alice");

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: Revision = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn apply_refreshes_updated_at_only_for_supplied_fields() {
        let mut revision = Revision::seed("a", "alice");
        let before = revision.updated_at.clone();

        revision.apply(&RevisionPatch {
            state: None,
            author: None,
            value: Some("b".to_string()),
        });

        assert_eq!(revision.value, "b");
        assert_eq!(revision.author, "alice");
        assert_eq!(revision.state, RevisionState::Unapproved);
        assert!(revision.updated_at >= before);
    }
}
