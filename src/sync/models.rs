//! Typed records for the rows this layer consumes.
//!
//! The hosted backend hands back loosely shaped JSON; everything crossing
//! into this crate is validated into these types at the fetch or realtime
//! boundary so downstream logic never touches dynamic data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a community member, as issued by the hosted auth
/// service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Moderation state of a profile. Only approved profiles are discoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Approved,
    Pending,
    Rejected,
}

/// A prompt/answer pair displayed on a profile card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptAnswer {
    pub prompt: String,
    pub answer: String,
}

/// A community member's profile as rendered by the dashboard views.
///
/// Owned and mutated only by the member; this layer treats it as read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: MemberId,
    pub display_name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Condition subtype (e.g. RRMS, PPMS), free text from onboarding.
    #[serde(default)]
    pub condition_subtype: Option<String>,
    #[serde(default)]
    pub diagnosis_year: Option<i32>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default)]
    pub hobbies: Vec<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub extra_photos: Vec<String>,
    #[serde(default)]
    pub prompts: Vec<PromptAnswer>,
    pub moderation_status: ModerationStatus,
    pub last_active_at: DateTime<Utc>,
}

impl Profile {
    /// Validates a raw backend row into a typed profile.
    pub fn from_row(row: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(row)
    }
}

/// A directed expression of interest: `liker` liked `liked`.
///
/// Immutable once created; removed entirely on unlike. At most one active
/// like exists per ordered pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Like {
    #[serde(rename = "liker_id")]
    pub liker: MemberId,
    #[serde(rename = "liked_id")]
    pub liked: MemberId,
    pub created_at: DateTime<Utc>,
}

impl Like {
    pub fn new(liker: MemberId, liked: MemberId) -> Self {
        Self {
            liker,
            liked,
            created_at: Utc::now(),
        }
    }

    /// Validates a raw realtime row into a typed like.
    pub fn from_row(row: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(row)
    }
}

/// A directed rejection: `passer` passed on `passed`, excluding that profile
/// from the passer's future discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pass {
    #[serde(rename = "passer_id")]
    pub passer: MemberId,
    #[serde(rename = "passed_id")]
    pub passed: MemberId,
    pub created_at: DateTime<Utc>,
}

impl Pass {
    pub fn new(passer: MemberId, passed: MemberId) -> Self {
        Self {
            passer,
            passed,
            created_at: Utc::now(),
        }
    }
}

/// An unordered mutual relationship created by the backend when two
/// reciprocal likes exist. This layer never creates matches, it only
/// observes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    #[serde(rename = "member_a_id")]
    pub member_a: MemberId,
    #[serde(rename = "member_b_id")]
    pub member_b: MemberId,
    pub created_at: DateTime<Utc>,
}

impl Match {
    pub fn new(member_a: MemberId, member_b: MemberId) -> Self {
        Self {
            member_a,
            member_b,
            created_at: Utc::now(),
        }
    }

    pub fn involves(&self, member: &MemberId) -> bool {
        &self.member_a == member || &self.member_b == member
    }

    /// The other party of the match, if `viewer` is one of the pair.
    pub fn counterpart_of(&self, viewer: &MemberId) -> Option<&MemberId> {
        if &self.member_a == viewer {
            Some(&self.member_b)
        } else if &self.member_b == viewer {
            Some(&self.member_a)
        } else {
            None
        }
    }

    /// Validates a raw realtime row into a typed match.
    pub fn from_row(row: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn member(id: &str) -> MemberId {
        MemberId::from(id)
    }

    #[test]
    fn match_counterpart_resolves_either_side() {
        let m = Match::new(member("a"), member("b"));

        assert_eq!(m.counterpart_of(&member("a")), Some(&member("b")));
        assert_eq!(m.counterpart_of(&member("b")), Some(&member("a")));
        assert_eq!(m.counterpart_of(&member("c")), None);
    }

    #[test]
    fn match_involves_both_parties_only() {
        let m = Match::new(member("a"), member("b"));

        assert!(m.involves(&member("a")));
        assert!(m.involves(&member("b")));
        assert!(!m.involves(&member("c")));
    }

    #[test]
    fn like_row_validates_from_backend_shape() {
        let row = json!({
            "liker_id": "member-1",
            "liked_id": "member-2",
            "created_at": "2025-06-01T12:00:00Z",
        });

        let like = Like::from_row(row).unwrap();
        assert_eq!(like.liker, member("member-1"));
        assert_eq!(like.liked, member("member-2"));
    }

    #[test]
    fn like_row_rejects_missing_fields() {
        let row = json!({ "liker_id": "member-1" });
        assert!(Like::from_row(row).is_err());
    }

    #[test]
    fn profile_row_applies_defaults_for_optional_fields() {
        let row = json!({
            "id": "member-1",
            "display_name": "Sam",
            "moderation_status": "approved",
            "last_active_at": "2025-06-01T12:00:00Z",
        });

        let profile = Profile::from_row(row).unwrap();
        assert_eq!(profile.display_name, "Sam");
        assert_eq!(profile.moderation_status, ModerationStatus::Approved);
        assert!(profile.bio.is_none());
        assert!(profile.symptoms.is_empty());
        assert!(profile.prompts.is_empty());
    }

    #[test]
    fn profile_row_rejects_unknown_moderation_status() {
        let row = json!({
            "id": "member-1",
            "display_name": "Sam",
            "moderation_status": "shadowbanned",
            "last_active_at": "2025-06-01T12:00:00Z",
        });

        assert!(Profile::from_row(row).is_err());
    }

    #[test]
    fn member_id_serializes_transparently() {
        let id = member("abc-123");
        let encoded = serde_json::to_string(&id).unwrap();
        assert_eq!(encoded, "\"abc-123\"");

        let decoded: MemberId = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, id);
    }
}
