//! Core domain model for vtwiki: wiki pages, synthesized vtuber profiles,
//! channels, agencies, manual overrides and relationship trees.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "vtwiki-core";

/// Wiki page ids double as profile and agency ids.
pub type PageId = i64;

pub const PROFILE_REFRESH_TOPIC: &str = "vtuber-refresh";
pub const AGENCY_REFRESH_TOPIC: &str = "agency-refresh";

/// Raw page as fetched from the wiki. Never persisted by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiPage {
    pub id: PageId,
    pub title: String,
    pub raw_content: String,
}

/// Opaque continuation token handed back by the wiki list endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrawlCursor(pub String);

impl CrawlCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lightweight `(id, title)` item returned by list and category endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    pub id: PageId,
    pub title: String,
}

/// Numeric infobox fact. `Absent` means the key was missing or empty.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Measurement {
    #[default]
    Absent,
    /// Non-empty text with no number in it ("unknown", "???").
    Uncountable,
    /// A number-looking substring that still failed to parse.
    Invalid,
    Value(f64),
}

impl Measurement {
    pub fn value(&self) -> Option<f64> {
        match self {
            Measurement::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Measurement::Absent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    Youtube,
    Twitch,
    Bilibili,
    Niconico,
    Other,
}

impl ChannelType {
    /// Maps the second-level domain of a channel URL (`youtube` for
    /// `www.youtube.com`) to a channel type.
    pub fn from_second_level_domain(sld: &str) -> Self {
        match sld.to_ascii_lowercase().as_str() {
            "youtube" | "youtu" => ChannelType::Youtube,
            "twitch" => ChannelType::Twitch,
            "bilibili" => ChannelType::Bilibili,
            "nicovideo" | "nico" => ChannelType::Niconico,
            _ => ChannelType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Youtube => "youtube",
            ChannelType::Twitch => "twitch",
            ChannelType::Bilibili => "bilibili",
            ChannelType::Niconico => "niconico",
            ChannelType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub url: String,
    pub image: Option<String>,
    pub start_date: DateTime<Utc>,
    /// `None` when the platform's duration metadata is missing or malformed.
    pub end_date: Option<DateTime<Utc>>,
}

/// A streaming channel. Only `channel_type` and `url` come from the wiki;
/// the rest is filled by enrichment. `external_id == None` after enrichment
/// means the channel could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_type: ChannelType,
    pub url: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub subscriber_count: Option<u64>,
    #[serde(default)]
    pub videos: Vec<Video>,
}

impl Channel {
    pub fn unresolved(channel_type: ChannelType, url: impl Into<String>) -> Self {
        Self {
            channel_type,
            url: url.into(),
            external_id: None,
            name: None,
            image: None,
            subscriber_count: None,
            videos: Vec::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.external_id.is_some()
    }
}

/// Agency reference embedded in profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agency {
    pub id: PageId,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// Persisted agency with synthesis timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyRecord {
    #[serde(flatten)]
    pub agency: Agency,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Facts synthesized for one vtuber page. Produced by extraction, then
/// completed by agency resolution and channel enrichment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Vtuber {
    pub id: PageId,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub original_names: Vec<String>,
    #[serde(default)]
    pub nicknames: Vec<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub blood_type: Option<String>,
    #[serde(default)]
    pub zodiac_sign: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub age: Measurement,
    #[serde(default)]
    pub height: Measurement,
    #[serde(default)]
    pub weight: Measurement,
    #[serde(default)]
    pub debut_date: Option<NaiveDate>,
    #[serde(default)]
    pub retirement_date: Option<NaiveDate>,
    #[serde(default)]
    pub birthday: Option<NaiveDate>,
    #[serde(default)]
    pub has_2d: bool,
    #[serde(default)]
    pub has_3d: bool,
    #[serde(default)]
    pub character_designers: Vec<String>,
    #[serde(default)]
    pub character_2d_modelers: Vec<String>,
    #[serde(default)]
    pub character_3d_modelers: Vec<String>,
    #[serde(default)]
    pub agencies: Vec<Agency>,
    #[serde(default)]
    pub affiliations: Vec<String>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub social_medias: Vec<String>,
    #[serde(default)]
    pub official_websites: Vec<String>,
}

impl Vtuber {
    pub fn is_retired(&self) -> bool {
        self.retirement_date.is_some()
    }
}

/// One administrator-pinnable field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Override<T> {
    pub flag: bool,
    /// What automation had computed when the value was pinned.
    pub old_value: T,
    pub value: T,
}

impl<T: Clone> Override<T> {
    pub fn pinned(old_value: T, value: T) -> Self {
        Self {
            flag: true,
            old_value,
            value,
        }
    }

    /// Returns the pinned value when flagged, otherwise the fresh one.
    pub fn resolve(&self, fresh: T) -> T {
        if self.flag {
            self.value.clone()
        } else {
            fresh
        }
    }
}

/// Manual overrides attached to a profile. Written only by the admin
/// surface; synthesis reads it and never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OverriddenField {
    #[serde(default)]
    pub debut_date: Override<Option<NaiveDate>>,
    #[serde(default)]
    pub retirement_date: Override<Option<NaiveDate>>,
    #[serde(default)]
    pub agencies: Override<Vec<Agency>>,
    #[serde(default)]
    pub affiliations: Override<Vec<String>>,
    #[serde(default)]
    pub channels: Override<Vec<Channel>>,
}

impl OverriddenField {
    /// Replaces every flagged field of `vtuber` with its pinned value.
    pub fn apply_to(&self, vtuber: &mut Vtuber) {
        vtuber.debut_date = self.debut_date.resolve(vtuber.debut_date);
        vtuber.retirement_date = self.retirement_date.resolve(vtuber.retirement_date);
        vtuber.agencies = self.agencies.resolve(std::mem::take(&mut vtuber.agencies));
        vtuber.affiliations = self
            .affiliations
            .resolve(std::mem::take(&mut vtuber.affiliations));
        vtuber.channels = self.channels.resolve(std::mem::take(&mut vtuber.channels));
    }

    pub fn any_flagged(&self) -> bool {
        self.debut_date.flag
            || self.retirement_date.flag
            || self.agencies.flag
            || self.affiliations.flag
            || self.channels.flag
    }
}

/// Canonical persisted profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VtuberRecord {
    #[serde(flatten)]
    pub vtuber: Vtuber,
    #[serde(default)]
    pub overridden: OverriddenField,
    pub created_at: DateTime<Utc>,
    /// Last synthesis time; drives staleness.
    pub updated_at: DateTime<Utc>,
}

impl VtuberRecord {
    pub fn id(&self) -> PageId {
        self.vtuber.id
    }
}

/// Work-queue payload. A missing `forced` deserializes as `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub id: PageId,
    #[serde(default)]
    pub forced: bool,
}

/// Tree node identity. External nodes are creators or affiliations with no
/// record of their own and are identified by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum NodeId {
    Vtuber(PageId),
    Agency(PageId),
    External(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: NodeId,
    pub name: String,
    pub image: Option<String>,
    pub retired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeKind {
    #[serde(rename = "DESIGNER")]
    Designer,
    #[serde(rename = "2D_MODELER")]
    Modeler2d,
    #[serde(rename = "3D_MODELER")]
    Modeler3d,
    #[serde(rename = "MEMBER")]
    Member,
    #[serde(rename = "COLLEAGUE")]
    Colleague,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
    /// Shared agency ids for `Colleague` edges; empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub via: Vec<PageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
    pub edges: Vec<TreeEdge>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn flagged_overrides_replace_fresh_values() {
        let mut vtuber = Vtuber {
            id: 7,
            name: "Test".into(),
            debut_date: Some(date(2021, 1, 1)),
            affiliations: vec!["Fresh".into()],
            ..Default::default()
        };
        let overridden = OverriddenField {
            debut_date: Override::pinned(Some(date(2021, 1, 1)), Some(date(2020, 6, 1))),
            ..Default::default()
        };

        overridden.apply_to(&mut vtuber);

        assert_eq!(vtuber.debut_date, Some(date(2020, 6, 1)));
        assert_eq!(vtuber.affiliations, vec!["Fresh".to_string()]);
    }

    #[test]
    fn refresh_request_without_forced_defaults_to_false() {
        let req: RefreshRequest = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(req, RefreshRequest { id: 42, forced: false });
    }

    #[test]
    fn edge_kinds_use_role_names_on_the_wire() {
        let json = serde_json::to_string(&EdgeKind::Modeler2d).unwrap();
        assert_eq!(json, "\"2D_MODELER\"");
    }

    #[test]
    fn channel_types_map_from_second_level_domains() {
        assert_eq!(ChannelType::from_second_level_domain("YouTube"), ChannelType::Youtube);
        assert_eq!(ChannelType::from_second_level_domain("nicovideo"), ChannelType::Niconico);
        assert_eq!(ChannelType::from_second_level_domain("example"), ChannelType::Other);
    }
}
