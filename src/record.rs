use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};

/// Damage categories the model was trained on, in class-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DamageKind {
    #[serde(rename = "Bodypanel-Dent")]
    BodypanelDent,
    #[serde(rename = "Front-Windscreen-Damage")]
    FrontWindscreenDamage,
    #[serde(rename = "Headlight-Damage")]
    HeadlightDamage,
    #[serde(rename = "Rear-windscreen-Damage")]
    RearWindscreenDamage,
    #[serde(rename = "RunningBoard-Dent")]
    RunningBoardDent,
    #[serde(rename = "Sidemirror-Damage")]
    SidemirrorDamage,
    #[serde(rename = "Signlight-Damage")]
    SignlightDamage,
    #[serde(rename = "Taillight-Damage")]
    TaillightDamage,
    #[serde(rename = "bonnet-dent")]
    BonnetDent,
    #[serde(rename = "boot-dent")]
    BootDent,
    #[serde(rename = "doorouter-dent")]
    DoorouterDent,
    #[serde(rename = "fender-dent")]
    FenderDent,
    #[serde(rename = "front-bumper-dent")]
    FrontBumperDent,
    #[serde(rename = "pillar-dent")]
    PillarDent,
    #[serde(rename = "quaterpanel-dent")]
    QuaterpanelDent,
    #[serde(rename = "rear-bumper-dent")]
    RearBumperDent,
    #[serde(rename = "roof-dent")]
    RoofDent,
}

const ALL_KINDS: [DamageKind; 17] = [
    DamageKind::BodypanelDent,
    DamageKind::FrontWindscreenDamage,
    DamageKind::HeadlightDamage,
    DamageKind::RearWindscreenDamage,
    DamageKind::RunningBoardDent,
    DamageKind::SidemirrorDamage,
    DamageKind::SignlightDamage,
    DamageKind::TaillightDamage,
    DamageKind::BonnetDent,
    DamageKind::BootDent,
    DamageKind::DoorouterDent,
    DamageKind::FenderDent,
    DamageKind::FrontBumperDent,
    DamageKind::PillarDent,
    DamageKind::QuaterpanelDent,
    DamageKind::RearBumperDent,
    DamageKind::RoofDent,
];

impl DamageKind {
    pub fn all() -> &'static [DamageKind] {
        &ALL_KINDS
    }

    pub fn from_index(class_index: usize) -> Option<DamageKind> {
        ALL_KINDS.get(class_index).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            DamageKind::BodypanelDent => "Bodypanel-Dent",
            DamageKind::FrontWindscreenDamage => "Front-Windscreen-Damage",
            DamageKind::HeadlightDamage => "Headlight-Damage",
            DamageKind::RearWindscreenDamage => "Rear-windscreen-Damage",
            DamageKind::RunningBoardDent => "RunningBoard-Dent",
            DamageKind::SidemirrorDamage => "Sidemirror-Damage",
            DamageKind::SignlightDamage => "Signlight-Damage",
            DamageKind::TaillightDamage => "Taillight-Damage",
            DamageKind::BonnetDent => "bonnet-dent",
            DamageKind::BootDent => "boot-dent",
            DamageKind::DoorouterDent => "doorouter-dent",
            DamageKind::FenderDent => "fender-dent",
            DamageKind::FrontBumperDent => "front-bumper-dent",
            DamageKind::PillarDent => "pillar-dent",
            DamageKind::QuaterpanelDent => "quaterpanel-dent",
            DamageKind::RearBumperDent => "rear-bumper-dent",
            DamageKind::RoofDent => "roof-dent",
        }
    }
}

impl fmt::Display for DamageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a frame came from. Serialised as the uploaded file's path, or the
/// `live_feed` sentinel for camera frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    File(PathBuf),
    LiveFeed,
}

impl Origin {
    pub const LIVE_FEED: &'static str = "live_feed";

    pub fn file(path: &Path) -> Self {
        Origin::File(path.to_path_buf())
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Origin::File(path) => write!(f, "{}", path.display()),
            Origin::LiveFeed => f.write_str(Self::LIVE_FEED),
        }
    }
}

impl Serialize for Origin {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Origin {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == Self::LIVE_FEED {
            Ok(Origin::LiveFeed)
        } else {
            Ok(Origin::File(PathBuf::from(raw)))
        }
    }
}

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    #[serde(rename = "type")]
    pub kind: DamageKind,
    pub confidence: f64,
    pub timestamp: String,
    pub file_path: Origin,
}

impl DetectionRecord {
    /// Stamps a record with the current local time.
    pub fn new(kind: DamageKind, confidence: f64, origin: Origin) -> Self {
        Self {
            kind,
            confidence,
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            file_path: origin,
        }
    }
}

/// Rounds a raw model score to two decimals, the precision that is logged and shown.
pub fn round_confidence(score: f32) -> f64 {
    (score as f64 * 100.0).round() / 100.0
}
