//! Message record types: the tagged union of categories and actions
//! a node exchanges with its neighbors, plus the fields a message can
//! carry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::node_id::NodeId;

/// Message category. `Discovery` is the peer-table
/// register/deregister protocol; `Discover` is the unrelated
/// situational-awareness candidate-selection beacon. Kept as two
/// distinct categories so the flood-eligibility table in `comm` can
/// name them separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Category {
    Discovery = 0,
    Control = 1,
    Federation = 2,
    Model = 3,
    Connection = 4,
    Discover = 5,
    Offer = 6,
    Link = 7,
    Reputation = 8,
}

impl Category {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Category::Discovery,
            1 => Category::Control,
            2 => Category::Federation,
            3 => Category::Model,
            4 => Category::Connection,
            5 => Category::Discover,
            6 => Category::Offer,
            7 => Category::Link,
            8 => Category::Reputation,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Discovery => "discovery",
            Category::Control => "control",
            Category::Federation => "federation",
            Category::Model => "model",
            Category::Connection => "connection",
            Category::Discover => "discover",
            Category::Offer => "offer",
            Category::Link => "link",
            Category::Reputation => "reputation",
        }
    }

    /// Categories that the Communications Manager re-broadcasts on
    /// receipt (after dedup)
    pub fn is_flood_eligible(self) -> bool {
        matches!(
            self,
            Category::Discovery
                | Category::Federation
                | Category::Model
                | Category::Discover
                | Category::Offer
                | Category::Link
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoveryAction {
    Discover,
    Register,
    Deregister,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlAction {
    Alive,
    Overhead,
    Mobility,
    Recovery,
    WeakLink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FederationAction {
    FederationStart,
    FederationReady,
    FederationModelsIncluded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelAction {
    Init,
    Update,
    LeadershipTransfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionAction {
    Connect,
    Disconnect,
    LateConnect,
    Restructure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoverAction {
    DiscoverCandidates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferAction {
    OfferModel,
    OfferMetric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkAction {
    ConnectTo,
    DisconnectFrom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReputationAction {
    Share,
}

/// The action carried by a message, scoped to its category. Keeping
/// these as a flat tagged enum (rather than `(Category, u8)` plus a
/// side table) means a malformed (category, action) pair is a
/// deserialization error rather than a runtime lookup failure — the
/// "explicit registration table" the design notes call for falls out
/// of the type system instead of a hand-built map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Discovery(DiscoveryAction),
    Control(ControlAction),
    Federation(FederationAction),
    Model(ModelAction),
    Connection(ConnectionAction),
    Discover(DiscoverAction),
    Offer(OfferAction),
    Link(LinkAction),
    Reputation(ReputationAction),
}

impl Action {
    pub fn category(&self) -> Category {
        match self {
            Action::Discovery(_) => Category::Discovery,
            Action::Control(_) => Category::Control,
            Action::Federation(_) => Category::Federation,
            Action::Model(_) => Category::Model,
            Action::Connection(_) => Category::Connection,
            Action::Discover(_) => Category::Discover,
            Action::Offer(_) => Category::Offer,
            Action::Link(_) => Category::Link,
            Action::Reputation(_) => Category::Reputation,
        }
    }

    /// Stable name for this action, used as the second half of the
    /// `(category, action)` dispatch key.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Discovery(DiscoveryAction::Discover) => "discover",
            Action::Discovery(DiscoveryAction::Register) => "register",
            Action::Discovery(DiscoveryAction::Deregister) => "deregister",
            Action::Control(ControlAction::Alive) => "alive",
            Action::Control(ControlAction::Overhead) => "overhead",
            Action::Control(ControlAction::Mobility) => "mobility",
            Action::Control(ControlAction::Recovery) => "recovery",
            Action::Control(ControlAction::WeakLink) => "weak_link",
            Action::Federation(FederationAction::FederationStart) => "federation_start",
            Action::Federation(FederationAction::FederationReady) => "federation_ready",
            Action::Federation(FederationAction::FederationModelsIncluded) => {
                "federation_models_included"
            }
            Action::Model(ModelAction::Init) => "init",
            Action::Model(ModelAction::Update) => "update",
            Action::Model(ModelAction::LeadershipTransfer) => "leadership_transfer",
            Action::Connection(ConnectionAction::Connect) => "connect",
            Action::Connection(ConnectionAction::Disconnect) => "disconnect",
            Action::Connection(ConnectionAction::LateConnect) => "late_connect",
            Action::Connection(ConnectionAction::Restructure) => "restructure",
            Action::Discover(DiscoverAction::DiscoverCandidates) => "discover_candidates",
            Action::Offer(OfferAction::OfferModel) => "offer_model",
            Action::Offer(OfferAction::OfferMetric) => "offer_metric",
            Action::Link(LinkAction::ConnectTo) => "connect_to",
            Action::Link(LinkAction::DisconnectFrom) => "disconnect_from",
            Action::Reputation(ReputationAction::Share) => "share",
        }
    }
}

/// A fully-formed message record, matching the wire envelope fields:
/// source is carried outside what gets digested (see
/// `message::digest`), everything else is the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub source: NodeId,
    pub action: Action,
    pub round: Option<i32>,
    pub weight: Option<f64>,
    pub args: Vec<String>,
    #[serde(with = "serde_bytes_opt")]
    pub params: Option<Bytes>,
    pub latency: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl Message {
    pub fn new(source: NodeId, action: Action) -> Self {
        Self {
            source,
            action,
            round: None,
            weight: None,
            args: Vec::new(),
            params: None,
            latency: None,
            lat: None,
            lon: None,
        }
    }

    pub fn category(&self) -> Category {
        self.action.category()
    }

    pub fn with_round(mut self, round: i32) -> Self {
        self.round = Some(round);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_params(mut self, params: Bytes) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_latency(mut self, latency: f64) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_geo(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(lat);
        self.lon = Some(lon);
        self
    }

    /// The part of the message that is digested for dedup purposes:
    /// everything except the outer source field, so a message
    /// forwarded by different intermediaries still dedups against the
    /// original sender's copy.
    pub(crate) fn digestable_payload(&self) -> Vec<u8> {
        #[derive(Serialize)]
        struct Payload<'a> {
            action: &'a Action,
            round: Option<i32>,
            weight: Option<f64>,
            args: &'a [String],
            params: Option<&'a [u8]>,
            latency: Option<f64>,
            lat: Option<f64>,
            lon: Option<f64>,
        }

        let payload = Payload {
            action: &self.action,
            round: self.round,
            weight: self.weight,
            args: &self.args,
            params: self.params.as_deref(),
            latency: self.latency,
            lat: self.lat,
            lon: self.lon,
        };

        rmp_serde::to_vec_named(&payload).unwrap_or_default()
    }
}

mod serde_bytes_opt {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&serde_bytes::Bytes::new(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let buf: Option<serde_bytes::ByteBuf> = Option::deserialize(deserializer)?;
        Ok(buf.map(|b| Bytes::from(b.into_vec())))
    }
}
