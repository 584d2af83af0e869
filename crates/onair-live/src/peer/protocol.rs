//! Signaling documents exchanged through the store.
//!
//! Descriptions and candidates are opaque payloads; the orchestrator
//! stores and forwards them without looking inside.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

/// The shared record for one participant pair.
///
/// Every negotiation gets a fresh `negotiation_id`; the answer and all
/// candidates carry the id they belong to, so leftovers from an earlier
/// link of the same pair are recognisable and ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub offerer_id: String,
    pub answerer_id: String,
    pub negotiation_id: String,
    /// Stage status of each side when the offerer started this
    /// negotiation. The answerer only answers offers that match its own
    /// view of the room.
    pub offerer_on_stage: bool,
    pub answerer_on_stage: bool,
    #[serde(default)]
    pub offer: Option<SessionDescription>,
    #[serde(default)]
    pub answer: Option<SessionDescription>,
    /// Negotiation the answer responds to.
    #[serde(default)]
    pub answer_for: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry in an append-only candidate stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub negotiation_id: String,
    pub candidate: IceCandidate,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_uses_webrtc_field_names() {
        let desc = SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0".into(),
        };
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "offer");

        let cand = IceCandidate {
            candidate: "candidate:1".into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        };
        let json = serde_json::to_value(&cand).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }

    #[test]
    fn fresh_record_parses_without_offer_or_answer() {
        let json = serde_json::json!({
            "offerer_id": "a",
            "answerer_id": "b",
            "negotiation_id": "n1",
            "offerer_on_stage": true,
            "answerer_on_stage": false,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
        });
        let record: ConnectionRecord = serde_json::from_value(json).unwrap();
        assert!(record.offer.is_none());
        assert!(record.answer_for.is_none());
    }
}
