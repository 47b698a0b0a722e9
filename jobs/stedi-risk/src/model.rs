//! Records flowing through the enrichment pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tandem_connectors::TableRow;

use crate::decoder::Fields;
use crate::error::SerializationError;

/// One (value, score) pair of a sorted-set change notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderedSetEntry {
    pub element: Option<String>,
    pub score: Option<String>,
}

/// A change event from the key-value store's change feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileChangeEnvelope {
    pub key: Option<String>,
    pub exist_type: Option<String>,
    pub change_flag: Option<String>,
    pub increment_flag: Option<bool>,
    pub ordered_set_entries: Vec<OrderedSetEntry>,
}

impl ProfileChangeEnvelope {
    pub(crate) fn from_fields(mut fields: Fields) -> Self {
        Self {
            key: fields.take_text("key"),
            exist_type: fields.take_text("existType"),
            change_flag: fields.take_text("ch"),
            increment_flag: fields.take_bool("incr"),
            ordered_set_entries: fields.take_ordered_set().unwrap_or_default(),
        }
    }
}

/// Customer attributes carried base64-encoded inside an ordered-set entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_day: Option<String>,
}

impl CustomerProfile {
    pub(crate) fn from_fields(mut fields: Fields) -> Self {
        Self {
            customer_name: fields.take_text("customerName"),
            email: fields.take_text("email"),
            phone: fields.take_text("phone"),
            birth_day: fields.take_text("birthDay"),
        }
    }
}

/// A computed risk score for one customer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskEvent {
    pub customer: Option<String>,
    pub score: Option<f64>,
    pub risk_date: Option<NaiveDate>,
}

impl RiskEvent {
    pub(crate) fn from_fields(mut fields: Fields) -> Self {
        Self {
            customer: fields.take_text("customer"),
            score: fields.take_float("score"),
            risk_date: fields.take_date("riskDate"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.customer.is_none() && self.score.is_none() && self.risk_date.is_none()
    }
}

/// The risk side of the join: the fields kept from a [`RiskEvent`].
///
/// Buffered in join state, so every field is always serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRisk {
    pub customer: Option<String>,
    pub score: Option<f64>,
}

/// The profile side of the join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailBirthYear {
    pub email: String,
    pub birth_year: String,
}

/// A risk score joined with the matching customer's birth year.
///
/// `customer` and `email` always hold the same value: the key both sides
/// matched on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRisk {
    pub customer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub email: String,
    pub birth_year: String,
}

impl EnrichedRisk {
    pub fn join(risk: &CustomerRisk, profile: &EmailBirthYear) -> Self {
        Self {
            customer: profile.email.clone(),
            score: risk.score,
            email: profile.email.clone(),
            birth_year: profile.birth_year.clone(),
        }
    }
}

/// A record the sink can publish.
pub trait OutputRecord: Serialize + TableRow + Send + Sync + 'static {
    /// Message key for keyed destinations.
    fn key(&self) -> Option<&str>;

    /// Reject values that would not survive JSON encoding.
    fn check(&self) -> Result<(), SerializationError> {
        Ok(())
    }
}

/// Encode a record as a flat JSON object.
pub fn encode<R: OutputRecord>(record: &R) -> Result<Vec<u8>, SerializationError> {
    record.check()?;
    Ok(serde_json::to_vec(record)?)
}

fn check_score(score: Option<f64>) -> Result<(), SerializationError> {
    match score {
        Some(s) if !s.is_finite() => Err(SerializationError::NonFinite("score")),
        _ => Ok(()),
    }
}

fn score_cell(score: Option<f64>) -> String {
    score.map_or_else(|| "null".to_string(), |s| s.to_string())
}

impl OutputRecord for EnrichedRisk {
    fn key(&self) -> Option<&str> {
        Some(&self.customer)
    }

    fn check(&self) -> Result<(), SerializationError> {
        check_score(self.score)
    }
}

impl TableRow for EnrichedRisk {
    fn columns() -> &'static [&'static str] {
        &["customer", "score", "email", "birthYear"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.customer.clone(),
            score_cell(self.score),
            self.email.clone(),
            self.birth_year.clone(),
        ]
    }
}

impl OutputRecord for CustomerRisk {
    fn key(&self) -> Option<&str> {
        self.customer.as_deref()
    }

    fn check(&self) -> Result<(), SerializationError> {
        check_score(self.score)
    }
}

impl TableRow for CustomerRisk {
    fn columns() -> &'static [&'static str] {
        &["customer", "score"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.customer.clone().unwrap_or_else(|| "null".to_string()),
            score_cell(self.score),
        ]
    }
}

impl OutputRecord for EmailBirthYear {
    fn key(&self) -> Option<&str> {
        Some(&self.email)
    }
}

impl TableRow for EmailBirthYear {
    fn columns() -> &'static [&'static str] {
        &["email", "birthYear"]
    }

    fn cells(&self) -> Vec<String> {
        vec![self.email.clone(), self.birth_year.clone()]
    }
}
