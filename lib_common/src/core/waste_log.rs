//! # Waste Log Domain Model
//!
//! A `WasteLogEntry` records a quantity of one material that was recycled or
//! disposed of at a construction site. Entries are created once at ingestion
//! and never updated afterwards.
//!
//! ## Wire shape
//! Fields are camelCase on the wire (`materialType`, `disposalMethod`, ...).
//! Points in time are RFC 3339 strings with millisecond precision. `date`
//! additionally accepts a bare `YYYY-MM-DD` on input. `timestamp` is owned by
//! the server: any client value is tolerated on input, whatever its shape, and
//! overwritten at ingestion. Empty or whitespace-only `binId` and `cause`
//! are read as absent, which is what an untouched form field submits.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::core::error::GreenError;

/// Material category of a waste log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaterialType {
    /// Concrete, masonry and aggregate.
    Concrete,
    /// Timber and offcuts.
    Wood,
    /// Ferrous and non-ferrous metal.
    Metal,
    /// Plastics and packaging film.
    Plastic,
    /// Glass.
    Glass,
    /// Anything else.
    Other,
}

/// What happened to the material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisposalMethod {
    /// Diverted from landfill.
    Recycled,
    /// Sent to landfill.
    Disposed,
}

/// Why the waste was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WasteCause {
    /// Leftover from cutting to size.
    Offcut,
    /// Packaging material.
    Packaging,
    /// Damaged on site or in transit.
    Damage,
    /// Work that had to be redone.
    Rework,
    /// Anything else.
    Other,
}

/// A single record of a disposed or recycled material quantity at a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WasteLogEntry {
    /// Assigned at ingestion when empty.
    #[serde(default)]
    pub id: String,
    /// Material category.
    pub material_type: MaterialType,
    /// Kilograms. Finite and non-negative once validated.
    pub quantity: f64,
    /// When the waste was generated, distinct from `timestamp`.
    #[serde(
        default,
        deserialize_with = "strict_point_in_time",
        serialize_with = "millis_rfc3339",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<DateTime<Utc>>,
    /// Free-text site name; not checked against any site list.
    pub site: String,
    /// Recycled or disposed.
    pub disposal_method: DisposalMethod,
    /// Optional bin identifier. A blank value counts as absent.
    #[serde(
        default,
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub bin_id: Option<String>,
    /// Optional cause. A blank value counts as absent.
    #[serde(
        default,
        deserialize_with = "optional_cause",
        skip_serializing_if = "Option::is_none"
    )]
    pub cause: Option<WasteCause>,
    /// Optional photo of the bin or material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Server ingestion time.
    #[serde(
        default,
        deserialize_with = "lenient_point_in_time",
        serialize_with = "millis_rfc3339",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl WasteLogEntry {
    /// Parses and validates a raw submission body.
    ///
    /// # Errors
    /// Returns `GreenError::MalformedInput` when the body is not JSON, is not
    /// a JSON object, does not match the entry schema, or carries a negative or
    /// non-finite quantity.
    pub fn from_submission(body: &[u8]) -> Result<Self, GreenError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| GreenError::MalformedInput(format!("body is not valid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Same as [`WasteLogEntry::from_submission`] for an already parsed value.
    pub fn from_value(value: Value) -> Result<Self, GreenError> {
        if !value.is_object() {
            return Err(GreenError::MalformedInput(
                "expected a JSON object".to_string(),
            ));
        }
        let entry: WasteLogEntry = serde_json::from_value(value)
            .map_err(|e| GreenError::MalformedInput(e.to_string()))?;
        entry.validate()?;
        Ok(entry)
    }

    /// Checks invariants that the type system cannot express.
    pub fn validate(&self) -> Result<(), GreenError> {
        if !self.quantity.is_finite() || self.quantity < 0.0 {
            return Err(GreenError::MalformedInput(format!(
                "quantity must be a non-negative number of kilograms, got {}",
                self.quantity
            )));
        }
        Ok(())
    }

    /// JSON value of this entry as it goes on the wire.
    pub fn to_value(&self) -> Value {
        // Every field serializes infallibly; `Null` is unreachable in practice.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Parses RFC 3339, falling back to a bare `YYYY-MM-DD` at midnight UTC.
pub fn parse_point_in_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn strict_point_in_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_point_in_time(&raw).map(Some).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid date `{raw}`: expected RFC 3339 or YYYY-MM-DD"
            ))
        }),
    }
}

fn lenient_point_in_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_str)
        .and_then(parse_point_in_time))
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|raw| !raw.trim().is_empty()))
}

fn optional_cause<'de, D>(deserializer: D) -> Result<Option<WasteCause>, D::Error>
where
    D: Deserializer<'de>,
{
    match blank_as_none(deserializer)? {
        None => Ok(None),
        Some(raw) => WasteCause::deserialize(serde::de::value::StrDeserializer::<D::Error>::new(
            raw.trim(),
        ))
        .map(Some),
    }
}

fn millis_rfc3339<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(dt) => serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_minimal_submission() {
        let body = br#"{"materialType":"Metal","quantity":500,"site":"Downtown Tower","disposalMethod":"Recycled"}"#;
        let entry = WasteLogEntry::from_submission(body).unwrap();

        assert_eq!(entry.material_type, MaterialType::Metal);
        assert_eq!(entry.quantity, 500.0);
        assert_eq!(entry.site, "Downtown Tower");
        assert_eq!(entry.disposal_method, DisposalMethod::Recycled);
        assert!(entry.id.is_empty());
        assert!(entry.timestamp.is_none());
    }

    #[test]
    fn rejects_non_json_and_non_object() {
        assert!(matches!(
            WasteLogEntry::from_submission(b"not json"),
            Err(GreenError::MalformedInput(_))
        ));
        assert!(matches!(
            WasteLogEntry::from_submission(b"[1,2,3]"),
            Err(GreenError::MalformedInput(_))
        ));
    }

    #[test]
    fn rejects_unknown_material_and_negative_quantity() {
        let unknown = json!({"materialType":"Asbestos","quantity":1,"site":"A","disposalMethod":"Disposed"});
        assert!(WasteLogEntry::from_value(unknown).is_err());

        let negative = json!({"materialType":"Wood","quantity":-3,"site":"A","disposalMethod":"Disposed"});
        let err = WasteLogEntry::from_value(negative).unwrap_err();
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn blank_cause_and_bin_are_absent() {
        let body = br#"{"materialType":"Wood","quantity":5,"date":"2024-03-01T10:00:00.000Z","site":"Harbor Yard","disposalMethod":"Recycled","binId":"","cause":"","photo":null}"#;
        let entry = WasteLogEntry::from_submission(body).unwrap();
        assert_eq!(entry.cause, None);
        assert_eq!(entry.bin_id, None);

        let entry = WasteLogEntry::from_value(json!({
            "materialType": "Wood",
            "quantity": 5,
            "site": "Harbor Yard",
            "disposalMethod": "Recycled",
            "binId": "  ",
            "cause": " Damage "
        }))
        .unwrap();
        assert_eq!(entry.cause, Some(WasteCause::Damage));
        assert_eq!(entry.bin_id, None);
    }

    #[test]
    fn unknown_cause_is_still_rejected() {
        let err = WasteLogEntry::from_value(json!({
            "materialType": "Wood",
            "quantity": 5,
            "site": "Harbor Yard",
            "disposalMethod": "Recycled",
            "cause": "Weather"
        }))
        .unwrap_err();
        assert!(matches!(err, GreenError::MalformedInput(_)));
    }

    #[test]
    fn date_accepts_plain_calendar_day() {
        let v = json!({"materialType":"Glass","quantity":2.5,"site":"A","disposalMethod":"Recycled","date":"2024-03-01"});
        let entry = WasteLogEntry::from_value(v).unwrap();
        assert_eq!(
            entry.date.unwrap().to_rfc3339_opts(SecondsFormat::Millis, true),
            "2024-03-01T00:00:00.000Z"
        );
    }

    #[test]
    fn garbage_client_timestamp_is_tolerated() {
        let v = json!({"materialType":"Glass","quantity":1,"site":"A","disposalMethod":"Recycled","timestamp":12345});
        let entry = WasteLogEntry::from_value(v).unwrap();
        assert!(entry.timestamp.is_none());
    }

    #[test]
    fn serializes_camel_case_and_skips_absent_fields() {
        let entry = WasteLogEntry::from_value(json!({
            "id": "1-1",
            "materialType": "Concrete",
            "quantity": 10,
            "site": "Hillside Complex",
            "disposalMethod": "Disposed",
            "binId": "B-7",
            "cause": "Offcut"
        }))
        .unwrap();

        let out = entry.to_value();
        assert_eq!(out["materialType"], "Concrete");
        assert_eq!(out["disposalMethod"], "Disposed");
        assert_eq!(out["binId"], "B-7");
        assert_eq!(out["cause"], "Offcut");
        assert!(out.get("imageUrl").is_none());
        assert!(out.get("timestamp").is_none());
    }
}
