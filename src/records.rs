//! Input/output data model. Input batches arrive either as a bare JSON array
//! of records or wrapped as `{ county, total, rows }`; unknown per-record
//! fields round-trip untouched. Output records carry explicit `null`
//! coordinates on a miss, never absent keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    #[serde(default)]
    pub org_name: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub county: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    #[serde(default)]
    pub county: String,
    #[serde(default)]
    pub total: usize,
    pub rows: Vec<Record>,
}

impl Batch {
    /// Accepts both historical input shapes: a bare array of records or a
    /// `{ county, total, rows }` wrapper.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let value: Value = serde_json::from_str(raw)?;
        match value {
            Value::Array(_) => {
                let rows: Vec<Record> = serde_json::from_value(value)?;
                Ok(Self {
                    county: String::new(),
                    total: rows.len(),
                    rows,
                })
            }
            Value::Object(ref obj) if obj.contains_key("rows") => {
                Ok(serde_json::from_value(value)?)
            }
            _ => Err(AppError::Input(
                "input JSON must be an array of records or an object with a rows array".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    Cache,
    PrimaryProvider,
    SecondaryProvider,
    StreetFallback,
    AdminFallback,
    StaticCentroid,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cache => "cache",
            Source::PrimaryProvider => "primary-provider",
            Source::SecondaryProvider => "secondary-provider",
            Source::StreetFallback => "street-fallback",
            Source::AdminFallback => "admin-fallback",
            Source::StaticCentroid => "static-centroid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cache" => Some(Source::Cache),
            "primary-provider" => Some(Source::PrimaryProvider),
            "secondary-provider" => Some(Source::SecondaryProvider),
            "street-fallback" => Some(Source::StreetFallback),
            "admin-fallback" => Some(Source::AdminFallback),
            "static-centroid" => Some(Source::StaticCentroid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApproximationLevel {
    Street,
    Admin,
    RegionTable,
}

impl ApproximationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApproximationLevel::Street => "street",
            ApproximationLevel::Admin => "admin",
            ApproximationLevel::RegionTable => "region-table",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "street" => Some(ApproximationLevel::Street),
            "admin" => Some(ApproximationLevel::Admin),
            "region-table" => Some(ApproximationLevel::RegionTable),
            _ => None,
        }
    }
}

/// Resolution outcome attached to each output record. Either `source` is set
/// and both coordinates are present, or `source` is null, both coordinates
/// are null and `miss_reason` says why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resolution {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub confidence: Option<f64>,
    pub formatted: Option<String>,
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    pub source: Option<Source>,
    pub approximation: Option<ApproximationLevel>,
    pub query_used: Option<String>,
    pub miss_reason: Option<String>,
}

impl Resolution {
    pub fn miss(reason: &str) -> Self {
        Self {
            lat: None,
            lng: None,
            confidence: None,
            formatted: None,
            components: BTreeMap::new(),
            source: None,
            approximation: None,
            query_used: None,
            miss_reason: Some(reason.to_string()),
        }
    }

    pub fn is_miss(&self) -> bool {
        self.source.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedRecord {
    #[serde(flatten)]
    pub record: Record,
    #[serde(flatten)]
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedBatch {
    pub county: String,
    pub total: usize,
    pub rows: Vec<ResolvedRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_array_input() {
        let batch = Batch::parse(r#"[{"org_name":"甲診所","address":"臺南市永康區中華路100號"}]"#)
            .unwrap();
        assert_eq!(batch.total, 1);
        assert_eq!(batch.rows[0].org_name, "甲診所");
        assert!(batch.county.is_empty());
    }

    #[test]
    fn parses_wrapped_input_and_keeps_extra_fields() {
        let batch = Batch::parse(
            r#"{"county":"臺南市","total":1,"rows":[
                {"org_name":"甲診所","address":"中華路100號","phone":"06-0000000"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(batch.county, "臺南市");
        let record = &batch.rows[0];
        assert_eq!(record.extra.get("phone").unwrap(), "06-0000000");

        let round_trip = serde_json::to_value(record).unwrap();
        assert_eq!(round_trip["phone"], "06-0000000");
    }

    #[test]
    fn rejects_malformed_input_shape() {
        assert!(Batch::parse(r#"{"not_rows": []}"#).is_err());
        assert!(Batch::parse("42").is_err());
    }

    #[test]
    fn miss_serializes_explicit_nulls() {
        let record = ResolvedRecord {
            record: Record {
                org_name: "甲診所".into(),
                address: "無法判讀".into(),
                county: None,
                extra: Map::new(),
            },
            resolution: Resolution::miss("unresolvable"),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value["lat"].is_null());
        assert!(value["lng"].is_null());
        assert!(value["source"].is_null());
        assert_eq!(value["miss_reason"], "unresolvable");
        // Keys are present, not absent.
        assert!(value.as_object().unwrap().contains_key("lat"));
    }

    #[test]
    fn source_tags_round_trip() {
        for source in [
            Source::Cache,
            Source::PrimaryProvider,
            Source::SecondaryProvider,
            Source::StreetFallback,
            Source::AdminFallback,
            Source::StaticCentroid,
        ] {
            assert_eq!(Source::parse(source.as_str()), Some(source));
            assert_eq!(
                serde_json::to_value(source).unwrap(),
                serde_json::Value::String(source.as_str().to_string())
            );
        }
        assert_eq!(ApproximationLevel::parse("region-table"), Some(ApproximationLevel::RegionTable));
        assert_eq!(Source::parse("unknown"), None);
    }
}
