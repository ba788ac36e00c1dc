//! Rule descriptor model: the shape a data-quality rule takes before validation,
//! after validation, and as the deployment payload.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved column names for table-level checks that do not target a column.
pub const TABLE_LEVEL_COLUMNS: [&str; 3] = ["RECORD_COUNT", "STALE_COUNT", "STALE_CONTEXT"];

// ---------------------------------------------------------------------------
// RuleType
// ---------------------------------------------------------------------------

/// Kind of check. The set is open: unknown names survive as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleType {
    Mean,
    Sum,
    RecordCount,
    StaleCount,
    StaleContext,
    NullCount,
    MeanVariance,
    MedianVariance,
    Other(String),
}

impl RuleType {
    pub fn as_str(&self) -> &str {
        match self {
            RuleType::Mean => "MEAN",
            RuleType::Sum => "SUM",
            RuleType::RecordCount => "RECORD_COUNT",
            RuleType::StaleCount => "STALE_COUNT",
            RuleType::StaleContext => "STALE_CONTEXT",
            RuleType::NullCount => "NULL_COUNT",
            RuleType::MeanVariance => "MEAN_VARIANCE",
            RuleType::MedianVariance => "MEDIAN_VARIANCE",
            RuleType::Other(s) => s,
        }
    }

    /// Table-level counters whose `PREVIOUS` baseline is a ratio pinned to 1.0.
    pub fn is_table_level(&self) -> bool {
        matches!(
            self,
            RuleType::RecordCount | RuleType::StaleCount | RuleType::StaleContext
        )
    }
}

impl From<String> for RuleType {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "MEAN" => RuleType::Mean,
            "SUM" => RuleType::Sum,
            "RECORD_COUNT" => RuleType::RecordCount,
            "STALE_COUNT" => RuleType::StaleCount,
            "STALE_CONTEXT" => RuleType::StaleContext,
            "NULL_COUNT" => RuleType::NullCount,
            "MEAN_VARIANCE" => RuleType::MeanVariance,
            "MEDIAN_VARIANCE" => RuleType::MedianVariance,
            _ => RuleType::Other(s),
        }
    }
}

impl From<RuleType> for String {
    fn from(t: RuleType) -> Self {
        match t {
            RuleType::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// BaselineSource / RuleDetails / AttributeCheck
// ---------------------------------------------------------------------------

/// Where the comparison baseline comes from. Input is case-insensitive and
/// a missing or `null` value means `CONFIG`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BaselineSource {
    #[default]
    Config,
    Previous,
}

impl<'de> Deserialize<'de> for BaselineSource {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(BaselineSource::Config),
            Some(s) if s.eq_ignore_ascii_case("CONFIG") => Ok(BaselineSource::Config),
            Some(s) if s.eq_ignore_ascii_case("PREVIOUS") => Ok(BaselineSource::Previous),
            Some(other) => Err(serde::de::Error::unknown_variant(other, &["CONFIG", "PREVIOUS"])),
        }
    }
}

impl fmt::Display for BaselineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaselineSource::Config => f.write_str("CONFIG"),
            BaselineSource::Previous => f.write_str("PREVIOUS"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDetails {
    pub baseline_value: f64,
    #[serde(default)]
    pub threshold_value: Option<f64>,
}

/// One concrete check within a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeCheck {
    #[serde(default)]
    pub column_name: String,
    pub rule_type: RuleType,
    #[serde(default)]
    pub baseline_source: BaselineSource,
    pub rule_details: RuleDetails,
}

impl AttributeCheck {
    /// True when `column_name` is one of the reserved table-level names.
    pub fn targets_table(&self) -> bool {
        TABLE_LEVEL_COLUMNS.contains(&self.column_name.as_str())
    }
}

// ---------------------------------------------------------------------------
// RuleDescriptor — pre-validation
// ---------------------------------------------------------------------------

/// A rule as produced by the interpreter, still naming its repository.
///
/// Unknown top-level fields are kept in `extra` so they survive until the
/// payload projection drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDescriptor {
    #[serde(default)]
    pub rule_name: String,
    #[serde(default)]
    pub db_name: String,
    #[serde(default)]
    pub dataset_name: String,
    #[serde(default)]
    pub repository_name: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeCheck>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RuleDescriptor {
    /// The repository to resolve, if one was supplied. Blank names count as missing.
    pub fn repository(&self) -> Option<&str> {
        self.repository_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Swap the repository name for its connectivity id.
    ///
    /// Consumes the descriptor so the two identifiers never coexist.
    pub fn into_validated(self, connectivity_id: impl Into<String>) -> ValidatedRule {
        let mut extra = self.extra;
        extra.remove("connectivity_id");
        ValidatedRule {
            rule_name: self.rule_name,
            db_name: self.db_name,
            dataset_name: self.dataset_name,
            connectivity_id: connectivity_id.into(),
            attributes: self.attributes,
            extra,
        }
    }
}

// ---------------------------------------------------------------------------
// ValidatedRule — post-validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedRule {
    pub rule_name: String,
    pub db_name: String,
    pub dataset_name: String,
    pub connectivity_id: String,
    pub attributes: Vec<AttributeCheck>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// RulePayload — deployment API request body
// ---------------------------------------------------------------------------

/// Exactly the five fields the deployment API accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulePayload {
    pub rule_name: String,
    pub db_name: String,
    pub dataset_name: String,
    pub connectivity_id: String,
    pub attributes: Vec<AttributeCheck>,
}
