use crate::error::HangarError;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A resolved attribute value. Absence is represented by `Option::None`.
///
/// JSON strings stay text even when they look numeric, so identifiers such as
/// `"00123"` keep their leading zeros. Numeric comparisons parse text on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Text(String),
    Number(Decimal),
    List(Vec<AttrValue>),
}

impl AttrValue {
    /// Canonical text form used for string operators and loose equality.
    ///
    /// Numbers are normalized (`2.50` -> `2.5`), lists are joined with the
    /// DICOM multi-value delimiter.
    pub fn as_text(&self) -> String {
        match self {
            AttrValue::Bool(b) => b.to_string(),
            AttrValue::Text(s) => s.clone(),
            AttrValue::Number(n) => n.normalize().to_string(),
            AttrValue::List(items) => items
                .iter()
                .map(AttrValue::as_text)
                .collect::<Vec<_>>()
                .join("\\"),
        }
    }

    /// Numeric interpretation, if any. Text is parsed as a decimal; a
    /// single-element list is unwrapped.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            AttrValue::Number(n) => Some(*n),
            AttrValue::Text(s) => Decimal::from_str(s.trim()).ok(),
            AttrValue::List(items) if items.len() == 1 => items[0].as_decimal(),
            _ => None,
        }
    }

    /// Equality that ignores representation: numbers compare by value,
    /// everything else by canonical text.
    pub fn loosely_equals(&self, other: &AttrValue) -> bool {
        match (self, other) {
            (AttrValue::List(a), AttrValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            (AttrValue::List(a), scalar) | (scalar, AttrValue::List(a)) => {
                a.len() == 1 && a[0].loosely_equals(scalar)
            }
            _ => match (self.as_decimal(), other.as_decimal()) {
                (Some(x), Some(y)) => x == y,
                _ => self.as_text() == other.as_text(),
            },
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<Decimal> for AttrValue {
    fn from(value: Decimal) -> Self {
        AttrValue::Number(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Number(Decimal::from(value))
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Number(Decimal::from(value))
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<Vec<AttrValue>> for AttrValue {
    fn from(value: Vec<AttrValue>) -> Self {
        AttrValue::List(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataLevel {
    Study,
    Series,
    Instance,
}

impl fmt::Display for MetadataLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataLevel::Study => write!(f, "study"),
            MetadataLevel::Series => write!(f, "series"),
            MetadataLevel::Instance => write!(f, "instance"),
        }
    }
}

/// Read access to study, series or instance metadata, plus the per-instance
/// custom attribute cache.
pub trait MetadataAccessor {
    fn level(&self) -> MetadataLevel;

    fn uid(&self) -> &str;

    fn tag_value(&self, attribute: &str) -> Option<AttrValue>;

    fn custom_attribute_exists(&self, attribute: &str) -> bool;

    fn custom_attribute(&self, attribute: &str) -> Option<AttrValue>;

    /// Stores a computed value. A `None` value is remembered as "computed,
    /// but absent" so the callback is not invoked again.
    fn set_custom_attribute(&self, attribute: &str, value: Option<AttrValue>);

    /// Series of a study, instances of a series, nothing for an instance.
    fn children(&self) -> Vec<&dyn MetadataAccessor>;
}

/// Tag maps drop `null` entries: an empty DICOM element is an absent value.
fn present_tags<'de, D>(deserializer: D) -> Result<BTreeMap<String, AttrValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Option<AttrValue>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(attribute, value)| value.map(|v| (attribute, v)))
        .collect())
}

/// Memoized custom attribute values attached to one metadata object.
#[derive(Debug, Clone, Default)]
pub struct CustomAttributes(RefCell<BTreeMap<String, Option<AttrValue>>>);

impl CustomAttributes {
    fn contains(&self, attribute: &str) -> bool {
        self.0.borrow().contains_key(attribute)
    }

    fn get(&self, attribute: &str) -> Option<AttrValue> {
        self.0.borrow().get(attribute).cloned().flatten()
    }

    fn set(&self, attribute: &str, value: Option<AttrValue>) {
        self.0.borrow_mut().insert(attribute.to_string(), value);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceMetadata {
    #[serde(rename = "SOPInstanceUID")]
    pub sop_instance_uid: String,
    #[serde(default, deserialize_with = "present_tags")]
    pub tags: BTreeMap<String, AttrValue>,
    #[serde(skip)]
    custom: CustomAttributes,
}

impl InstanceMetadata {
    pub fn new(sop_instance_uid: impl Into<String>) -> Self {
        Self {
            sop_instance_uid: sop_instance_uid.into(),
            tags: BTreeMap::new(),
            custom: CustomAttributes::default(),
        }
    }

    pub fn with_tag(mut self, attribute: &str, value: impl Into<AttrValue>) -> Self {
        self.tags.insert(attribute.to_string(), value.into());
        self
    }
}

impl MetadataAccessor for InstanceMetadata {
    fn level(&self) -> MetadataLevel {
        MetadataLevel::Instance
    }

    fn uid(&self) -> &str {
        &self.sop_instance_uid
    }

    fn tag_value(&self, attribute: &str) -> Option<AttrValue> {
        if let Some(value) = self.tags.get(attribute) {
            return Some(value.clone());
        }
        (attribute == "SOPInstanceUID").then(|| AttrValue::from(self.sop_instance_uid.as_str()))
    }

    fn custom_attribute_exists(&self, attribute: &str) -> bool {
        self.custom.contains(attribute)
    }

    fn custom_attribute(&self, attribute: &str) -> Option<AttrValue> {
        self.custom.get(attribute)
    }

    fn set_custom_attribute(&self, attribute: &str, value: Option<AttrValue>) {
        self.custom.set(attribute, value);
    }

    fn children(&self) -> Vec<&dyn MetadataAccessor> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesMetadata {
    #[serde(rename = "SeriesInstanceUID")]
    pub series_instance_uid: String,
    #[serde(default, deserialize_with = "present_tags")]
    pub tags: BTreeMap<String, AttrValue>,
    #[serde(default)]
    pub instances: Vec<InstanceMetadata>,
    #[serde(skip)]
    custom: CustomAttributes,
}

impl SeriesMetadata {
    pub fn new(series_instance_uid: impl Into<String>) -> Self {
        Self {
            series_instance_uid: series_instance_uid.into(),
            tags: BTreeMap::new(),
            instances: Vec::new(),
            custom: CustomAttributes::default(),
        }
    }

    pub fn with_tag(mut self, attribute: &str, value: impl Into<AttrValue>) -> Self {
        self.tags.insert(attribute.to_string(), value.into());
        self
    }

    pub fn with_instance(mut self, instance: InstanceMetadata) -> Self {
        self.instances.push(instance);
        self
    }
}

impl MetadataAccessor for SeriesMetadata {
    fn level(&self) -> MetadataLevel {
        MetadataLevel::Series
    }

    fn uid(&self) -> &str {
        &self.series_instance_uid
    }

    fn tag_value(&self, attribute: &str) -> Option<AttrValue> {
        if let Some(value) = self.tags.get(attribute) {
            return Some(value.clone());
        }
        if attribute == "SeriesInstanceUID" {
            return Some(AttrValue::from(self.series_instance_uid.as_str()));
        }
        self.instances
            .first()
            .and_then(|instance| instance.tag_value(attribute))
    }

    fn custom_attribute_exists(&self, attribute: &str) -> bool {
        self.custom.contains(attribute)
    }

    fn custom_attribute(&self, attribute: &str) -> Option<AttrValue> {
        self.custom.get(attribute)
    }

    fn set_custom_attribute(&self, attribute: &str, value: Option<AttrValue>) {
        self.custom.set(attribute, value);
    }

    fn children(&self) -> Vec<&dyn MetadataAccessor> {
        self.instances
            .iter()
            .map(|i| i as &dyn MetadataAccessor)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyMetadata {
    #[serde(rename = "StudyInstanceUID")]
    pub study_instance_uid: String,
    #[serde(default, deserialize_with = "present_tags")]
    pub tags: BTreeMap<String, AttrValue>,
    #[serde(default)]
    pub series: Vec<SeriesMetadata>,
    #[serde(skip)]
    custom: CustomAttributes,
}

impl StudyMetadata {
    pub fn new(study_instance_uid: impl Into<String>) -> Self {
        Self {
            study_instance_uid: study_instance_uid.into(),
            tags: BTreeMap::new(),
            series: Vec::new(),
            custom: CustomAttributes::default(),
        }
    }

    pub fn with_tag(mut self, attribute: &str, value: impl Into<AttrValue>) -> Self {
        self.tags.insert(attribute.to_string(), value.into());
        self
    }

    pub fn with_series(mut self, series: SeriesMetadata) -> Self {
        self.series.push(series);
        self
    }
}

impl MetadataAccessor for StudyMetadata {
    fn level(&self) -> MetadataLevel {
        MetadataLevel::Study
    }

    fn uid(&self) -> &str {
        &self.study_instance_uid
    }

    fn tag_value(&self, attribute: &str) -> Option<AttrValue> {
        if let Some(value) = self.tags.get(attribute) {
            return Some(value.clone());
        }
        if attribute == "StudyInstanceUID" {
            return Some(AttrValue::from(self.study_instance_uid.as_str()));
        }
        self.series
            .first()
            .and_then(|series| series.tag_value(attribute))
    }

    fn custom_attribute_exists(&self, attribute: &str) -> bool {
        self.custom.contains(attribute)
    }

    fn custom_attribute(&self, attribute: &str) -> Option<AttrValue> {
        self.custom.get(attribute)
    }

    fn set_custom_attribute(&self, attribute: &str, value: Option<AttrValue>) {
        self.custom.set(attribute, value);
    }

    fn children(&self) -> Vec<&dyn MetadataAccessor> {
        self.series
            .iter()
            .map(|s| s as &dyn MetadataAccessor)
            .collect()
    }
}

/// The studies currently loaded in the viewer. The first study is the active
/// one; the remaining studies are its priors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidatePool {
    #[serde(default)]
    pub studies: Vec<StudyMetadata>,
}

impl CandidatePool {
    pub fn new(studies: Vec<StudyMetadata>) -> Self {
        Self { studies }
    }

    pub fn active_study(&self) -> Option<&StudyMetadata> {
        self.studies.first()
    }

    pub fn available_priors(&self) -> usize {
        self.studies.len().saturating_sub(1)
    }

    pub fn series_count(&self) -> usize {
        self.studies.iter().map(|s| s.series.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.series_count() == 0
    }
}

/// Parse a candidate pool from a JSON string.
pub fn parse_pool_str(json: &str) -> Result<CandidatePool, HangarError> {
    serde_json::from_str(json).map_err(|e| HangarError::PoolLoad(e.to_string()))
}

/// Load a candidate pool from a JSON file.
pub fn load_pool(path: &Path) -> Result<CandidatePool, HangarError> {
    let content = std::fs::read_to_string(path)?;
    parse_pool_str(&content)
}
