use crate::model::{AttrValue, MetadataAccessor, MetadataLevel};
use std::collections::BTreeMap;
use std::fmt;
use tracing::trace;

/// Position of a study within the pool: 0 for the active study, `n` for the
/// nth prior. Study rules may use `-1` to mean the last prior.
pub const ABSTRACT_PRIOR_VALUE: &str = "abstractPriorValue";

pub type AttributeCallback = Box<dyn Fn(&dyn MetadataAccessor) -> Option<AttrValue> + Send + Sync>;

/// A computed attribute: a display name plus the callback producing it.
pub struct CustomAttribute {
    pub name: String,
    callback: AttributeCallback,
}

/// Callbacks for attributes that metadata does not store natively.
#[derive(Default)]
pub struct CustomAttributeRegistry {
    attributes: BTreeMap<String, CustomAttribute>,
}

impl CustomAttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the callback computing `attribute`.
    pub fn register<F>(&mut self, attribute: &str, name: &str, callback: F)
    where
        F: Fn(&dyn MetadataAccessor) -> Option<AttrValue> + Send + Sync + 'static,
    {
        self.attributes.insert(
            attribute.to_string(),
            CustomAttribute {
                name: name.to_string(),
                callback: Box::new(callback),
            },
        );
    }

    pub fn contains(&self, attribute: &str) -> bool {
        self.attributes.contains_key(attribute)
    }

    /// Registered attribute ids with their display names.
    pub fn names(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(id, attr)| (id.as_str(), attr.name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl fmt::Debug for CustomAttributeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomAttributeRegistry")
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Resolve an attribute for one metadata object.
///
/// Order: memoized custom value, registered callback (memoized on the
/// instance after the first call), native tag. Never fails; a missing value
/// is `None`.
pub fn resolve(
    instance: &dyn MetadataAccessor,
    attribute: &str,
    registry: &CustomAttributeRegistry,
) -> Option<AttrValue> {
    if instance.custom_attribute_exists(attribute) {
        return instance.custom_attribute(attribute);
    }

    if let Some(custom) = registry.attributes.get(attribute) {
        let value = (custom.callback)(instance);
        trace!(
            level = %instance.level(),
            uid = instance.uid(),
            attribute,
            "computed custom attribute"
        );
        instance.set_custom_attribute(attribute, value.clone());
        return value;
    }

    instance.tag_value(attribute)
}

/// Registry with the attributes every viewer gets out of the box:
/// `modalitiesInStudy` (distinct series modalities of a study) and
/// `numberOfInstances` (instance count of a series or study).
pub fn builtin_registry() -> CustomAttributeRegistry {
    let mut registry = CustomAttributeRegistry::new();

    registry.register("modalitiesInStudy", "Modalities in Study", |instance| {
        if instance.level() != MetadataLevel::Study {
            return None;
        }
        let mut modalities: Vec<AttrValue> = Vec::new();
        for series in instance.children() {
            if let Some(modality) = series.tag_value("Modality") {
                if !modalities.iter().any(|m| m.loosely_equals(&modality)) {
                    modalities.push(modality);
                }
            }
        }
        Some(AttrValue::List(modalities))
    });

    registry.register("numberOfInstances", "Number of Instances", |instance| {
        let count = match instance.level() {
            MetadataLevel::Series => instance.children().len(),
            MetadataLevel::Study => instance
                .children()
                .iter()
                .map(|series| series.children().len())
                .sum(),
            MetadataLevel::Instance => return None,
        };
        Some(AttrValue::from(count as i64))
    });

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceMetadata, SeriesMetadata, StudyMetadata};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn study() -> StudyMetadata {
        StudyMetadata::new("1")
            .with_tag("StudyDescription", "CT CHEST")
            .with_series(
                SeriesMetadata::new("1.1")
                    .with_tag("Modality", "CT")
                    .with_instance(InstanceMetadata::new("1.1.1"))
                    .with_instance(InstanceMetadata::new("1.1.2")),
            )
            .with_series(SeriesMetadata::new("1.2").with_tag("Modality", "SR"))
            .with_series(SeriesMetadata::new("1.3").with_tag("Modality", "CT"))
    }

    #[test]
    fn test_native_tag_when_no_callback() {
        let registry = CustomAttributeRegistry::new();
        assert_eq!(
            resolve(&study(), "StudyDescription", &registry),
            Some("CT CHEST".into())
        );
        assert_eq!(resolve(&study(), "PatientName", &registry), None);
    }

    #[test]
    fn test_callback_is_memoized_per_instance() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = CustomAttributeRegistry::new();
        registry.register("timepointType", "Timepoint Type", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some("baseline".into())
        });

        let s = study();
        assert_eq!(resolve(&s, "timepointType", &registry), Some("baseline".into()));
        assert_eq!(resolve(&s, "timepointType", &registry), Some("baseline".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A replacement instance starts with an empty cache.
        let replaced = study();
        resolve(&replaced, "timepointType", &registry);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_existing_custom_value_wins_over_callback() {
        let mut registry = CustomAttributeRegistry::new();
        registry.register("timepointType", "Timepoint Type", |_| Some("baseline".into()));
        let s = study();
        s.set_custom_attribute("timepointType", Some("followup".into()));
        assert_eq!(resolve(&s, "timepointType", &registry), Some("followup".into()));
    }

    #[test]
    fn test_builtin_modalities_in_study() {
        let registry = builtin_registry();
        let value = resolve(&study(), "modalitiesInStudy", &registry);
        assert_eq!(
            value,
            Some(AttrValue::List(vec!["CT".into(), "SR".into()]))
        );
        assert_eq!(
            resolve(&study(), "numberOfInstances", &registry),
            Some(AttrValue::from(2))
        );
    }
}
