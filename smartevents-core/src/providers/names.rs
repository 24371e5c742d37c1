use smartevents_model::ResourceId;

pub const DEFAULT_TOPIC_PREFIX: &str = "ob-";

/// Derives external resource names from managed resource ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceNames {
    prefix: String,
}

impl Default for ResourceNames {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX)
    }
}

impl ResourceNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn bridge_topic_name(&self, bridge_id: ResourceId) -> String {
        format!("{}{}", self.prefix, bridge_id)
    }

    /// Back-channel receiving events the bridge failed to deliver.
    pub fn bridge_error_topic_name(&self, bridge_id: ResourceId) -> String {
        format!("{}{}-errors", self.prefix, bridge_id)
    }

    pub fn processor_topic_name(&self, processor_id: ResourceId) -> String {
        format!("{}{}", self.prefix, processor_id)
    }

    pub fn processor_connector_name(&self, processor_id: ResourceId) -> String {
        format!("{}connector-{}", self.prefix, processor_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_topic_differs_from_data_topic() {
        let names = ResourceNames::default();
        let id = ResourceId::new();
        let data = names.bridge_topic_name(id);
        let errors = names.bridge_error_topic_name(id);
        assert!(data.starts_with("ob-"));
        assert_ne!(data, errors);
        assert!(errors.ends_with("-errors"));
    }
}
