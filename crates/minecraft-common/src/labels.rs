//! Label sets on compiled children
//!
//! Equivalence is asymmetric: the live object's labels must be a superset of
//! the expected ones. Labels added by other actors are tolerated; only
//! missing keys or keys with a different value are corrected.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::{LABEL_APP, LABEL_APP_VALUE, LABEL_SERVER};

/// Labels selecting the pods of one server
pub fn pod_labels(server_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP.to_string(), LABEL_APP_VALUE.to_string()),
        (LABEL_SERVER.to_string(), server_name.to_string()),
    ])
}

/// Expected keys that are absent or carry a different value in `actual`
pub fn drifted_keys(
    actual: Option<&BTreeMap<String, String>>,
    expected: &BTreeMap<String, String>,
) -> Vec<String> {
    expected
        .iter()
        .filter(|(k, v)| actual.and_then(|a| a.get(*k)) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect()
}

/// Correct exactly the drifted keys on `meta`, returning them
///
/// An empty result means no change was made.
pub fn ensure_labels(meta: &mut ObjectMeta, expected: &BTreeMap<String, String>) -> Vec<String> {
    let drifted = drifted_keys(meta.labels.as_ref(), expected);
    if drifted.is_empty() {
        return drifted;
    }
    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    for key in &drifted {
        if let Some(value) = expected.get(key) {
            labels.insert(key.clone(), value.clone());
        }
    }
    drifted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superset_is_equivalent() {
        let expected = pod_labels("survival");
        let mut actual = expected.clone();
        actual.insert("team".to_string(), "infra".to_string());

        let mut meta = ObjectMeta {
            labels: Some(actual.clone()),
            ..Default::default()
        };
        assert!(ensure_labels(&mut meta, &expected).is_empty());
        assert_eq!(meta.labels, Some(actual));
    }

    #[test]
    fn only_the_mismatched_key_is_corrected() {
        let expected = pod_labels("survival");
        let mut meta = ObjectMeta {
            labels: Some(BTreeMap::from([
                ("app".to_string(), "minecraft".to_string()),
                ("minecraft".to_string(), "creative".to_string()),
                ("team".to_string(), "infra".to_string()),
            ])),
            ..Default::default()
        };

        let changed = ensure_labels(&mut meta, &expected);
        assert_eq!(changed, vec!["minecraft".to_string()]);

        let labels = meta.labels.expect("labels");
        assert_eq!(labels.get("minecraft").map(String::as_str), Some("survival"));
        assert_eq!(labels.get("team").map(String::as_str), Some("infra"));
    }

    #[test]
    fn absent_label_map_is_filled() {
        let expected = pod_labels("survival");
        let mut meta = ObjectMeta::default();
        let changed = ensure_labels(&mut meta, &expected);
        assert_eq!(changed.len(), 2);
        assert_eq!(meta.labels, Some(expected));
    }
}
