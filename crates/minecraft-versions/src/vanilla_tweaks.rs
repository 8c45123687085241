//! VanillaTweaks datapack bundles
//!
//! The service zips the requested datapacks on demand and answers with a
//! relative link to the bundle.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::VersionError;

/// Site root; bundle links are relative to it
pub const VANILLA_TWEAKS_BASE: &str = "https://vanillatweaks.net";

/// Endpoint building datapack bundles
pub const ZIP_DATAPACKS_PATH: &str = "/assets/server/zipdatapacks.php";

/// `major.minor` of a version; VanillaTweaks ignores patch releases
pub fn minor_version(version: &str) -> &str {
    match version.match_indices('.').nth(1) {
        Some((idx, _)) => &version[..idx],
        None => version,
    }
}

/// Group datapack names by category, the shape the service expects
pub fn packs_by_category<'a, I>(packs: I) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (category, name) in packs {
        grouped
            .entry(category.to_string())
            .or_default()
            .push(name.to_string());
    }
    grouped
}

/// Form fields for a bundle request
pub fn request_form(
    version: &str,
    packs: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<(&'static str, String)>, serde_json::Error> {
    Ok(vec![
        ("version", minor_version(version).to_string()),
        ("packs", serde_json::to_string(packs)?),
    ])
}

/// Response body of a bundle request
#[derive(Debug, Deserialize)]
pub struct BundleResponse {
    /// "success" when the bundle was built
    #[serde(default)]
    pub status: Option<String>,
    /// Site-relative path of the bundle
    #[serde(default)]
    pub link: Option<String>,
}

/// Absolute download URL of a built bundle
pub fn bundle_url(response: BundleResponse) -> Result<String, VersionError> {
    match response.status.as_deref() {
        Some("success") => {}
        Some(other) => {
            return Err(VersionError::VanillaTweaks {
                message: format!("status {other}"),
            })
        }
        None => {
            return Err(VersionError::VanillaTweaks {
                message: "response has no status".to_string(),
            })
        }
    }
    let link = response.link.ok_or_else(|| VersionError::VanillaTweaks {
        message: "response has no link".to_string(),
    })?;
    Ok(format!("{VANILLA_TWEAKS_BASE}{link}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_version_strips_patch() {
        assert_eq!(minor_version("1.18.2"), "1.18");
        assert_eq!(minor_version("1.18"), "1.18");
        assert_eq!(minor_version("1"), "1");
        assert_eq!(minor_version("1.20.4.1"), "1.20");
    }

    #[test]
    fn packs_are_grouped_by_category() {
        let grouped = packs_by_category([
            ("survival", "graves"),
            ("items", "armored elytra"),
            ("survival", "unlock all recipes"),
        ]);
        assert_eq!(
            grouped.get("survival"),
            Some(&vec!["graves".to_string(), "unlock all recipes".to_string()])
        );
        assert_eq!(grouped.len(), 2);
    }

    #[test]
    fn form_carries_minor_version_and_json_packs() {
        let grouped = packs_by_category([("survival", "graves")]);
        let form = request_form("1.18.2", &grouped).expect("form");
        assert_eq!(form[0], ("version", "1.18".to_string()));
        assert_eq!(form[1], ("packs", r#"{"survival":["graves"]}"#.to_string()));
    }

    #[test]
    fn successful_bundle_link() {
        let resp: BundleResponse =
            serde_json::from_str(r#"{"status":"success","link":"/download/VanillaTweaks_d123.zip"}"#)
                .expect("parse");
        assert_eq!(
            bundle_url(resp).expect("url"),
            "https://vanillatweaks.net/download/VanillaTweaks_d123.zip"
        );
    }

    #[test]
    fn failed_bundle_status() {
        let resp: BundleResponse = serde_json::from_str(r#"{"status":"error"}"#).expect("parse");
        assert!(matches!(bundle_url(resp), Err(VersionError::VanillaTweaks { .. })));
    }

    #[test]
    fn missing_link() {
        let resp: BundleResponse = serde_json::from_str(r#"{"status":"success"}"#).expect("parse");
        assert!(bundle_url(resp).is_err());
    }
}
