//! CRD generation and installation

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use minecraft_common::crd::{MinecraftBackup, MinecraftServer};
use minecraft_common::FIELD_MANAGER;

/// Every CRD this operator serves
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![MinecraftServer::crd(), MinecraftBackup::crd()]
}

/// All CRDs as one multi-document YAML stream
pub fn crds_yaml() -> Result<String, serde_yaml::Error> {
    let docs = all_crds()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(docs.join("---\n"))
}

/// Install or update every CRD with server-side apply
///
/// Run on startup so the installed schemas always match this binary.
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "installing CRD");
        api.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install CRD {name}: {e}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_kinds_are_generated_in_the_api_group() {
        let names: Vec<String> = all_crds()
            .into_iter()
            .filter_map(|crd| crd.metadata.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "minecraftservers.minecraft.jameslaverack.com",
                "minecraftbackups.minecraft.jameslaverack.com",
            ]
        );
    }

    #[test]
    fn yaml_stream_has_one_document_per_crd() {
        let yaml = crds_yaml().expect("yaml");
        assert_eq!(yaml.matches("kind: CustomResourceDefinition").count(), 2);
        assert_eq!(yaml.matches("---\n").count(), 1);
    }
}
