//! Forge installer locations

use url::Url;

use crate::error::VersionError;

/// Forge maven repository root
pub const FORGE_MAVEN_BASE: &str = "https://maven.minecraftforge.net/net/minecraftforge/forge";

/// Installer jar URL for a Minecraft/Forge version pair
///
/// Both versions end up in path segments and are escaped.
pub fn installer_url(minecraft_version: &str, forge_version: &str) -> Result<String, VersionError> {
    let combined = format!("{minecraft_version}-{forge_version}");
    let mut url = Url::parse(FORGE_MAVEN_BASE)?;
    url.path_segments_mut()
        .map_err(|_| VersionError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .push(&combined)
        .push(&format!("forge-{combined}-installer.jar"));
    Ok(url.to_string())
}

/// File name the installer produces for the server launch script arguments
pub fn installer_file_name(minecraft_version: &str, forge_version: &str) -> String {
    format!("forge-{minecraft_version}-{forge_version}-installer.jar")
}
