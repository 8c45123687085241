//! `server.properties` rendering
//!
//! Keys are only emitted for fields the spec sets, so the server's own
//! defaults apply everywhere else.

use std::collections::BTreeMap;

use minecraft_common::crd::{AccessMode, MinecraftServerSpec};
use minecraft_common::DEFAULT_RCON_PASSWORD;

/// Sorted key/value lines of a Java properties file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    /// Set `key`, replacing any previous value
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Value of `key`, if set
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// One `key=value` line per entry, in key order
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.0 {
            out.push_str(key);
            out.push('=');
            out.push_str(&escape(value));
            out.push('\n');
        }
        out
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Properties for a server spec
pub fn server_properties(spec: &MinecraftServerSpec) -> Properties {
    let mut props = Properties::default();
    props
        .set("enable-rcon", "true")
        .set("rcon.password", DEFAULT_RCON_PASSWORD);

    if let Some(motd) = &spec.motd {
        props.set("motd", motd.as_str());
    }
    if let Some(mode) = spec.game_mode {
        props.set("gamemode", mode.as_property());
    }
    if spec.max_players > 0 {
        props.set("max-players", spec.max_players.to_string());
    }
    if spec.view_distance > 0 {
        props.set("view-distance", spec.view_distance.to_string());
    }
    if spec.access_mode == AccessMode::AllowListOnly {
        props
            .set("white-list", "true")
            .set("enforce-whitelist", "true");
    }
    if let Some(seed) = spec.world.as_ref().and_then(|w| w.seed.as_ref()) {
        props.set("level-seed", seed.as_str());
    }
    props
}
