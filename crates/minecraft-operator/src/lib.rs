//! Minecraft operator process pieces, kept out of `main` so they can be tested

pub mod controllers;
pub mod crds;
pub mod health;
pub mod leader;
