use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use ti99_dskimg::Geometry;

/// Optional TOML configuration for the command line tool.
///
/// ```toml
/// [defaults]
/// volume_name = "WORKDISK"
/// preset = "DSSD40"
///
/// [[geometry]]
/// name = "CFCARD"
/// sides = 2
/// tracks_per_side = 80
/// sectors_per_track = 10
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    #[serde(rename = "geometry")]
    pub geometries: Vec<CustomGeometry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub volume_name: Option<String>,
    pub preset: Option<String>,
}

/// A disk layout no built-in preset covers, used as an opening fallback for
/// images the detector does not recognize.
#[derive(Debug, Deserialize)]
pub struct CustomGeometry {
    pub name: String,
    pub sides: u8,
    pub tracks_per_side: u8,
    pub sectors_per_track: u8,
    #[serde(default = "default_density")]
    pub density: u8,
    #[serde(default = "default_sectors_per_cluster")]
    pub sectors_per_cluster: u8,
}

fn default_density() -> u8 {
    1
}

fn default_sectors_per_cluster() -> u8 {
    1
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// A configured geometry whose image length matches, if any.
    pub fn geometry_for_len(&self, len: usize) -> Option<Geometry> {
        self.geometries
            .iter()
            .map(|g| g.to_geometry())
            .find(|g| g.image_len() == len)
    }
}

impl CustomGeometry {
    pub fn to_geometry(&self) -> Geometry {
        Geometry::new(
            self.sides,
            self.tracks_per_side,
            self.sectors_per_track,
            self.density,
            self.sectors_per_cluster,
        )
    }
}
