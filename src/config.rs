use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatherStrategy {
    // for every pixel, look up the photons in the surrounding grid cells
    #[default]
    PixelMajor,
    // for every photon, splat its power onto the pixels around its projection
    PhotonMajor,
}

impl std::str::FromStr for GatherStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pixel" | "pixel-major" | "pixel_major" => Ok(GatherStrategy::PixelMajor),
            "photon" | "photon-major" | "photon_major" => Ok(GatherStrategy::PhotonMajor),
            other => Err(Error::config(format!("unknown gather strategy '{other}'"))),
        }
    }
}

/// Tunables for the photon mapping pipeline. Every field has a default.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PhotonMapConfig {
    pub photon_budget: u32,
    // emission is clamped so that paths * max_depth fits
    pub photon_capacity: u32,
    pub max_depth: u32,
    // the grid covers [-scene_half_extent, scene_half_extent] on every axis
    pub scene_half_extent: f32,
    pub cell_size: f32,
    pub gather_radius: f32,
    // cells around the query cell visited by the pixel-major gather
    pub gather_cell_radius: u32,
    pub splat_window: u32,
    pub splat_radius: f32,
    pub workgroup_size: u32,
    // None uses all cores
    pub worker_threads: Option<usize>,
    pub seed: u64,
    pub width: u32,
    pub height: u32,
    // supersampling factor per axis
    pub scale: u32,
    pub exposure: f32,
    pub strategy: GatherStrategy,
}

impl Default for PhotonMapConfig {
    fn default() -> PhotonMapConfig {
        PhotonMapConfig {
            photon_budget: 100_000,
            photon_capacity: 200_000,
            max_depth: 2,
            scene_half_extent: 8.0,
            cell_size: 4.0,
            gather_radius: 0.5,
            gather_cell_radius: 1,
            splat_window: 5,
            splat_radius: 0.01,
            workgroup_size: 256,
            worker_threads: None,
            seed: 0,
            width: 1280,
            height: 720,
            scale: 1,
            exposure: 1.0,
            strategy: GatherStrategy::PixelMajor,
        }
    }
}

impl PhotonMapConfig {
    pub fn from_json_str(json: &str) -> Result<PhotonMapConfig> {
        let config: PhotonMapConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<PhotonMapConfig> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn cells_per_axis(&self) -> u32 {
        (2.0 * self.scene_half_extent / self.cell_size).ceil().max(1.0) as u32
    }

    pub fn render_extent(&self) -> [u32; 2] {
        [self.width * self.scale, self.height * self.scale]
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.scene_half_extent > 0.0) || !self.scene_half_extent.is_finite() {
            return Err(Error::config("scene_half_extent must be positive"));
        }
        if !(self.cell_size > 0.0) || !self.cell_size.is_finite() {
            return Err(Error::config("cell_size must be positive"));
        }
        let cells = self.cells_per_axis() as u64;
        if cells * cells * cells > u32::MAX as u64 / 2 {
            return Err(Error::config(format!(
                "grid of {cells}^3 cells does not fit a 32 bit offset table"
            )));
        }
        if !(self.gather_radius > 0.0) || !(self.splat_radius > 0.0) {
            return Err(Error::config("gather and splat radii must be positive"));
        }
        // the pixel-major gather only visits cells within gather_cell_radius
        let reach = self.gather_cell_radius as f32 * self.cell_size;
        if self.gather_radius > reach {
            return Err(Error::config(format!(
                "gather_radius {} exceeds the {reach} units covered by gather_cell_radius {}",
                self.gather_radius, self.gather_cell_radius
            )));
        }
        if self.max_depth == 0 {
            return Err(Error::config("max_depth must be at least 1"));
        }
        if self.photon_capacity < self.max_depth {
            return Err(Error::config(
                "photon_capacity cannot hold a single photon path",
            ));
        }
        if self.workgroup_size == 0 {
            return Err(Error::config("workgroup_size must be non-zero"));
        }
        if self.worker_threads == Some(0) {
            return Err(Error::config("worker_threads must be non-zero"));
        }
        if self.width == 0 || self.height == 0 || self.scale == 0 {
            return Err(Error::config("image dimensions must be non-zero"));
        }
        // three floats per render target pixel must stay addressable by a u32 invocation index
        let rt_pixels = self
            .width
            .checked_mul(self.scale)
            .zip(self.height.checked_mul(self.scale))
            .and_then(|(w, h)| w.checked_mul(h))
            .and_then(|pixels| pixels.checked_mul(3));
        if rt_pixels.is_none() {
            return Err(Error::config(format!(
                "{}x{} at scale {} is too large a render target",
                self.width, self.height, self.scale
            )));
        }
        Ok(())
    }
}
