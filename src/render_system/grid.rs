use nalgebra::{Point3, Vector3};

use crate::config::PhotonMapConfig;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UniformGrid {
    pub min: Point3<f32>,
    pub cell_size: f32,
    pub dims: [u32; 3],
}

impl UniformGrid {
    pub fn new(min: Point3<f32>, cell_size: f32, dims: [u32; 3]) -> UniformGrid {
        UniformGrid {
            min,
            cell_size,
            dims,
        }
    }

    pub fn from_config(config: &PhotonMapConfig) -> UniformGrid {
        let n = config.cells_per_axis();
        let h = config.scene_half_extent;
        UniformGrid::new(Point3::new(-h, -h, -h), config.cell_size, [n, n, n])
    }

    pub fn num_cells(&self) -> u32 {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    pub fn max(&self) -> Point3<f32> {
        self.min + Vector3::from(self.dims.map(|d| d as f32)) * self.cell_size
    }

    /// Returns the cell containing `position`, or `None` outside the grid.
    /// Points exactly on the far faces belong to the last cell.
    pub fn cell_3d(&self, position: &Point3<f32>) -> Option<[u32; 3]> {
        let mut cell = [0; 3];
        for axis in 0..3 {
            let rel = (position[axis] - self.min[axis]) / self.cell_size;
            let dim = self.dims[axis] as f32;
            // also rejects NaN
            if !(rel >= 0.0 && rel <= dim) {
                return None;
            }
            cell[axis] = (rel.floor() as u32).min(self.dims[axis] - 1);
        }
        Some(cell)
    }

    pub fn cell_of(&self, position: &Point3<f32>) -> Option<u32> {
        self.cell_3d(position).map(|c| self.cell_3d_to_1d(c))
    }

    pub fn cell_3d_to_1d(&self, [x, y, z]: [u32; 3]) -> u32 {
        x + y * self.dims[0] + z * self.dims[0] * self.dims[1]
    }

    pub fn cell_1d_to_3d(&self, id: u32) -> [u32; 3] {
        let [nx, ny, _] = self.dims;
        [id % nx, (id / nx) % ny, id / (nx * ny)]
    }

    pub fn neighbors(&self, center: [u32; 3], radius: u32) -> impl Iterator<Item = u32> + '_ {
        let lo = center.map(|c| c.saturating_sub(radius));
        let hi: [u32; 3] = std::array::from_fn(|a| (center[a] + radius).min(self.dims[a] - 1));
        (lo[2]..=hi[2]).flat_map(move |z| {
            (lo[1]..=hi[1])
                .flat_map(move |y| (lo[0]..=hi[0]).map(move |x| self.cell_3d_to_1d([x, y, z])))
        })
    }
}
