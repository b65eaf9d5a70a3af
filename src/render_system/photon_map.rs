use std::sync::Arc;

use crate::{
    error::{Error, Result},
    render_system::{
        compute::{AtomicBuffer, ComputeEngine, WriteOnceBuffer},
        copy_shader, count_shader,
        grid::UniformGrid,
        photon::Photon,
        scan_shader, scatter_shader,
    },
    utils,
};

/// Immutable snapshot of a finished build.
#[derive(Clone, Debug)]
pub struct PhotonMap {
    grid: UniformGrid,
    counts: Vec<u32>,
    offsets: Vec<u32>,
    photons: Vec<Photon>,
    generation: u64,
}

impl PhotonMap {
    pub fn grid(&self) -> &UniformGrid {
        &self.grid
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    // grouped by cell, in cell order
    pub fn photons(&self) -> &[Photon] {
        &self.photons
    }

    pub fn total_photons(&self) -> usize {
        self.photons.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cell_photons(&self, cell: u32) -> &[Photon] {
        let cell = cell as usize;
        match (self.offsets.get(cell), self.counts.get(cell)) {
            (Some(&start), Some(&count)) => {
                &self.photons[start as usize..(start + count) as usize]
            }
            _ => &[],
        }
    }
}

// device buffers, reused from build to build
pub struct PhotonMapBuilder {
    grid: UniformGrid,
    counts: AtomicBuffer,
    // padded to a power of two, the padding stays zero
    scan: AtomicBuffer,
    cursor: AtomicBuffer,
}

impl PhotonMapBuilder {
    pub fn new(grid: UniformGrid) -> PhotonMapBuilder {
        let num_cells = grid.num_cells();
        PhotonMapBuilder {
            grid,
            counts: AtomicBuffer::new(num_cells as usize),
            scan: AtomicBuffer::new(utils::next_power_of_two(num_cells) as usize),
            cursor: AtomicBuffer::new(num_cells as usize),
        }
    }

    pub fn grid(&self) -> &UniformGrid {
        &self.grid
    }

    #[tracing::instrument(skip_all, fields(photon_count = photons.len(), num_cells = self.grid.num_cells()))]
    pub fn build(
        &self,
        engine: &dyn ComputeEngine,
        photons: Vec<Photon>,
        generation: u64,
    ) -> Result<PhotonMap> {
        let num_cells = self.grid.num_cells() as usize;
        if num_cells == 0 {
            return Err(Error::Pipeline("photon grid has no cells".into()));
        }
        let photons: Arc<[Photon]> = photons.into();
        let rejected = AtomicBuffer::new(1);

        copy_shader::fill(engine, "clear_counts", &self.counts, 0);
        engine.barrier()?;

        count_shader::count(engine, self.grid, photons.clone(), &self.counts, &rejected);
        engine.barrier()?;

        copy_shader::copy(engine, "load_scan", &self.counts, &self.scan);
        engine.barrier()?;
        scan_shader::exclusive_scan(engine, &self.scan)?;

        copy_shader::copy(engine, "load_cursor", &self.scan, &self.cursor);
        engine.barrier()?;

        let accepted = photons.len() - rejected.load(0) as usize;
        if rejected.load(0) > 0 {
            tracing::debug!(rejected = rejected.load(0), "photons outside the grid");
        }
        let sorted = WriteOnceBuffer::new(accepted);
        scatter_shader::scatter(engine, self.grid, photons, &self.cursor, &sorted);
        engine.barrier()?;

        let counts = self.counts.to_vec();
        let mut offsets = self.scan.to_vec();
        offsets.truncate(num_cells);
        let cursor = self.cursor.to_vec();

        for cell in 0..num_cells {
            if cursor[cell] != offsets[cell] + counts[cell] {
                return Err(Error::Pipeline(format!(
                    "cell {cell}: cursor {} != offset {} + count {}",
                    cursor[cell], offsets[cell], counts[cell]
                )));
            }
        }
        let total = offsets[num_cells - 1] + counts[num_cells - 1];
        if total as usize != accepted {
            return Err(Error::Pipeline(format!(
                "offset table covers {total} photons but {accepted} were accepted"
            )));
        }

        let photons = sorted.collect(accepted)?;
        tracing::debug!(total, generation, "photon map built");
        Ok(PhotonMap {
            grid: self.grid,
            counts,
            offsets,
            photons,
            generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PhotonMapConfig,
        render_system::compute::{InlineEngine, ThreadPoolEngine},
    };
    use nalgebra::{Point3, Vector3};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn photon_at(x: f32, y: f32, z: f32, tag: u32) -> Photon {
        Photon::new(
            Point3::new(x, y, z),
            Vector3::new(0.0, -1.0, 0.0),
            Vector3::new(1.0, 0.5, 0.25),
            tag,
        )
    }

    fn random_photons(n: usize, half_extent: f32, seed: u64) -> Vec<Photon> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                photon_at(
                    rng.random_range(-half_extent..half_extent),
                    rng.random_range(-half_extent..half_extent),
                    rng.random_range(-half_extent..half_extent),
                    i as u32,
                )
            })
            .collect()
    }

    fn assert_offsets_consistent(map: &PhotonMap) {
        let counts = map.counts();
        let offsets = map.offsets();
        assert_eq!(offsets[0], 0);
        for i in 0..counts.len() - 1 {
            assert_eq!(offsets[i] + counts[i], offsets[i + 1]);
        }
        let last = counts.len() - 1;
        assert_eq!(offsets[last] + counts[last], map.total_photons() as u32);
    }

    #[test]
    fn sorts_three_photons_into_four_cells() {
        let grid = UniformGrid::new(Point3::origin(), 1.0, [4, 1, 1]);
        let builder = PhotonMapBuilder::new(grid);
        let photons = vec![
            photon_at(2.5, 0.5, 0.5, 0),
            photon_at(0.5, 0.5, 0.5, 1),
            photon_at(2.25, 0.5, 0.5, 2),
        ];
        let map = builder.build(&InlineEngine::new(), photons, 0).unwrap();

        assert_eq!(map.counts(), &[1, 0, 2, 0]);
        assert_eq!(map.offsets(), &[0, 1, 1, 3]);
        assert_eq!(map.photons()[0].depth, 1);
        let mut cell_two = map.cell_photons(2).iter().map(|p| p.depth).collect::<Vec<_>>();
        cell_two.sort();
        assert_eq!(cell_two, vec![0, 2]);
        assert!(map.cell_photons(1).is_empty());
    }

    #[test]
    fn non_power_of_two_cell_count() {
        let grid = UniformGrid::new(Point3::origin(), 1.0, [5, 1, 1]);
        let builder = PhotonMapBuilder::new(grid);
        let photons = (0..5)
            .flat_map(|cell| (0..cell + 1).map(move |j| photon_at(cell as f32 + 0.5, 0.5, 0.5, j)))
            .collect::<Vec<_>>();
        let map = builder.build(&InlineEngine::new(), photons, 0).unwrap();
        assert_eq!(map.counts(), &[1, 2, 3, 4, 5]);
        assert_eq!(map.offsets(), &[0, 1, 3, 6, 10]);
        assert_offsets_consistent(&map);
    }

    #[test]
    fn single_cell_grid() {
        let grid = UniformGrid::new(Point3::origin(), 10.0, [1, 1, 1]);
        let builder = PhotonMapBuilder::new(grid);
        let photons = vec![photon_at(1.0, 2.0, 3.0, 0), photon_at(9.0, 9.0, 9.0, 1)];
        let map = builder.build(&InlineEngine::new(), photons, 0).unwrap();
        assert_eq!(map.counts(), &[2]);
        assert_eq!(map.offsets(), &[0]);
        assert_eq!(map.cell_photons(0).len(), 2);
    }

    #[test]
    fn no_photons() {
        let builder = PhotonMapBuilder::new(UniformGrid::from_config(&PhotonMapConfig::default()));
        let map = builder.build(&InlineEngine::new(), vec![], 3).unwrap();
        assert_eq!(map.total_photons(), 0);
        assert!(map.counts().iter().all(|&c| c == 0));
        assert!(map.offsets().iter().all(|&o| o == 0));
        assert_eq!(map.generation(), 3);
    }

    #[test]
    fn out_of_grid_photons_are_dropped() {
        let grid = UniformGrid::new(Point3::origin(), 1.0, [2, 2, 2]);
        let builder = PhotonMapBuilder::new(grid);
        let photons = vec![
            photon_at(0.5, 0.5, 0.5, 0),
            photon_at(-0.5, 0.5, 0.5, 1),
            photon_at(1.5, 1.5, 2.5, 2),
        ];
        let map = builder.build(&InlineEngine::new(), photons, 0).unwrap();
        assert_eq!(map.total_photons(), 1);
        assert_eq!(map.photons()[0].depth, 0);
    }

    #[test]
    fn scatter_is_complete_and_exclusive() {
        let config = PhotonMapConfig {
            cell_size: 1.0,
            ..Default::default()
        };
        let grid = UniformGrid::from_config(&config);
        let builder = PhotonMapBuilder::new(grid);
        let photons = random_photons(5000, 8.0, 11);
        let engine = ThreadPoolEngine::new(Some(4), 64);
        let map = builder.build(&engine, photons.clone(), 0).unwrap();

        assert_offsets_consistent(&map);
        assert_eq!(map.total_photons(), photons.len());

        // every input photon lands exactly once, in the range of its own cell
        let mut seen = vec![false; photons.len()];
        for cell in 0..grid.num_cells() {
            for photon in map.cell_photons(cell) {
                assert_eq!(grid.cell_of(&photon.position), Some(cell));
                let tag = photon.depth as usize;
                assert!(!seen[tag]);
                assert_eq!(photons[tag], *photon);
                seen[tag] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn rebuilds_are_idempotent() {
        let grid = UniformGrid::from_config(&PhotonMapConfig::default());
        let builder = PhotonMapBuilder::new(grid);
        let engine = ThreadPoolEngine::new(Some(3), 16);
        let photons = random_photons(2000, 8.0, 5);

        let first = builder.build(&engine, photons.clone(), 0).unwrap();
        let second = builder.build(&engine, photons, 1).unwrap();
        assert_eq!(first.counts(), second.counts());
        assert_eq!(first.offsets(), second.offsets());
    }
}
