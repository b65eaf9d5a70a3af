use std::sync::Arc;

use crate::render_system::{
    compute::{AtomicBuffer, ComputeEngine},
    grid::UniformGrid,
    photon::Photon,
};

// photons outside the grid only bump rejected[0]
pub fn count(
    engine: &dyn ComputeEngine,
    grid: UniformGrid,
    photons: Arc<[Photon]>,
    counts: &AtomicBuffer,
    rejected: &AtomicBuffer,
) {
    let counts = counts.clone();
    let rejected = rejected.clone();
    engine.dispatch(
        "count",
        photons.len() as u32,
        Arc::new(move |i| match grid.cell_of(&photons[i as usize].position) {
            Some(cell) => {
                counts.fetch_add(cell as usize, 1);
            }
            None => {
                rejected.fetch_add(0, 1);
            }
        }),
    );
}
