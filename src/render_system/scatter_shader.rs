use std::sync::Arc;

use crate::render_system::{
    compute::{AtomicBuffer, ComputeEngine, WriteOnceBuffer},
    grid::UniformGrid,
    photon::Photon,
};

// `cursor` must start as a copy of the cell offsets
pub fn scatter(
    engine: &dyn ComputeEngine,
    grid: UniformGrid,
    photons: Arc<[Photon]>,
    cursor: &AtomicBuffer,
    sorted: &WriteOnceBuffer<Photon>,
) {
    let cursor = cursor.clone();
    let sorted = sorted.clone();
    engine.dispatch(
        "scatter",
        photons.len() as u32,
        Arc::new(move |i| {
            let photon = photons[i as usize];
            if let Some(cell) = grid.cell_of(&photon.position) {
                let slot = cursor.fetch_add(cell as usize, 1);
                sorted.write(slot as usize, photon);
            }
        }),
    );
}
