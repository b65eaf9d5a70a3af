// Blelloch scan. The buffer length must be a power of two and every tree
// level is its own dispatch followed by a barrier.

use std::sync::Arc;

use crate::{
    error::{Error, Result},
    render_system::compute::{AtomicBuffer, ComputeEngine},
    utils,
};

// data[k + stride - 1] += data[k + stride/2 - 1] for every block k of `stride` elements
pub fn up_sweep(engine: &dyn ComputeEngine, data: &AtomicBuffer, depth: u32) {
    let stride = 1usize << (depth + 1);
    let data = data.clone();
    engine.dispatch(
        "scan_up_sweep",
        (data.len() / stride) as u32,
        Arc::new(move |i| {
            let k = i as usize * stride;
            let left = data.load(k + stride / 2 - 1);
            data.fetch_add(k + stride - 1, left);
        }),
    );
}

pub fn clear_root(engine: &dyn ComputeEngine, data: &AtomicBuffer) {
    let data = data.clone();
    engine.dispatch(
        "scan_clear_root",
        1,
        Arc::new(move |_| data.store(data.len() - 1, 0)),
    );
}

// swaps the left child into the right slot and adds the old left value to the right
pub fn down_sweep(engine: &dyn ComputeEngine, data: &AtomicBuffer, depth: u32) {
    let stride = 1usize << (depth + 1);
    let data = data.clone();
    engine.dispatch(
        "scan_down_sweep",
        (data.len() / stride) as u32,
        Arc::new(move |i| {
            let k = i as usize * stride;
            let left_idx = k + stride / 2 - 1;
            let right_idx = k + stride - 1;
            let left = data.load(left_idx);
            let right = data.load(right_idx);
            data.store(left_idx, right);
            data.store(right_idx, right.wrapping_add(left));
        }),
    );
}

#[tracing::instrument(skip_all, fields(len = data.len()))]
pub fn exclusive_scan(engine: &dyn ComputeEngine, data: &AtomicBuffer) -> Result<()> {
    let n = data.len();
    if !n.is_power_of_two() {
        return Err(Error::Pipeline(format!(
            "scan length {n} is not a power of two"
        )));
    }
    let levels = utils::ilog2ceil(n as u32);

    for depth in 0..levels {
        up_sweep(engine, data, depth);
        engine.barrier()?;
    }

    clear_root(engine, data);
    engine.barrier()?;

    for depth in (0..levels).rev() {
        down_sweep(engine, data, depth);
        engine.barrier()?;
    }
    tracing::trace!(levels, "scan finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_system::compute::{InlineEngine, ThreadPoolEngine};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn serial_exclusive_scan(values: &[u32]) -> Vec<u32> {
        values
            .iter()
            .scan(0, |acc, &v| {
                let out = *acc;
                *acc += v;
                Some(out)
            })
            .collect()
    }

    #[test]
    fn scans_eight_elements() {
        let engine = InlineEngine::new();
        let data = AtomicBuffer::from_slice(&[3, 1, 7, 0, 4, 1, 6, 3]);
        exclusive_scan(&engine, &data).unwrap();
        assert_eq!(data.to_vec(), vec![0, 3, 4, 11, 11, 15, 16, 22]);
    }

    #[test]
    fn single_element_scans_to_zero() {
        let engine = InlineEngine::new();
        let data = AtomicBuffer::from_slice(&[5]);
        exclusive_scan(&engine, &data).unwrap();
        assert_eq!(data.to_vec(), vec![0]);
    }

    #[test]
    fn all_zero_input() {
        let engine = InlineEngine::new();
        let data = AtomicBuffer::new(16);
        exclusive_scan(&engine, &data).unwrap();
        assert!(data.to_vec().iter().all(|&v| v == 0));
    }

    #[test]
    fn matches_serial_scan_on_thread_pool() {
        let engine = ThreadPoolEngine::new(Some(4), 32);
        let mut rng = StdRng::seed_from_u64(7);
        let values: Vec<u32> = (0..1024).map(|_| rng.random_range(0..100)).collect();
        let data = AtomicBuffer::from_slice(&values);
        exclusive_scan(&engine, &data).unwrap();
        assert_eq!(data.to_vec(), serial_exclusive_scan(&values));
    }

    #[test]
    fn rejects_unpadded_length() {
        let engine = InlineEngine::new();
        let data = AtomicBuffer::new(5);
        assert!(matches!(
            exclusive_scan(&engine, &data),
            Err(Error::Pipeline(_))
        ));
    }
}
