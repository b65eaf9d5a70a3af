use std::sync::Arc;

use crate::render_system::compute::{AtomicBuffer, AtomicF32Buffer, ComputeEngine};

// sets every element of `buffer` to `value`
pub fn fill(engine: &dyn ComputeEngine, label: &'static str, buffer: &AtomicBuffer, value: u32) {
    let buffer = buffer.clone();
    engine.dispatch(
        label,
        buffer.len() as u32,
        Arc::new(move |i| buffer.store(i as usize, value)),
    );
}

pub fn clear_f32(engine: &dyn ComputeEngine, label: &'static str, buffer: &AtomicF32Buffer) {
    let buffer = buffer.clone();
    engine.dispatch(
        label,
        buffer.len() as u32,
        Arc::new(move |i| buffer.store(i as usize, 0.0)),
    );
}

// copies `src` into the front of `dst`, zero filling the rest of `dst`
pub fn copy(engine: &dyn ComputeEngine, label: &'static str, src: &AtomicBuffer, dst: &AtomicBuffer) {
    let src = src.clone();
    let dst = dst.clone();
    engine.dispatch(
        label,
        dst.len() as u32,
        Arc::new(move |i| {
            let i = i as usize;
            let value = if i < src.len() { src.load(i) } else { 0 };
            dst.store(i, value);
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_system::compute::InlineEngine;

    #[test]
    fn copy_pads_with_zero() {
        let engine = InlineEngine::new();
        let src = AtomicBuffer::from_slice(&[3, 1, 4]);
        let dst = AtomicBuffer::new(4);
        fill(&engine, "fill", &dst, 9);
        engine.barrier().unwrap();
        assert_eq!(dst.to_vec(), vec![9, 9, 9, 9]);

        copy(&engine, "copy", &src, &dst);
        engine.barrier().unwrap();
        assert_eq!(dst.to_vec(), vec![3, 1, 4, 0]);

        let acc = AtomicF32Buffer::new(3);
        acc.add(1, 2.5);
        clear_f32(&engine, "clear", &acc);
        engine.barrier().unwrap();
        assert_eq!(acc.to_vec(), vec![0.0; 3]);
    }
}
