use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicU32, Ordering},
    },
};

use threadpool::ThreadPool;

use crate::error::{Error, Result};

pub type Kernel = Arc<dyn Fn(u32) + Send + Sync>;

pub trait ComputeEngine: Send + Sync {
    // invocations of one dispatch may run in any order and overlap other
    // dispatches queued since the last barrier
    fn dispatch(&self, label: &'static str, invocations: u32, kernel: Kernel);

    // a failed invocation is reported here as Error::Device
    fn barrier(&self) -> Result<()>;
}

impl<E: ComputeEngine + ?Sized> ComputeEngine for Arc<E> {
    fn dispatch(&self, label: &'static str, invocations: u32, kernel: Kernel) {
        (**self).dispatch(label, invocations, kernel)
    }

    fn barrier(&self) -> Result<()> {
        (**self).barrier()
    }
}

struct PoolState {
    pool: ThreadPool,
    // labels of dispatches queued since the last barrier
    pending: Vec<&'static str>,
    panics_seen: usize,
}

pub struct ThreadPoolEngine {
    state: Mutex<PoolState>,
    workgroup_size: u32,
}

impl ThreadPoolEngine {
    pub fn new(worker_threads: Option<usize>, workgroup_size: u32) -> ThreadPoolEngine {
        let threads = worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        tracing::debug!(threads, workgroup_size, "starting compute workers");
        ThreadPoolEngine {
            state: Mutex::new(PoolState {
                pool: threadpool::Builder::new()
                    .num_threads(threads.max(1))
                    .thread_name("compute".into())
                    .build(),
                pending: vec![],
                panics_seen: 0,
            }),
            workgroup_size: workgroup_size.max(1),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PoolState>> {
        self.state
            .lock()
            .map_err(|_| Error::Device("compute engine state poisoned".into()))
    }
}

impl ComputeEngine for ThreadPoolEngine {
    fn dispatch(&self, label: &'static str, invocations: u32, kernel: Kernel) {
        let Ok(mut state) = self.lock() else {
            tracing::error!(label, "dropping dispatch on poisoned engine");
            return;
        };
        state.pending.push(label);
        let mut start = 0;
        while start < invocations {
            let end = invocations.min(start.saturating_add(self.workgroup_size));
            let kernel = kernel.clone();
            state.pool.execute(move || {
                for idx in start..end {
                    kernel(idx);
                }
            });
            start = end;
        }
    }

    fn barrier(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.pool.join();
        let panics = state.pool.panic_count();
        let pending = std::mem::take(&mut state.pending);
        if panics > state.panics_seen {
            let failed = panics - state.panics_seen;
            state.panics_seen = panics;
            return Err(Error::Device(format!(
                "{failed} workgroup(s) failed in dispatches {pending:?}"
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InlineEngine {
    failed: Mutex<Vec<&'static str>>,
}

impl InlineEngine {
    pub fn new() -> InlineEngine {
        InlineEngine::default()
    }
}

impl ComputeEngine for InlineEngine {
    fn dispatch(&self, label: &'static str, invocations: u32, kernel: Kernel) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            for idx in 0..invocations {
                kernel(idx);
            }
        }));
        if outcome.is_err() {
            if let Ok(mut failed) = self.failed.lock() {
                failed.push(label);
            }
        }
    }

    fn barrier(&self) -> Result<()> {
        let mut failed = self
            .failed
            .lock()
            .map_err(|_| Error::Device("compute engine state poisoned".into()))?;
        if failed.is_empty() {
            Ok(())
        } else {
            let failed = std::mem::take(&mut *failed);
            Err(Error::Device(format!("dispatches {failed:?} failed")))
        }
    }
}

#[derive(Clone, Debug)]
pub struct AtomicBuffer(Arc<[AtomicU32]>);

impl AtomicBuffer {
    pub fn new(len: usize) -> AtomicBuffer {
        AtomicBuffer((0..len).map(|_| AtomicU32::new(0)).collect())
    }

    pub fn from_slice(values: &[u32]) -> AtomicBuffer {
        AtomicBuffer(values.iter().map(|&v| AtomicU32::new(v)).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn load(&self, idx: usize) -> u32 {
        self.0[idx].load(Ordering::Acquire)
    }

    pub fn store(&self, idx: usize, value: u32) {
        self.0[idx].store(value, Ordering::Release)
    }

    pub fn fetch_add(&self, idx: usize, value: u32) -> u32 {
        self.0[idx].fetch_add(value, Ordering::AcqRel)
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.0.iter().map(|v| v.load(Ordering::Acquire)).collect()
    }
}

// adds are compare-and-swap loops over the bit pattern
#[derive(Clone, Debug)]
pub struct AtomicF32Buffer(Arc<[AtomicU32]>);

impl AtomicF32Buffer {
    pub fn new(len: usize) -> AtomicF32Buffer {
        AtomicF32Buffer((0..len).map(|_| AtomicU32::new(0f32.to_bits())).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn load(&self, idx: usize) -> f32 {
        f32::from_bits(self.0[idx].load(Ordering::Acquire))
    }

    pub fn store(&self, idx: usize, value: f32) {
        self.0[idx].store(value.to_bits(), Ordering::Release)
    }

    pub fn add(&self, idx: usize, value: f32) {
        let slot = &self.0[idx];
        let mut current = slot.load(Ordering::Relaxed);
        loop {
            let next = (f32::from_bits(current) + value).to_bits();
            match slot.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.0
            .iter()
            .map(|v| f32::from_bits(v.load(Ordering::Acquire)))
            .collect()
    }
}

/// Buffer whose slots are each written at most once per use.
///
/// A second write to the same slot, or a write past the end, is dropped and
/// counted as a conflict so the pass that owns the buffer can report it
/// after the barrier.
#[derive(Clone, Debug)]
pub struct WriteOnceBuffer<T> {
    slots: Arc<[OnceLock<T>]>,
    conflicts: Arc<AtomicU32>,
}

impl<T> WriteOnceBuffer<T> {
    pub fn new(len: usize) -> WriteOnceBuffer<T> {
        WriteOnceBuffer {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
            conflicts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn write(&self, idx: usize, value: T) -> bool {
        let written = self
            .slots
            .get(idx)
            .is_some_and(|slot| slot.set(value).is_ok());
        if !written {
            self.conflicts.fetch_add(1, Ordering::AcqRel);
        }
        written
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx).and_then(OnceLock::get)
    }

    pub fn conflicts(&self) -> u32 {
        self.conflicts.load(Ordering::Acquire)
    }

    // slots still shared with another handle are replaced by a fresh allocation
    pub fn reset(&mut self) {
        match Arc::get_mut(&mut self.slots) {
            Some(slots) => {
                for slot in slots.iter_mut() {
                    slot.take();
                }
            }
            None => self.slots = (0..self.slots.len()).map(|_| OnceLock::new()).collect(),
        }
        self.conflicts = Arc::new(AtomicU32::new(0));
    }
}

impl<T: Clone> WriteOnceBuffer<T> {
    // the first `len` slots must all have been written
    pub fn collect(&self, len: usize) -> Result<Vec<T>> {
        if self.conflicts() > 0 {
            return Err(Error::Pipeline(format!(
                "{} conflicting writes to a write-once buffer",
                self.conflicts()
            )));
        }
        if len > self.len() {
            return Err(Error::Pipeline(format!(
                "requested {len} slots from a buffer of {}",
                self.len()
            )));
        }
        self.slots[..len]
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.get()
                    .cloned()
                    .ok_or_else(|| Error::Pipeline(format!("slot {i} was never written")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engines() -> Vec<Box<dyn ComputeEngine>> {
        vec![
            Box::new(InlineEngine::new()),
            Box::new(ThreadPoolEngine::new(Some(4), 16)),
        ]
    }

    #[test]
    fn every_invocation_runs_once() {
        for engine in engines() {
            let hits = AtomicBuffer::new(1000);
            let h = hits.clone();
            engine.dispatch("mark", 1000, Arc::new(move |i| {
                h.fetch_add(i as usize, 1);
            }));
            engine.barrier().unwrap();
            assert!(hits.to_vec().iter().all(|&c| c == 1));
        }
    }

    #[test]
    fn panicking_kernel_is_a_device_error() {
        for engine in engines() {
            engine.dispatch("explode", 40, Arc::new(|i| {
                if i == 17 {
                    panic!("invocation {i} failed");
                }
            }));
            let err = engine.barrier().unwrap_err();
            assert!(matches!(err, Error::Device(_)));
            assert!(err.is_transient());

            // the engine keeps working afterwards
            engine.dispatch("noop", 8, Arc::new(|_| {}));
            engine.barrier().unwrap();
        }
    }

    #[test]
    fn float_adds_accumulate() {
        let engine = ThreadPoolEngine::new(Some(4), 8);
        let acc = AtomicF32Buffer::new(1);
        let a = acc.clone();
        engine.dispatch("sum", 256, Arc::new(move |_| a.add(0, 0.5)));
        engine.barrier().unwrap();
        assert_eq!(acc.load(0), 128.0);
    }

    #[test]
    fn write_once_detects_conflicts() {
        let mut buf = WriteOnceBuffer::new(2);
        assert!(buf.write(0, 7u32));
        assert!(!buf.write(0, 8));
        assert!(!buf.write(5, 8));
        assert_eq!(buf.conflicts(), 2);
        assert!(matches!(buf.collect(1), Err(Error::Pipeline(_))));

        buf.reset();
        assert_eq!(buf.get(0), None);
        buf.write(0, 1);
        buf.write(1, 2);
        assert_eq!(buf.collect(2).unwrap(), vec![1, 2]);
        assert!(buf.collect(3).is_err());
    }
}
