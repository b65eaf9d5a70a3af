use nalgebra::{Point3, Vector3};

use crate::{
    error::{Error, Result},
    render_system::compute::{AtomicBuffer, WriteOnceBuffer},
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Photon {
    pub position: Point3<f32>,
    // unit vector along the direction of travel
    pub direction: Vector3<f32>,
    pub power: Vector3<f32>,
    // bounces before this hit, 0 for the first hit after emission
    pub depth: u32,
}

impl Photon {
    pub fn new(
        position: Point3<f32>,
        direction: Vector3<f32>,
        power: Vector3<f32>,
        depth: u32,
    ) -> Photon {
        Photon {
            position,
            direction,
            power,
            depth,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PhotonBuffer {
    slots: WriteOnceBuffer<Photon>,
    counter: AtomicBuffer,
}

impl PhotonBuffer {
    pub fn with_capacity(capacity: usize) -> PhotonBuffer {
        PhotonBuffer {
            slots: WriteOnceBuffer::new(capacity),
            counter: AtomicBuffer::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    // false when full, the photon is dropped but still counted
    pub fn push(&self, photon: Photon) -> bool {
        let slot = self.counter.fetch_add(0, 1) as usize;
        slot < self.capacity() && self.slots.write(slot, photon)
    }

    pub fn pushed(&self) -> u32 {
        self.counter.load(0)
    }

    pub fn to_vec(&self) -> Result<Vec<Photon>> {
        let pushed = self.pushed() as usize;
        if pushed > self.capacity() {
            return Err(Error::Pipeline(format!(
                "{pushed} photons recorded into a buffer of {}",
                self.capacity()
            )));
        }
        self.slots.collect(pushed)
    }
}
