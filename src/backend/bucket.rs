//! Fixed ring arena backing one streaming voice.
//!
//! One allocation of `BUCKET_COUNT` slots of `BUCKET_LENGTH` bytes each;
//! refills rotate through the slots in order, so at most `BUCKET_COUNT`
//! buckets are ever outstanding on the voice.

use crate::base::{BUCKET_COUNT, BUCKET_LENGTH};

pub(crate) struct Bucket {
    data: Box<[u8]>,
    next: usize,
}

impl Bucket {
    pub fn new() -> Self {
        Self {
            data: vec![0u8; BUCKET_LENGTH * BUCKET_COUNT].into_boxed_slice(),
            next: 0,
        }
    }

    /// Claims the current slot and advances the rotation.
    pub fn take_slot(&mut self) -> usize {
        let slot = self.next;
        self.next = (self.next + 1) % BUCKET_COUNT;
        slot
    }

    pub fn slot(&self, index: usize) -> &[u8] {
        &self.data[index * BUCKET_LENGTH..(index + 1) * BUCKET_LENGTH]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.data[index * BUCKET_LENGTH..(index + 1) * BUCKET_LENGTH]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_rotate_modulo_count() {
        let mut b = Bucket::new();
        let taken: Vec<usize> = (0..8).map(|_| b.take_slot()).collect();
        assert_eq!(taken, vec![0, 1, 2, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn slots_are_disjoint_and_full_length() {
        let mut b = Bucket::new();
        for i in 0..BUCKET_COUNT {
            let fill = (i + 1) as u8;
            b.slot_mut(i).fill(fill);
        }
        for i in 0..BUCKET_COUNT {
            assert_eq!(b.slot(i).len(), BUCKET_LENGTH);
            assert!(b.slot(i).iter().all(|&x| x == (i + 1) as u8));
        }
    }
}
