//! Fixed-size circular buffer of raw key bytes, indexed `0..keyRingSize-1`
//! (§3 "Key material").

#[derive(Debug)]
pub struct KeyRing {
    slots: Vec<Option<Vec<u8>>>,
    current: usize,
}

impl KeyRing {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![None; size.max(1)],
            current: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Vec<u8>> {
        self.slots.get(index % self.len()).and_then(|s| s.clone())
    }

    pub fn set(&mut self, index: usize, key: Vec<u8>) {
        let len = self.len();
        let idx = index % len;
        self.slots[idx] = Some(key);
        self.current = idx;
    }

    /// The slot most recently written to, used as the default ratchet
    /// origin when the caller doesn't name an explicit index.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// The slot a ratchet derived from `from_index` should land in.
    pub fn next_index(&self, from_index: usize) -> usize {
        (from_index + 1) % self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_round_trip_within_bounds() {
        let mut ring = KeyRing::new(4);
        ring.set(2, b"key".to_vec());
        assert_eq!(ring.get(2), Some(b"key".to_vec()));
        assert_eq!(ring.get(0), None);
    }

    #[test]
    fn indices_wrap_modulo_ring_size() {
        let mut ring = KeyRing::new(4);
        ring.set(5, b"wrapped".to_vec()); // 5 % 4 == 1
        assert_eq!(ring.get(1), Some(b"wrapped".to_vec()));
        assert_eq!(ring.next_index(3), 0);
    }
}
