//! Physical frame bitmap.
//!
//! Bit = 1 means the frame is owned by some process. Allocation is first fit,
//! scanning from frame zero.

/// Tracks which frames of simulated RAM are in use.
#[derive(Debug, Clone)]
pub struct FrameBitmap {
    bitmap: Vec<u8>,
    total_frames: u32,
    free_count: u32,
}

impl FrameBitmap {
    /// Creates a bitmap with every frame free.
    pub fn new(total_frames: u32) -> Self {
        Self {
            bitmap: vec![0; (total_frames as usize).div_ceil(8)],
            total_frames,
            free_count: total_frames,
        }
    }

    #[inline]
    fn set_bit(&mut self, frame: u32, allocated: bool) {
        let byte_idx = (frame / 8) as usize;
        let bit_idx = frame % 8;
        if allocated {
            self.bitmap[byte_idx] |= 1 << bit_idx;
        } else {
            self.bitmap[byte_idx] &= !(1 << bit_idx);
        }
    }

    /// Returns true if `frame` is in use. Out-of-range frames count as used.
    pub fn is_allocated(&self, frame: u32) -> bool {
        if frame >= self.total_frames {
            return true;
        }
        (self.bitmap[(frame / 8) as usize] >> (frame % 8)) & 1 == 1
    }

    /// Claims the first `count` free frames, lowest index first. Nothing is
    /// claimed when fewer than `count` frames are free.
    pub fn claim(&mut self, count: u32) -> Option<Vec<u32>> {
        if count > self.free_count {
            return None;
        }
        let frames: Vec<u32> = (0..self.total_frames)
            .filter(|frame| !self.is_allocated(*frame))
            .take(count as usize)
            .collect();
        for frame in &frames {
            self.set_bit(*frame, true);
        }
        self.free_count -= count;
        Some(frames)
    }

    /// Returns `frames` to the pool.
    ///
    /// Panics on a frame that is not allocated.
    pub fn release(&mut self, frames: &[u32]) {
        for frame in frames {
            if !self.is_allocated(*frame) || *frame >= self.total_frames {
                panic!("double free detected for frame {}", frame);
            }
            self.set_bit(*frame, false);
            self.free_count += 1;
        }
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> u32 {
        self.free_count
    }

    /// Returns the number of frames under management.
    pub fn total_frames(&self) -> u32 {
        self.total_frames
    }

    /// Returns the number of set bits.
    pub fn allocated_count(&self) -> u32 {
        self.bitmap.iter().map(|byte| byte.count_ones()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_first_fit() {
        let mut bitmap = FrameBitmap::new(10);
        let first = bitmap.claim(3).expect("claim should succeed");
        assert_eq!(first, vec![0, 1, 2]);
        bitmap.release(&[1]);
        let second = bitmap.claim(2).expect("claim should succeed");
        assert_eq!(second, vec![1, 3]);
        assert_eq!(bitmap.free_count(), 5);
        assert_eq!(bitmap.allocated_count(), 5);
    }

    #[test]
    fn claim_without_room_changes_nothing() {
        let mut bitmap = FrameBitmap::new(4);
        bitmap.claim(3).expect("claim should succeed");
        assert_eq!(bitmap.claim(2), None);
        assert_eq!(bitmap.free_count(), 1);
        assert!(!bitmap.is_allocated(3));
    }

    #[test]
    fn claim_zero_frames_succeeds() {
        let mut bitmap = FrameBitmap::new(0);
        assert_eq!(bitmap.claim(0), Some(Vec::new()));
    }

    #[test]
    fn frames_past_the_end_count_as_allocated() {
        let bitmap = FrameBitmap::new(9);
        assert!(!bitmap.is_allocated(8));
        assert!(bitmap.is_allocated(9));
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn release_twice_panics() {
        let mut bitmap = FrameBitmap::new(8);
        let frames = bitmap.claim(1).expect("claim should succeed");
        bitmap.release(&frames);
        bitmap.release(&frames);
    }
}
