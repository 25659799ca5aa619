//! core/fifo.rs — host blocks of any length → fixed analysis frames.
//!
//! The host may call with 1..N samples per channel; the transform wants exactly
//! `frame_size` samples per channel. `fill()` copies as much as fits and reports
//! how many input samples it consumed; the caller runs one analysis pass each
//! time `is_full()` turns true and then calls `reset()`.

/// Per-channel frame accumulator.
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    frame: Vec<Vec<f32>>,
    frame_size: usize,
    index: usize,
}

impl FrameBuffer {
    pub fn new(n_channels: usize, frame_size: usize) -> Self {
        assert!(frame_size > 0);
        Self {
            frame: vec![vec![0.0; frame_size]; n_channels],
            frame_size,
            index: 0,
        }
    }

    #[inline]
    pub fn n_channels(&self) -> usize {
        self.frame.len()
    }

    #[inline]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Current fill index, always in `[0, frame_size)` between calls of the
    /// fill/reset cycle.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.index == self.frame_size
    }

    /// The completed frame, one slice per configured channel.
    #[inline]
    pub fn frame(&self) -> &[Vec<f32>] {
        &self.frame
    }

    /// Copy samples `[offset, n_samples)` of every input channel into the frame,
    /// up to the free space. Returns the number of samples consumed.
    ///
    /// Input channels beyond the configured count are ignored. Configured
    /// channels without input (or with a shorter slice) are zero-filled.
    pub fn fill<S: AsRef<[f32]>>(&mut self, inputs: &[S], offset: usize, n_samples: usize) -> usize {
        let take = (self.frame_size - self.index).min(n_samples.saturating_sub(offset));
        if take == 0 {
            return 0;
        }
        let dst_range = self.index..self.index + take;
        for (ch, dst) in self.frame.iter_mut().enumerate() {
            let dst = &mut dst[dst_range.clone()];
            let src = inputs.get(ch).map(|s| s.as_ref()).unwrap_or(&[]);
            let avail = src.len().saturating_sub(offset).min(take);
            if avail > 0 {
                dst[..avail].copy_from_slice(&src[offset..offset + avail]);
            }
            dst[avail..].fill(0.0);
        }
        self.index += take;
        take
    }

    /// Start a new frame.
    #[inline]
    pub fn reset(&mut self) {
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_complete_independent_of_block_size() {
        for block in [1usize, 7, 64, 100, 1024, 3000] {
            let mut fifo = FrameBuffer::new(2, 256);
            let input: Vec<f32> = (0..block).map(|i| i as f32).collect();
            let mut frames = 0usize;
            let mut total = 0usize;
            while total < 256 * 4 {
                let mut offset = 0;
                while offset < block {
                    offset += fifo.fill(&[&input[..], &input[..]], offset, block);
                    if fifo.is_full() {
                        frames += 1;
                        fifo.reset();
                    }
                    assert!(fifo.index() < 256);
                }
                total += block;
            }
            assert_eq!(frames, total / 256, "block={block}");
        }
    }

    #[test]
    fn missing_and_extra_channels() {
        let mut fifo = FrameBuffer::new(3, 4);
        let a = [1.0f32, 2.0, 3.0, 4.0];
        let b = [5.0f32, 6.0];
        // channel 1 is short, channel 2 is absent
        let used = fifo.fill(&[&a[..], &b[..]], 0, 4);
        assert_eq!(used, 4);
        assert!(fifo.is_full());
        assert_eq!(fifo.frame()[0], vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(fifo.frame()[1], vec![5.0, 6.0, 0.0, 0.0]);
        assert_eq!(fifo.frame()[2], vec![0.0; 4]);

        fifo.reset();
        let extra = [9.0f32; 4];
        fifo.fill(&[&a[..], &a[..], &a[..], &extra[..]], 0, 4);
        assert_eq!(fifo.n_channels(), 3);
        assert_eq!(fifo.frame()[2], vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn offset_continues_inside_block() {
        let mut fifo = FrameBuffer::new(1, 3);
        let x = [1.0f32, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(fifo.fill(&[&x[..]], 0, 5), 3);
        assert_eq!(fifo.frame()[0], vec![1.0, 2.0, 3.0]);
        fifo.reset();
        assert_eq!(fifo.fill(&[&x[..]], 3, 5), 2);
        assert_eq!(fifo.index(), 2);
        assert_eq!(&fifo.frame()[0][..2], &[4.0, 5.0]);
    }
}
