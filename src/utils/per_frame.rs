/// Fixed ring of per-frame values (command allocators, pools, ...), indexed
/// by the context's shared frame counter.
#[derive(Debug, Clone)]
pub struct PerFrame<T> {
    frames: Vec<T>,
}

impl<T> PerFrame<T> {
    pub fn from_fn<F>(num_frames: usize, make: F) -> Self
    where
        F: FnMut(usize) -> T,
    {
        Self {
            frames: (0..num_frames.max(1)).map(make).collect(),
        }
    }

    pub fn try_from_fn<F, E>(num_frames: usize, mut make: F) -> Result<Self, E>
    where
        F: FnMut(usize) -> Result<T, E>,
    {
        let mut frames = Vec::with_capacity(num_frames.max(1));
        for idx in 0..num_frames.max(1) {
            frames.push(make(idx)?);
        }
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Slot for an absolute frame number.
    pub fn get(&self, frame: usize) -> &T {
        &self.frames[frame % self.frames.len()]
    }

    pub fn get_mut(&mut self, frame: usize) -> &mut T {
        let len = self.frames.len();
        &mut self.frames[frame % len]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.frames.iter()
    }
}

impl<T: Default> PerFrame<T> {
    pub fn new(num_frames: usize) -> Self {
        Self::from_fn(num_frames, |_| T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_wrap_around() {
        let mut frames = PerFrame::<u32>::new(2);
        *frames.get_mut(0) = 5;
        assert_eq!(*frames.get(1), 0);
        assert_eq!(*frames.get(2), 5);
    }

    #[test]
    fn absolute_frame_selects_slot() {
        let frames = PerFrame::from_fn(3, |idx| idx * 10);
        assert_eq!(*frames.get(7), 10);
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn fallible_construction_stops_at_first_error() {
        let result: Result<PerFrame<usize>, &str> =
            PerFrame::try_from_fn(4, |idx| if idx == 2 { Err("full") } else { Ok(idx) });
        assert_eq!(result.err(), Some("full"));
    }
}
