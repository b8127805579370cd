//! Two-slot real frame history.

use super::frame::Frame;

/// Holds exactly the two most recent real frames.
///
/// Slots alternate: a push writes over the older slot and makes it the
/// newest. The frame that becomes the older one drops its motion field, since
/// that field describes a pair that is no longer the newest two.
#[derive(Debug, Default)]
pub struct FrameHistoryBuffer {
    slots: [Option<Frame>; 2],
    newest: usize,
}

impl FrameHistoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame` as the newest, returning the evicted frame if any.
    pub fn push(&mut self, frame: Frame) -> Option<Frame> {
        if let Some(previous) = self.slots[self.newest].as_mut() {
            previous.motion = None;
        }

        let older = 1 - self.newest;
        let evicted = self.slots[older].replace(frame);
        self.newest = older;
        evicted
    }

    /// (older, newer), once two real frames exist.
    pub fn pair(&self) -> Option<(&Frame, &Frame)> {
        let newer = self.slots[self.newest].as_ref()?;
        let older = self.slots[1 - self.newest].as_ref()?;
        Some((older, newer))
    }

    pub fn newest(&self) -> Option<&Frame> {
        self.slots[self.newest].as_ref()
    }

    pub fn newest_mut(&mut self) -> Option<&mut Frame> {
        self.slots[self.newest].as_mut()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget both frames. The next push starts a fresh pair.
    pub fn reset(&mut self) {
        self.slots = [None, None];
        self.newest = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_gen::MotionField;
    use nvvk_shared::ImageHandle;

    fn frame(image: u64, ts: u64) -> Frame {
        Frame::real(ImageHandle::new(image, image), ts, None)
    }

    #[test]
    fn test_first_push_has_no_pair() {
        let mut history = FrameHistoryBuffer::new();
        assert!(history.is_empty());
        assert!(history.push(frame(1, 0)).is_none());
        assert!(history.pair().is_none());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_pair_order_and_eviction() {
        let mut history = FrameHistoryBuffer::new();
        history.push(frame(1, 0));
        history.push(frame(2, 10));

        let (older, newer) = history.pair().unwrap();
        assert_eq!(older.image.image, 1);
        assert_eq!(newer.image.image, 2);

        let evicted = history.push(frame(3, 20)).unwrap();
        assert_eq!(evicted.image.image, 1);
        let (older, newer) = history.pair().unwrap();
        assert_eq!(older.image.image, 2);
        assert_eq!(newer.image.image, 3);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_push_discards_stale_motion() {
        let mut history = FrameHistoryBuffer::new();
        history.push(frame(1, 0));

        let mut second = frame(2, 10);
        second.motion = Some(MotionField::still(16, 16, 8).unwrap());
        history.push(second);
        assert!(history.newest().unwrap().motion.is_some());

        history.push(frame(3, 20));
        let (older, _) = history.pair().unwrap();
        assert!(older.motion.is_none());
    }

    #[test]
    fn test_reset_forgets_pair() {
        let mut history = FrameHistoryBuffer::new();
        history.push(frame(1, 0));
        history.push(frame(2, 10));
        history.reset();
        assert!(history.pair().is_none());
        history.push(frame(3, 20));
        assert!(history.pair().is_none());
        assert_eq!(history.newest().unwrap().image.image, 3);
    }
}
