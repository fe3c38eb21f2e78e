use video_rs as video;

/// Presentation positions for an encoder running at a fixed frame rate.
pub struct FrameClock {
    frame_duration: video::Time,
    next_pts: video::Time,
}

impl FrameClock {
    pub fn new(frame_rate: f32) -> Self {
        FrameClock {
            frame_duration: video::Time::from_secs(1.0 / frame_rate),
            next_pts: video::Time::zero(),
        }
    }

    /// Position of the next frame; advances the clock by one frame.
    pub fn tick(&mut self) -> video::Time {
        let pts = self.next_pts;
        self.next_pts = self.next_pts.aligned_with(self.frame_duration).add();
        tracing::trace!("next pts {} (frame duration {})", self.next_pts.as_secs(), self.frame_duration);
        pts
    }
}
