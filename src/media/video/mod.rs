pub mod times;
pub use times::FrameClock;
