pub mod hot;
pub mod warm;

pub use hot::HotTier;
pub use warm::WarmTier;
