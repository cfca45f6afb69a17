pub mod allocator;
pub mod normalize;

pub use allocator::HandleAllocator;
pub use normalize::{derive_slug_from_title, normalize_handle};
