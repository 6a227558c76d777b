//! A resizable, indexable sequence container optimized for two access
//! patterns: small collections are kept entirely inline with no heap
//! allocation, and larger collections share a single reference counted
//! heap buffer across copies (copy-on-write).
//!
//! [`CowVector<T, N>`] behaves observably like an ordinary owning vector:
//! copies are independent and mutation through one copy never affects
//! another. Cloning a vector in its shared representation is O(1) and
//! performs no element copies; the first mutation of either copy forks a
//! private buffer.
//!
//! The reference count is a plain (non-atomic) counter, so a vector whose
//! buffer may be shared cannot be sent across threads. This falls out of
//! the types (`!Send`/`!Sync`) rather than being a documented footgun.

mod raw;
mod vector;

pub use raw::AllocError;
pub use vector::CowVector;
