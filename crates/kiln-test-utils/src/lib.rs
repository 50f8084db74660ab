//! Driver abstraction and test utilities for the Kiln renderer.
//!
//! The renderer never talks to a graphics API directly. Every state change and
//! draw goes through the [`GlDriver`] trait, which a platform backend
//! implements. This crate also ships [`MockDriver`] (feature `mock`), a
//! recording driver that lets tests count exactly which driver calls were
//! issued.
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "mock")]
//! # {
//! use kiln_test_utils::{GlDriver, MockDriver, ProgramId};
//!
//! let driver = MockDriver::new();
//! driver.use_program(ProgramId(3));
//!
//! assert_eq!(driver.count_use_program(), 1);
//! assert_eq!(driver.current_program(), Some(ProgramId(3)));
//! # }
//! ```
//!
//! # Design
//!
//! - Handles are plain `Copy` newtypes around the numeric ids the driver hands
//!   out, so caches can store them without owning the GPU object.
//! - `GlDriver` methods take `&self`; implementations use interior mutability.
//!   This keeps the trait object safe and lets one driver be shared through an
//!   `Arc<dyn GlDriver>`.

pub mod driver;
pub mod gpu_types;
#[cfg(feature = "mock")]
pub mod mock_driver;

pub use driver::*;
pub use gpu_types::*;
#[cfg(feature = "mock")]
pub use mock_driver::*;
