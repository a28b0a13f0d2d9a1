//! 并发原语模块：提供 FIFO 公平的计数信号量。
//!
//! # Concurrency Primitives
//!
//! The batch engine bounds how many batches run at once with a counting
//! [`Semaphore`]. Holders receive a [`SemaphoreGuard`]; the permit returns to
//! the semaphore when the guard is released or dropped, and is handed to the
//! oldest waiter first.
//!
//! ```rust
//! use ioc_pipeline::concurrency::Semaphore;
//!
//! # tokio_test::block_on(async {
//! let sem = Semaphore::new(2);
//! let guard = sem.acquire().await?;
//! assert_eq!(sem.available_permits(), 1);
//! guard.release();
//! # Ok::<(), ioc_pipeline::Error>(())
//! # }).unwrap();
//! ```

mod semaphore;

pub use semaphore::{Semaphore, SemaphoreGuard};
