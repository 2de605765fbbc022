//! Запуск пачки независимых задач на пуле потоков со сбором результатов в один плоский список
//!
//! # Возможности
//! - По потоку на задачу по умолчанию или фиксированное число потоков
//! - Внешние executor'ы, которые останавливаются только по запросу
//! - Опциональный deadline, незавершенные задачи отменяются
//! - Подключаемая обработка ошибок и таймаутов ([`Quiet`], [`FailFast`] или своя)
//! - Имена потоков, daemon, приоритет и свои thread factory
//!
//! ```no_run
//! use lemming::Lemming;
//!
//! let sizes = Lemming::new()
//!     .add(|| Ok(1))
//!     .add_many(|| Ok(vec![2, 3]))
//!     .fail_on_any_exception()
//!     .collect()?;
//! assert_eq!(sizes, [1, 2, 3]);
//! # Ok::<(), lemming::Error>(())
//! ```

pub mod errors;
pub mod handle;
pub mod lemming;
pub mod model;
pub mod pool;
pub mod strategy;
pub mod task;
pub mod thread;

pub use errors::{CancelReason, ConfigError, Error, PoolError, TaskError};
pub use handle::{JoinHandle, Outcome};
pub use lemming::Lemming;
pub use model::{CollectMetrics, PoolMetrics};
pub use pool::{Executor, ThreadPool, ThreadPoolBuilder, ThreadPoolInner};
pub use strategy::{ExceptionStrategy, FailFast, Quiet};
pub use task::{cancellation_token, is_cancelled, Collected, Task};
pub use thread::{Priority, ThreadFactory, WorkerThread};
