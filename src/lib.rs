// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod error;
pub mod io_scheduler;
pub mod net;
mod park;
pub mod poll;
mod sync_wait;
mod sys;
pub mod task;
pub mod thread_pool;
mod when_all;

pub use error::{ShuttingDown, TaskError};
pub use io_scheduler::{ExecutionStrategy, IoScheduler, Options};
pub use poll::{PollOp, PollStatus};
pub use sync_wait::sync_wait;
pub use task::Task;
pub use thread_pool::ThreadPool;
pub use when_all::{IntoWhenAll, WhenAll, when_all};

pub use futures::future;
