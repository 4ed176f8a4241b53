//! Runtime-facing helpers kept separate from `printhost-core` so the engine
//! itself never names `tokio` types directly outside this boundary.

use core::{fmt::Debug, future::Future};

pub use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

pub mod time;

pub trait BackgroundFuture: Future + Debug {
    fn cancel(self);
}

impl<T: Debug> BackgroundFuture for tokio::task::JoinHandle<T> {
    fn cancel(self) {
        self.abort()
    }
}

pub type Task<T> = tokio::task::JoinHandle<T>;

pub fn spawn<F>(fut: F) -> Task<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(fut)
}
