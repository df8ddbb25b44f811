use std::{future::Future, time::Duration};

#[cfg(feature = "redis-tokio")]
pub(super) fn block_on<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::runtime::Runtime::new().unwrap().block_on(f)
}

#[cfg(all(feature = "redis-smol", not(feature = "redis-tokio")))]
pub(super) fn block_on<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    smol::block_on(f)
}

#[cfg(not(any(feature = "redis-tokio", feature = "redis-smol")))]
pub(super) fn block_on<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    futures::executor::block_on(f)
}

#[cfg(feature = "redis-tokio")]
#[allow(dead_code)]
pub(super) async fn async_sleep(d: Duration) {
    tokio::time::sleep(d).await;
}

#[cfg(all(feature = "redis-smol", not(feature = "redis-tokio")))]
#[allow(dead_code)]
pub(super) async fn async_sleep(d: Duration) {
    smol::Timer::after(d).await;
}

#[cfg(not(any(feature = "redis-tokio", feature = "redis-smol")))]
#[allow(dead_code)]
pub(super) async fn async_sleep(d: Duration) {
    std::thread::sleep(d);
}
