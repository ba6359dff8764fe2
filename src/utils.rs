//! Identifier generation and bounded calls into external collaborators

use crate::error::{MarketError, Result};
use bech32::Bech32m;
use std::sync::mpsc;
use std::time::Duration;
use uuid7::uuid7;

// construct a unique, time-ordered id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Same as [`new_uuid_to_bech32`] for the fixed prefixes the store uses.
pub(crate) fn new_id(hrp: &str) -> Result<String> {
    new_uuid_to_bech32(hrp).map_err(|e| MarketError::Codec(e.to_string()))
}

/// Runs `f` on a worker thread and gives up after `timeout`.
///
/// A call that overruns keeps running in the background; its result is dropped.
pub fn call_with_timeout<T, F>(service: &'static str, timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    std::thread::Builder::new()
        .name(format!("{service}-call"))
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| MarketError::unavailable(service, e))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(MarketError::unavailable(
            service,
            format!("no response within {}ms", timeout.as_millis()),
        )),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(MarketError::unavailable(service, "worker exited without a result"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_returns_dependency_unavailable() {
        let res: Result<()> = call_with_timeout("slow", Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        });

        assert!(matches!(
            res,
            Err(MarketError::DependencyUnavailable { service: "slow", .. })
        ));
    }

    #[test]
    fn fast_calls_pass_through() {
        let res = call_with_timeout("fast", Duration::from_secs(1), || Ok(7)).unwrap();
        assert_eq!(res, 7);
    }

    #[test]
    fn panicking_worker_is_reported() {
        let res: Result<()> =
            call_with_timeout("panics", Duration::from_secs(1), || panic!("boom"));
        assert!(matches!(res, Err(MarketError::DependencyUnavailable { .. })));
    }
}
