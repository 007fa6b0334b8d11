//! Scoped suppression of proxy environment variables.
//!
//! While at least one [`ProxyEnvGuard`] is alive the proxy variables are
//! absent from the process environment. The first guard saves and removes
//! them; the last guard to drop puts the saved values back. Overlapping calls
//! therefore never capture one another's suppressed state.

use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Variables cleared for the lifetime of a guard.
pub const PROXY_ENV_VARS: &[&str] = &[
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
    "http_proxy",
    "https_proxy",
    "all_proxy",
];

struct Suppression {
    active: usize,
    saved: Vec<(&'static str, OsString)>,
}

static SUPPRESSION: Mutex<Suppression> = Mutex::new(Suppression {
    active: 0,
    saved: Vec::new(),
});

fn state() -> MutexGuard<'static, Suppression> {
    SUPPRESSION.lock().unwrap_or_else(PoisonError::into_inner)
}

/// RAII handle: proxy variables stay cleared until every guard is dropped.
#[derive(Debug)]
#[must_use = "proxy variables are restored as soon as the guard is dropped"]
pub struct ProxyEnvGuard {
    _private: (),
}

impl ProxyEnvGuard {
    pub fn acquire() -> Self {
        let mut state = state();
        if state.active == 0 {
            state.saved = PROXY_ENV_VARS
                .iter()
                .filter_map(|name| std::env::var_os(name).map(|value| (*name, value)))
                .collect();
            for name in PROXY_ENV_VARS {
                std::env::remove_var(name);
            }
            if !state.saved.is_empty() {
                debug!(count = state.saved.len(), "proxy environment suppressed");
            }
        }
        state.active += 1;
        Self { _private: () }
    }
}

impl Drop for ProxyEnvGuard {
    fn drop(&mut self) {
        let mut state = state();
        state.active = state.active.saturating_sub(1);
        if state.active == 0 && !state.saved.is_empty() {
            for (name, value) in state.saved.drain(..) {
                std::env::set_var(name, value);
            }
            debug!("proxy environment restored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Runs in the unit-test binary, where nothing else sets proxy variables.
    #[test]
    fn nested_guards_restore_only_after_the_last_drop() {
        std::env::set_var("ALL_PROXY", "socks5://unit.test:1080");

        let outer = ProxyEnvGuard::acquire();
        assert!(std::env::var_os("ALL_PROXY").is_none());

        let inner = ProxyEnvGuard::acquire();
        drop(outer);
        assert!(std::env::var_os("ALL_PROXY").is_none());

        drop(inner);
        assert_eq!(
            std::env::var("ALL_PROXY").as_deref(),
            Ok("socks5://unit.test:1080")
        );
        std::env::remove_var("ALL_PROXY");
    }
}
