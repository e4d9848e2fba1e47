use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock `lock`, recovering the inner value if a previous holder panicked.
///
/// Job tasks run under `catch_unwind`, so a panic while a guard is held must
/// not wedge every later caller of the same store or cache.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    owner: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!(
            op,
            owner,
            result = "poisoned_recovered",
            "Recovered from poisoned mutex"
        );
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::mutex_lock;

    #[test]
    fn recovers_after_panicking_holder() {
        let shared = Arc::new(Mutex::new(1_u32));
        let clone = Arc::clone(&shared);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("holder panicked");
        })
        .join();

        assert!(shared.is_poisoned());
        *mutex_lock(&shared, "test", "increment") += 1;
        assert_eq!(*mutex_lock(&shared, "test", "read"), 2);
    }
}
