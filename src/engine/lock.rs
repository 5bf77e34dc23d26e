// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::atomic::{AtomicBool, Ordering};

/// The single exclusivity gate serializing playback-start and record-start.
///
/// Acquisition is non-blocking only: a caller that cannot acquire the lock
/// must treat its request as rejected, not queued. The lock is held from the
/// start of a session until the session's completion callback fires, which
/// may be on a different thread than the one that acquired it.
pub struct EngineLock {
    held: AtomicBool,
}

impl EngineLock {
    pub fn new() -> EngineLock {
        EngineLock {
            held: AtomicBool::new(false),
        }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the lock. Releasing a lock that is not held is a caller bug.
    pub fn release(&self) {
        let was_held = self.held.swap(false, Ordering::Release);
        debug_assert!(was_held, "released an engine lock that was not held");
    }

    /// Releases the lock regardless of state. Only for teardown.
    pub fn force_release(&self) {
        self.held.store(false, Ordering::Release);
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Attempts to start a session. The returned guard releases the lock when
    /// dropped unless the session is committed, which centralizes every
    /// rejection and rollback path into a single release site.
    pub fn try_session(&self) -> Option<SessionGuard<'_>> {
        if self.try_acquire() {
            Some(SessionGuard {
                lock: self,
                armed: true,
            })
        } else {
            None
        }
    }
}

impl Default for EngineLock {
    fn default() -> EngineLock {
        EngineLock::new()
    }
}

/// Scoped ownership of an acquired [EngineLock]. Dropping the guard releases
/// the lock; committing hands the release over to the session's completion
/// callback.
pub struct SessionGuard<'a> {
    lock: &'a EngineLock,
    armed: bool,
}

impl SessionGuard<'_> {
    /// The session started successfully: the completion callback now owns the
    /// release.
    pub fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.lock.release();
        }
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn test_try_acquire_is_exclusive() {
        let lock = EngineLock::new();

        assert!(lock.try_acquire());
        assert!(lock.is_held());
        assert!(!lock.try_acquire());

        lock.release();
        assert!(!lock.is_held());
        assert!(lock.try_acquire());
    }

    #[test]
    fn test_session_guard_releases_on_drop() {
        let lock = EngineLock::new();

        {
            let _guard = lock.try_session().expect("session should start");
            assert!(lock.is_held());
            assert!(lock.try_session().is_none());
        }

        assert!(!lock.is_held());
    }

    #[test]
    fn test_session_guard_commit_keeps_lock_held() {
        let lock = EngineLock::new();

        let guard = lock.try_session().expect("session should start");
        guard.commit();
        assert!(lock.is_held());

        // The completion path owns the release now.
        lock.release();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_release_from_another_thread() {
        let lock = Arc::new(EngineLock::new());
        assert!(lock.try_acquire());

        let join = {
            let lock = lock.clone();
            thread::spawn(move || lock.release())
        };

        assert!(join.join().is_ok());
        assert!(!lock.is_held());
        assert!(lock.try_acquire());
    }

    #[test]
    fn test_force_release_is_idempotent() {
        let lock = EngineLock::new();
        assert!(lock.try_acquire());

        lock.force_release();
        lock.force_release();
        assert!(!lock.is_held());
    }
}
