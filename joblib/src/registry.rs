use crate::runner::CancelHandle;
use crate::types::{JobId, UserId};
use std::collections::{hash_map::Entry, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

/// One in-flight crawl, as seen by everyone who is not supervising it.
#[derive(Clone, Debug)]
pub struct JobHandle {
    pub job_id: JobId,
    pub user: UserId,
    pub url: Url,
    pub output_dir: PathBuf,
    pub cancel: CancelHandle,
}

/// Process-wide table of users with an active job.
///
/// A user has an entry for exactly as long as their job is running or being cancelled.
/// Every operation takes the lock once, so check-and-insert can never interleave.
#[derive(Default, Debug)]
pub struct Registry {
    jobs: Mutex<HashMap<UserId, JobHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `handle` if its user has no job yet. Returns whether it was inserted.
    pub fn try_register(&self, handle: JobHandle) -> bool {
        match self.lock().entry(handle.user) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    pub fn get(&self, user: UserId) -> Option<JobHandle> {
        self.lock().get(&user).cloned()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.lock().contains_key(&user)
    }

    /// Remove the user's entry, if any. Returns whether something was removed.
    pub fn unregister(&self, user: UserId) -> bool {
        self.lock().remove(&user).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // a panic while holding the lock cannot leave the map half-updated
    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, JobHandle>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
