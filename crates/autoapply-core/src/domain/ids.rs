//! Strongly-typed domain identifiers.
//!
//! All ids are ULIDs behind a phantom-typed wrapper: `RunId` and `TaskId`
//! share one implementation but cannot be mixed up at compile time. ULIDs
//! sort by creation time, which gives a stable tie-break for records created
//! in the same instant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for id kinds. Provides the `Display` prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic id wrapper. `T` is a zero-sized marker, so `Id<T>` is exactly the
/// size of a ULID.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn new() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

macro_rules! id_marker {
    ($(#[$doc:meta])* $marker:ident, $alias:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $marker {}

        impl IdMarker for $marker {
            fn prefix() -> &'static str {
                $prefix
            }
        }

        $(#[$doc])*
        pub type $alias = Id<$marker>;
    };
}

id_marker!(
    /// One batch of application tasks.
    Run, RunId, "run-"
);
id_marker!(
    /// One job-application attempt (the queue unit).
    Task, TaskId, "task-"
);
id_marker!(
    /// A job posting in the external catalog (referenced, not owned).
    Job, JobId, "job-"
);
id_marker!(
    /// A single-use approval gate tied to one task.
    Approval, ApprovalId, "approval-"
);
id_marker!(
    /// The owner of runs and the subject of submission fingerprints.
    User, UserId, "user-"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types_with_prefixes() {
        let run = RunId::new();
        let task = TaskId::new();

        assert!(run.to_string().starts_with("run-"));
        assert!(task.to_string().starts_with("task-"));

        // Mixing RunId and TaskId is a compile error; kept as a comment on
        // purpose since it cannot be expressed as a runtime assertion.
        // let _: RunId = task;
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let a = TaskId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = TaskId::new();
        assert!(a < b);
    }

    #[test]
    fn ids_roundtrip_through_serde() {
        let id = ApprovalId::new();
        let s = serde_json::to_string(&id).unwrap();
        let back: ApprovalId = serde_json::from_str(&s).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn phantom_marker_is_zero_sized() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskId>(), size_of::<Ulid>());
    }
}
