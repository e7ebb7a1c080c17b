//! Identifier newtypes for the query pipeline.
//!
//! All ids are plain `u64` wrappers. The wrappers exist so the type
//! system keeps a query id from being handed where a task id belongs;
//! display stays the bare number for log readability.

use std::fmt;

macro_rules! id_newtype {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_newtype!(
    /// Gateway-assigned query identifier, unique for the lifetime of
    /// the process. Taken from a monotonic counter at job-context
    /// creation.
    QueryId
);

id_newtype!(
    /// Position of one fragment inside its job's fragment list.
    FragmentId
);

id_newtype!(
    /// One leaf scan task. Unique within a job, not across jobs.
    TaskId
);
