//! Lifecycle status enums for jobs and sections.
//!
//! Both are persisted as lowercase TEXT and travel on the wire with the
//! same spelling, so a single string table drives serde, storage, and
//! display.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every variant, in lifecycle order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// String representation for display, logging, and database storage.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $val ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $val => Ok($name::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

define_status_enum! {
    /// Job lifecycle status.
    JobStatus {
        Idle = "idle",
        Running = "running",
        Paused = "paused",
        Complete = "complete",
        Failed = "failed",
        Cancelled = "cancelled",
    }
}

define_status_enum! {
    /// Section lifecycle status.
    ///
    /// `pending -> queued -> generating -> {complete | failed}`, with
    /// `complete -> diffing -> {complete | failed}` on an explicit retry.
    SectionStatus {
        Pending = "pending",
        Queued = "queued",
        Generating = "generating",
        Complete = "complete",
        Failed = "failed",
        Diffing = "diffing",
    }
}

impl JobStatus {
    /// Whether the job has finished and will not be touched by a worker again
    /// unless explicitly restarted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

impl SectionStatus {
    /// Whether the section has reached the end of a generation pass.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether a worker is currently driving the section.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Generating | Self::Diffing)
    }
}
