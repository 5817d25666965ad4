//! Enumerated subsystem statuses.
//!
//! The automation bus reports every status as a bare ordinal. Each enum
//! below carries an explicit lookup table in bus order; anything outside
//! the table maps to `Unknown`. On the wire the enums travel as snake_case
//! strings and an unrecognized string also decodes to `Unknown`.

use serde::{Deserialize, Serialize};

macro_rules! ordinal_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant,)+
            #[serde(other)]
            Unknown,
        }

        impl $name {
            /// Variants in bus ordinal order.
            pub const ORDER: &'static [$name] = &[$($name::$variant),+];

            /// Map a bus ordinal; out-of-range values become `Unknown`.
            pub fn from_ordinal(ordinal: i64) -> Self {
                usize::try_from(ordinal)
                    .ok()
                    .and_then(|i| Self::ORDER.get(i).copied())
                    .unwrap_or(Self::Unknown)
            }

            /// Map a property value that should hold an ordinal.
            pub fn from_value(value: &serde_json::Value) -> Self {
                value.as_i64().map(Self::from_ordinal).unwrap_or(Self::Unknown)
            }

            pub fn ordinal(self) -> Option<i64> {
                Self::ORDER.iter().position(|v| *v == self).map(|i| i as i64)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::ORDER[0]
            }
        }
    };
}

ordinal_enum! {
    /// Top-level automation status of the controlled application.
    pub enum CommunicationStatus { Idle, Pending, Success, Error }
}

ordinal_enum! {
    /// State of a raw device property.
    pub enum PropertyState { Idle, Ok, Busy, Alert }
}

ordinal_enum! {
    pub enum MountStatus { Idle, Moving, Slewing, Tracking, Parking, Parked, Error }
}

ordinal_enum! {
    pub enum ParkStatus { Indeterminate, Parked, Parking, Unparking, Unparked, Error }
}

ordinal_enum! {
    pub enum MeridianFlipStatus { Inactive, Planned, Waiting, Accepted, Running, Completed, Error }
}

ordinal_enum! {
    pub enum GuideStatus {
        Idle,
        Aborted,
        Connected,
        Disconnected,
        Capture,
        Looping,
        Dark,
        Subframe,
        StarSelect,
        Calibrating,
        CalibrationError,
        CalibrationSuccess,
        Guiding,
        Suspended,
        Reacquire,
        Dithering,
        ManualDithering,
        DitheringError,
        DitheringSuccess,
        DitheringSettle,
    }
}

ordinal_enum! {
    pub enum CaptureStatus {
        Idle,
        Progress,
        Capturing,
        PausePlanned,
        Paused,
        Suspended,
        Aborted,
        Waiting,
        ImageReceived,
        Dithering,
        Focusing,
        FilterFocus,
        ChangingFilter,
        GuiderDrift,
        SettingTemperature,
        SettingRotator,
        Aligning,
        Calibrating,
        MeridianFlip,
        Complete,
    }
}

ordinal_enum! {
    pub enum FocusState { Idle, Complete, Failed, Aborted, Waiting, Progress, Framing, ChangingFilter }
}

ordinal_enum! {
    pub enum AlignState {
        Idle,
        Complete,
        Failed,
        Aborted,
        Progress,
        Successful,
        Syncing,
        Slewing,
        Rotating,
        Suspended,
    }
}

ordinal_enum! {
    pub enum SchedulerState { Idle, Startup, Running, Paused, Shutdown, Aborted, Loading }
}

ordinal_enum! {
    pub enum WeatherState { Idle, Ok, Warning, Alert }
}

ordinal_enum! {
    pub enum DomeState { Idle, MovingCw, MovingCcw, Tracking, Parking, Unparking, Parked, Error }
}

impl FocusState {
    /// A focus run is under way.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Waiting | Self::Progress | Self::Framing | Self::ChangingFilter)
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Aborted)
    }
}

impl AlignState {
    /// A terminal outcome of a capture-and-solve cycle.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Aborted)
    }

    /// Activity that keeps a running solve alive.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Progress
                | Self::Slewing
                | Self::Rotating
                | Self::Syncing
                | Self::Successful
                | Self::Suspended
        )
    }
}
