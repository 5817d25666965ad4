//! rigsync-cluster — leader/follower coordination between rigs.
//!
//! One node leads: its status records are cached and replicated to every
//! follower over a length-prefixed JSON channel. Followers mirror the
//! leader and drive their own rig so it frames and captures the same
//! target.
//!
//! # Architecture
//!
//! ```text
//! Leader (NodeHooks)                          Follower (NodeHooks)
//!   ├── on_status → auto-start check            ├── receiver task
//!   │            → cache + broadcast ─────────▶ │     hello / begin_init / init_done
//!   ├── registry: channel id → ChannelSender    │     status → mirrored ObservatoryState
//!   └── accept loop                             └── stage loop (100 ms)
//!         hello_from_client                           Init → Focus → Align → Capture
//!         → hello_from_server + cached records         JobStrategy: SequenceByTarget
//!           in bootstrap order                                   | GeneratedSchedule
//! ```

pub mod channel;
pub mod error;
pub mod follower;
pub mod leader;
pub mod node;
pub mod protocol;
pub mod strategy;

pub use channel::{ChannelSender, MessageReader};
pub use error::{AdminError, AdminResult, JobError, JobResult, ReplicationError, ReplicationResult};
pub use follower::{Follower, FollowerConfig, Stage};
pub use leader::{AutoStartPolicy, Leader, LeaderConfig};
pub use node::{ClusterRole, Node, NodeStatus, RoleStatus};
pub use protocol::{MAX_FRAME_LEN, Message};
pub use strategy::{GeneratedSchedule, JobStrategy, LeaderWork, PreparedJob, SequenceByTarget};
