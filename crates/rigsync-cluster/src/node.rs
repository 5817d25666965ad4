//! Administrative operations of a running node, whatever its role.

use std::sync::Arc;

use rigsync_router::{CalibrationStart, NodeHooks, StatusReport, StatusRouter};
use rigsync_state::{AlignmentSolution, StateSnapshot};
use serde::Serialize;

use crate::error::{AdminError, AdminResult};
use crate::follower::{Follower, Stage};
use crate::leader::Leader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRole {
    Leader,
    Follower,
}

/// Role-specific part of a [`NodeStatus`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleStatus {
    Leader {
        followers: usize,
        auto_start: bool,
    },
    Follower {
        leader_connected: bool,
        init_done: bool,
        stage: Stage,
        strategy: &'static str,
        leader: StateSnapshot,
        leader_solution: Option<AlignmentSolution>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    #[serde(flatten)]
    pub local: StatusReport,
    pub cluster: RoleStatus,
}

/// A node in either role.
#[derive(Clone)]
pub enum Node {
    Leader(Arc<Leader>),
    Follower(Arc<Follower>),
}

impl Node {
    pub fn role(&self) -> ClusterRole {
        match self {
            Node::Leader(_) => ClusterRole::Leader,
            Node::Follower(_) => ClusterRole::Follower,
        }
    }

    pub fn router(&self) -> &Arc<StatusRouter> {
        match self {
            Node::Leader(leader) => leader.router(),
            Node::Follower(follower) => follower.router(),
        }
    }

    /// The role's supervisor hooks.
    pub fn hooks(&self) -> Arc<dyn NodeHooks> {
        match self {
            Node::Leader(leader) => leader.clone(),
            Node::Follower(follower) => follower.clone(),
        }
    }

    pub async fn status(&self) -> AdminResult<NodeStatus> {
        let local = self.router().status_report().await?;
        let cluster = match self {
            Node::Leader(leader) => RoleStatus::Leader {
                followers: leader.follower_count(),
                auto_start: leader.auto_start_enabled(),
            },
            Node::Follower(follower) => RoleStatus::Follower {
                leader_connected: follower.is_leader_connected(),
                init_done: follower.is_init_done(),
                stage: follower.stage().await,
                strategy: follower.strategy_name(),
                leader: follower.leader_snapshot(),
                leader_solution: follower.leader_solution(),
            },
        };
        Ok(NodeStatus { local, cluster })
    }

    pub fn suspend(&self) {
        self.router().suspend();
    }

    pub fn resume(&self) {
        self.router().resume();
    }

    pub async fn pre_cool(&self) -> AdminResult<()> {
        Ok(self.router().pre_cool_camera().await?)
    }

    pub async fn warm(&self) -> AdminResult<()> {
        Ok(self.router().warm_camera().await?)
    }

    pub fn calibrate(&self) -> AdminResult<CalibrationStart> {
        Ok(self.router().calibrate_filters()?)
    }

    pub async fn check_start_capture(&self) -> AdminResult<bool> {
        match self {
            Node::Follower(follower) => Ok(follower.check_start_capture().await?),
            Node::Leader(_) => Err(AdminError::FollowerOnly),
        }
    }

    pub async fn check_stop_capture(&self) -> AdminResult<bool> {
        match self {
            Node::Follower(follower) => Ok(follower.check_stop_capture().await?),
            Node::Leader(_) => Err(AdminError::FollowerOnly),
        }
    }
}
