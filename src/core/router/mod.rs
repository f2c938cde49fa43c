// src/core/router/mod.rs

//! The robot registry and router: registration, liveness tracking, per-robot
//! single-flight locks, and protocol dispatch with a hard deadline.

pub mod dispatch;

pub use dispatch::Dispatcher;

use crate::core::events::EventBus;
use crate::core::models::{
    CommandResult, ErrorCode, ErrorDetail, EventCategory, EventSeverity, Heartbeat, Protocol,
    Robot, RobotStatus,
};
use crate::core::shared_state::SharedState;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct RobotRouter {
    robots: DashMap<String, Robot>,
    /// Per-robot dispatch locks. A held lock is what `busy` means.
    locks: DashMap<String, Arc<Mutex<()>>>,
    dispatcher: Dispatcher,
    bus: Arc<EventBus>,
    shared: Arc<SharedState>,
}

impl RobotRouter {
    pub fn new(dispatcher: Dispatcher, bus: Arc<EventBus>, shared: Arc<SharedState>) -> Self {
        Self {
            robots: DashMap::new(),
            locks: DashMap::new(),
            dispatcher,
            bus,
            shared,
        }
    }

    // ==================== registry ====================

    /// Creates or updates a registration. The robot comes back online with a
    /// fresh heartbeat either way.
    pub fn register_robot(&self, mut registration: Robot) -> bool {
        let robot_id = registration.robot_id.clone();

        // HTTP robots must come with a dispatchable endpoint.
        if registration.protocol == Protocol::Http
            && url::Url::parse(&registration.endpoint).is_err()
        {
            warn!(
                robot_id,
                endpoint = %registration.endpoint,
                "Rejecting registration with an unparsable endpoint."
            );
            return false;
        }

        let known = self.robots.contains_key(&robot_id);

        registration.last_heartbeat = Utc::now();
        registration.status = RobotStatus::Online;

        self.locks
            .entry(robot_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        self.robots.insert(robot_id.clone(), registration);
        self.publish_robot_state(&robot_id);

        if known {
            info!(robot_id, "Robot registration updated.");
        } else {
            info!(robot_id, "New robot registered.");
        }
        self.bus.emit(
            "robot.registered",
            &uuid::Uuid::new_v4().to_string(),
            EventSeverity::Info,
            EventCategory::Robot,
            format!("robot '{robot_id}' registered"),
            json!({ "robot_id": robot_id, "updated": known }),
        );
        true
    }

    pub fn unregister_robot(&self, robot_id: &str) -> bool {
        if self.robots.remove(robot_id).is_none() {
            return false;
        }
        self.locks.remove(robot_id);
        self.shared.remove(&format!("robot:{robot_id}"));
        info!(robot_id, "Robot unregistered.");
        self.bus.emit(
            "robot.unregistered",
            &uuid::Uuid::new_v4().to_string(),
            EventSeverity::Info,
            EventCategory::Robot,
            format!("robot '{robot_id}' unregistered"),
            json!({ "robot_id": robot_id }),
        );
        true
    }

    /// Applies a heartbeat. Unknown robots are reported but not auto-created.
    pub fn update_heartbeat(&self, heartbeat: &Heartbeat) -> bool {
        let Some(mut robot) = self.robots.get_mut(&heartbeat.robot_id) else {
            warn!(robot_id = %heartbeat.robot_id, "Heartbeat from unregistered robot.");
            return false;
        };
        robot.last_heartbeat = heartbeat.timestamp;
        robot.status = heartbeat.status;
        drop(robot);
        self.publish_robot_state(&heartbeat.robot_id);
        true
    }

    pub fn get_robot(&self, robot_id: &str) -> Option<Robot> {
        self.robots.get(robot_id).map(|r| r.clone())
    }

    pub fn list_robots(
        &self,
        robot_type: Option<&str>,
        status: Option<RobotStatus>,
    ) -> Vec<Robot> {
        self.robots
            .iter()
            .filter(|r| robot_type.is_none_or(|t| r.robot_type == t))
            .filter(|r| status.is_none_or(|s| r.status == s))
            .map(|r| r.clone())
            .collect()
    }

    pub fn robot_count(&self) -> usize {
        self.robots.len()
    }

    // ==================== routing ====================

    /// Routes one command to a robot.
    ///
    /// The per-robot lock is acquired non-blockingly: a held lock answers
    /// `ERR_ROBOT_BUSY` without touching the transport. Inside the lock the
    /// robot shows `busy`, the dispatch runs under a `timeout_ms` deadline,
    /// and on the way out the status reverts to `online` unless the reaper
    /// marked the robot offline in the meantime.
    pub async fn route_command(
        &self,
        robot_id: &str,
        command_type: &str,
        params: &Value,
        timeout_ms: u64,
        trace_id: &str,
    ) -> Result<CommandResult, ErrorDetail> {
        let Some(robot) = self.get_robot(robot_id) else {
            return Err(ErrorDetail {
                code: ErrorCode::ErrRobotNotFound,
                message: format!("robot not found: {robot_id}"),
                details: None,
            });
        };

        if robot.status == RobotStatus::Offline {
            return Err(ErrorDetail {
                code: ErrorCode::ErrRobotOffline,
                message: format!("robot offline: {robot_id}"),
                details: None,
            });
        }

        let Some(lock) = self.locks.get(robot_id).map(|l| l.clone()) else {
            return Err(ErrorDetail {
                code: ErrorCode::ErrInternal,
                message: format!("no dispatch lock for robot: {robot_id}"),
                details: None,
            });
        };

        let Ok(_guard) = lock.try_lock_owned() else {
            return Err(ErrorDetail {
                code: ErrorCode::ErrRobotBusy,
                message: format!("robot busy: {robot_id}"),
                details: None,
            });
        };

        self.set_status(robot_id, RobotStatus::Busy);

        let outcome = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.dispatcher.send(&robot, command_type, params, trace_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ErrorDetail {
                code: ErrorCode::ErrTimeout,
                message: format!("command timed out after {timeout_ms}ms"),
                details: None,
            }),
        };

        // The reaper may have flipped the robot offline while the dispatch
        // was in flight; only a still-busy robot reverts to online.
        if self
            .robots
            .get(robot_id)
            .map(|r| r.status == RobotStatus::Busy)
            .unwrap_or(false)
        {
            self.set_status(robot_id, RobotStatus::Online);
        }

        outcome
    }

    // ==================== liveness ====================

    /// Marks every robot without a recent heartbeat offline. Returns the ids
    /// that were transitioned; called by the offline reaper.
    pub fn mark_stale_offline(&self, threshold: ChronoDuration) -> Vec<String> {
        let cutoff = Utc::now() - threshold;
        let stale: Vec<String> = self
            .robots
            .iter()
            .filter(|r| r.last_heartbeat < cutoff && r.status != RobotStatus::Offline)
            .map(|r| r.robot_id.clone())
            .collect();

        for robot_id in &stale {
            warn!(robot_id, "Robot heartbeat stale, marking offline.");
            self.set_status(robot_id, RobotStatus::Offline);
            self.bus.emit(
                "robot.offline",
                &uuid::Uuid::new_v4().to_string(),
                EventSeverity::Warn,
                EventCategory::Robot,
                format!("robot '{robot_id}' marked offline (heartbeat stale)"),
                json!({ "robot_id": robot_id }),
            );
        }
        stale
    }

    // ==================== internal ====================

    fn set_status(&self, robot_id: &str, status: RobotStatus) {
        if let Some(mut robot) = self.robots.get_mut(robot_id) {
            robot.status = status;
        }
        self.publish_robot_state(robot_id);
    }

    fn publish_robot_state(&self, robot_id: &str) {
        if let Some(robot) = self.robots.get(robot_id) {
            self.shared.set(
                &format!("robot:{robot_id}"),
                json!({
                    "robot_id": robot.robot_id,
                    "robot_type": robot.robot_type,
                    "status": robot.status,
                    "last_heartbeat": robot.last_heartbeat,
                }),
            );
        }
    }
}

impl std::fmt::Debug for RobotRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotRouter")
            .field("robots", &self.robots.len())
            .finish_non_exhaustive()
    }
}
