//! Camera thermal management.
//!
//! `ThermalController` is a pure state machine: each tick takes a
//! [`ThermalReading`] of the camera and returns the commands to apply.
//! The router reads the camera, steps the controller under its own lock
//! and applies the commands afterwards.
//!
//! A warm-up sets the target [`WARM_STEP`] above the current temperature
//! and raises it again each time the sensor settles within
//! [`SETTLE_TOLERANCE`] of the previous target. When the
//! sensor no longer settles within [`SETTLE_TIMEOUT`] the warm-up is
//! finished and the cooler is switched off.

use std::time::Duration;

use rigsync_bus::{BusResult, Camera};
use rigsync_state::{Deadline, MountStatus, ParkStatus, PropertyState, SchedulerState};
use tracing::{debug, info};

pub const WARM_STEP: f64 = 2.0;
pub const SETTLE_TOLERANCE: f64 = 0.6;
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(600);

/// What the controller needs to know about the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalReading {
    pub cooling: bool,
    pub temperature: f64,
    /// Temperature property state is `Ok`: the sensor reached its target.
    pub settled: bool,
    /// Anti-dew heater state; `None` when the camera has no heater.
    pub anti_dew: Option<bool>,
}

impl ThermalReading {
    pub async fn read(camera: &Camera) -> BusResult<Self> {
        Ok(Self {
            cooling: camera.is_cooling().await?,
            temperature: camera.temperature().await?,
            settled: camera.temperature_state().await? == PropertyState::Ok,
            anti_dew: camera.anti_dew_on().await.ok(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThermalCommand {
    SetTarget(f64),
    SetCooler(bool),
    SetAntiDew(bool),
}

impl ThermalCommand {
    pub async fn apply(self, camera: &Camera) -> BusResult<()> {
        match self {
            ThermalCommand::SetTarget(celsius) => camera.set_target_temperature(celsius).await,
            ThermalCommand::SetCooler(on) => camera.set_cooler(on).await,
            ThermalCommand::SetAntiDew(on) => camera.set_anti_dew(on).await,
        }
    }
}

/// Policy outcome for a mount/scheduler combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalAction {
    Warm,
    PreCool,
}

/// Decide what the camera should do given mount and scheduler status.
pub fn thermal_policy(
    mount: MountStatus,
    park: ParkStatus,
    scheduler: SchedulerState,
) -> Option<ThermalAction> {
    if matches!(mount, MountStatus::Parking | MountStatus::Parked)
        || matches!(park, ParkStatus::Parking | ParkStatus::Parked)
    {
        return Some(ThermalAction::Warm);
    }
    match scheduler {
        SchedulerState::Idle | SchedulerState::Aborted | SchedulerState::Shutdown => {
            Some(ThermalAction::Warm)
        }
        SchedulerState::Running
            if matches!(mount, MountStatus::Slewing | MountStatus::Tracking) =>
        {
            Some(ThermalAction::PreCool)
        }
        _ => None,
    }
}

#[derive(Debug)]
pub struct ThermalController {
    pre_cool_temp: f64,
    warming: bool,
    finished: bool,
    settle_target: f64,
    settle_deadline: Deadline,
}

impl ThermalController {
    pub fn new(pre_cool_temp: f64) -> Self {
        Self {
            pre_cool_temp,
            warming: false,
            finished: false,
            settle_target: 0.0,
            settle_deadline: Deadline::labeled(SETTLE_TIMEOUT, "camera warm-up settle"),
        }
    }

    pub fn is_warming(&self) -> bool {
        self.warming
    }

    /// Whether the last warm-up ran to completion.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn settle_target(&self) -> f64 {
        self.settle_target
    }

    /// Begin a warm-up if the camera is cooling and none is under way.
    /// The first step is commanded at once.
    pub fn warm(&mut self, reading: ThermalReading) -> Vec<ThermalCommand> {
        if !reading.cooling || self.warming || self.finished {
            return Vec::new();
        }
        self.warming = true;
        self.settle_target = reading.temperature + WARM_STEP;
        self.settle_deadline.reset_to(SETTLE_TIMEOUT);
        info!(
            temperature = reading.temperature,
            target = self.settle_target,
            "camera warm-up started"
        );
        vec![ThermalCommand::SetTarget(self.settle_target)]
    }

    /// Force the pre-cool target unless already cooling outside a warm-up.
    pub fn pre_cool(&mut self, reading: ThermalReading) -> Vec<ThermalCommand> {
        if reading.cooling && !self.warming {
            return Vec::new();
        }
        info!(target = self.pre_cool_temp, "camera pre-cool");
        self.warming = false;
        self.finished = false;
        vec![ThermalCommand::SetTarget(self.pre_cool_temp)]
    }

    /// One controller tick.
    pub fn step(&mut self, reading: ThermalReading) -> Vec<ThermalCommand> {
        let mut commands = Vec::new();

        if !reading.cooling {
            if self.warming {
                // Cooler switched off outside the controller.
                info!("cooler off during warm-up, warm-up finished");
                self.warming = false;
                self.finished = true;
            }
            if reading.anti_dew == Some(true) {
                commands.push(ThermalCommand::SetAntiDew(false));
            }
            return commands;
        }

        if !self.warming && self.finished {
            // Cooling again after a completed warm-up.
            self.finished = false;
        }

        if let Some(on) = reading.anti_dew {
            let want = !self.warming;
            if on != want {
                commands.push(ThermalCommand::SetAntiDew(want));
            }
        }

        if !self.warming {
            return commands;
        }

        if reading.settled {
            let delta = (self.settle_target - reading.temperature).abs();
            if delta <= SETTLE_TOLERANCE {
                self.settle_target = reading.temperature + WARM_STEP;
                self.settle_deadline.reset();
                debug!(target = self.settle_target, "warm-up step");
                commands.push(ThermalCommand::SetTarget(self.settle_target));
            } else {
                info!(
                    target = self.settle_target,
                    temperature = reading.temperature,
                    "sensor away from warm-up target, warm-up abandoned"
                );
                self.warming = false;
            }
        } else if self.settle_deadline.elapsed() {
            info!(temperature = reading.temperature, "warm-up finished, cooler off");
            self.warming = false;
            self.finished = true;
            commands.push(ThermalCommand::SetCooler(false));
            commands.push(ThermalCommand::SetAntiDew(false));
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(cooling: bool, temperature: f64, settled: bool) -> ThermalReading {
        ThermalReading {
            cooling,
            temperature,
            settled,
            anti_dew: Some(true),
        }
    }

    #[test]
    fn policy_warms_on_park_and_idle_scheduler() {
        use MountStatus as M;
        use SchedulerState as S;
        assert_eq!(
            thermal_policy(M::Parking, ParkStatus::Unparked, S::Running),
            Some(ThermalAction::Warm)
        );
        assert_eq!(
            thermal_policy(M::Idle, ParkStatus::Parked, S::Running),
            Some(ThermalAction::Warm)
        );
        assert_eq!(
            thermal_policy(M::Tracking, ParkStatus::Unparked, S::Aborted),
            Some(ThermalAction::Warm)
        );
        assert_eq!(
            thermal_policy(M::Slewing, ParkStatus::Unparked, S::Running),
            Some(ThermalAction::PreCool)
        );
        assert_eq!(thermal_policy(M::Idle, ParkStatus::Unparked, S::Running), None);
        assert_eq!(thermal_policy(M::Tracking, ParkStatus::Unparked, S::Paused), None);
    }

    #[test]
    fn anti_dew_follows_cooler() {
        let mut ctl = ThermalController::new(-15.0);
        let off = ThermalReading {
            anti_dew: Some(false),
            ..reading(true, -10.0, true)
        };
        assert_eq!(ctl.step(off), vec![ThermalCommand::SetAntiDew(true)]);

        assert_eq!(
            ctl.step(reading(false, 5.0, true)),
            vec![ThermalCommand::SetAntiDew(false)]
        );
    }

    #[test]
    fn camera_without_heater_gets_no_anti_dew_commands() {
        let mut ctl = ThermalController::new(-15.0);
        let r = ThermalReading {
            anti_dew: None,
            ..reading(true, -10.0, true)
        };
        assert!(ctl.step(r).is_empty());
    }

    #[test]
    fn warm_up_steps_while_sensor_settles() {
        let mut ctl = ThermalController::new(-15.0);
        assert_eq!(
            ctl.warm(reading(true, -10.0, true)),
            vec![ThermalCommand::SetTarget(-8.0)]
        );
        assert!(ctl.is_warming());

        let cmds = ctl.step(reading(true, -8.0, true));
        assert!(cmds.contains(&ThermalCommand::SetAntiDew(false)));
        assert!(cmds.contains(&ThermalCommand::SetTarget(-6.0)));

        let cmds = ctl.step(ThermalReading {
            anti_dew: Some(false),
            ..reading(true, -6.3, true)
        });
        assert_eq!(cmds.len(), 1);
        assert!(matches!(cmds[0], ThermalCommand::SetTarget(t) if (t - (-4.3)).abs() < 1e-9));
    }

    #[test]
    fn warm_up_abandoned_when_sensor_strays() {
        let mut ctl = ThermalController::new(-15.0);
        ctl.warm(reading(true, -10.0, true));
        ctl.step(reading(true, -8.0, true));
        ctl.step(reading(true, -3.0, true));
        assert!(!ctl.is_warming());
        assert!(!ctl.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn warm_up_finishes_when_sensor_stops_settling() {
        let mut ctl = ThermalController::new(-15.0);
        ctl.warm(reading(true, 10.0, true));
        ctl.step(reading(true, 12.0, true));

        assert!(ctl.step(reading(true, 11.0, false)).iter().all(|c| !matches!(c, ThermalCommand::SetCooler(_))));
        tokio::time::advance(SETTLE_TIMEOUT + Duration::from_secs(1)).await;
        let cmds = ctl.step(reading(true, 11.0, false));
        assert!(cmds.contains(&ThermalCommand::SetCooler(false)));
        assert!(ctl.is_finished());
        assert!(!ctl.is_warming());
    }

    #[test]
    fn cooler_switched_off_externally_finishes_warm_up() {
        let mut ctl = ThermalController::new(-15.0);
        ctl.warm(reading(true, -10.0, true));
        ctl.step(reading(false, -9.0, false));
        assert!(!ctl.is_warming());
        assert!(ctl.is_finished());
    }

    #[test]
    fn pre_cool_skipped_when_already_cooling() {
        let mut ctl = ThermalController::new(-15.0);
        assert!(ctl.pre_cool(reading(true, -15.0, true)).is_empty());
        assert_eq!(
            ctl.pre_cool(reading(false, 20.0, true)),
            vec![ThermalCommand::SetTarget(-15.0)]
        );
    }

    #[test]
    fn pre_cool_interrupts_warm_up() {
        let mut ctl = ThermalController::new(-20.0);
        ctl.warm(reading(true, -10.0, true));
        assert_eq!(
            ctl.pre_cool(reading(true, -10.0, true)),
            vec![ThermalCommand::SetTarget(-20.0)]
        );
        assert!(!ctl.is_warming());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_sensor_still_gets_the_first_step() {
        let mut ctl = ThermalController::new(-15.0);
        assert_eq!(
            ctl.warm(reading(true, -15.0, false)),
            vec![ThermalCommand::SetTarget(-13.0)]
        );
        assert!(ctl.warm(reading(true, -15.0, false)).is_empty());
        assert_eq!(ctl.settle_target(), -13.0);

        let cmds = ctl.step(ThermalReading {
            anti_dew: Some(false),
            ..reading(true, -13.2, true)
        });
        assert!(matches!(cmds[..], [ThermalCommand::SetTarget(t)] if (t - (-11.2)).abs() < 1e-9));
    }

    #[test]
    fn warm_ignored_when_not_cooling() {
        let mut ctl = ThermalController::new(-15.0);
        ctl.warm(reading(false, 20.0, true));
        assert!(!ctl.is_warming());
    }
}
