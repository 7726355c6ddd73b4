//! TRC state: operator command and per-turtle status records.
//!
//! State messages carry partial updates. [`State::merge`] applies such an
//! update as a patch: turtles and fields not mentioned keep their values.

use crate::error::{ProtocolError, ValidationError};
use crate::message::Validate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    DroppedBall,
    Start,
    Stop,
    GoIn,
    GoOut,
    KickOffMagenta,
    KickOffCyan,
    FreeKickMagenta,
    FreeKickCyan,
    GoalKickMagenta,
    GoalKickCyan,
    ThrowInMagenta,
    ThrowInCyan,
    CornerMagenta,
    CornerCyan,
    PenaltyMagenta,
    PenaltyCyan,
    RoleAssignerOn,
    RoleAssignerOff,
    PassDemo,
    PenaltyDemo,
    BallHandlingDemo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamColor {
    Magenta,
    Cyan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeGoal {
    Yellow,
    Blue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    None,
    Inactive,
    Goalkeeper,
    AttackerMain,
    AttackerAssist,
    DefenderMain,
    DefenderAssist,
    DefenderAssist2,
}

/// Depth sensor status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KinectState {
    NoState,
    NoBall,
    Ball,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallFound {
    Yes,
    Communicated,
    No,
}

/// Current ball possessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cpb {
    Yes,
    Team,
    No,
}

/// Upper bound of the restart counters and battery voltage.
pub const MAX_COUNTER: u8 = 99;
/// Upper bound of the emergency status.
pub const MAX_EMERGENCY_STATUS: u8 = 100;
/// Upper bound of the active DevPC id.
pub const MAX_ACTIVE_DEV_PC: u8 = 90;

/// Status of a single turtle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurtleState {
    /// Vision executable up.
    #[serde(rename = "visionstatus")]
    pub vision_status: bool,
    /// Motion executable up.
    #[serde(rename = "motionstatus")]
    pub motion_status: bool,
    /// Worldmodel executable up.
    #[serde(rename = "worldmodelstatus")]
    pub worldmodel_status: bool,
    /// App manager up.
    #[serde(rename = "appmanstatus")]
    pub appman_status: bool,

    #[serde(rename = "restartcountmotion")]
    pub restart_count_motion: u8,
    #[serde(rename = "restartcountvision")]
    pub restart_count_vision: u8,
    #[serde(rename = "restartcountworldmodel")]
    pub restart_count_worldmodel: u8,

    #[serde(rename = "ballfound", skip_serializing_if = "Option::is_none")]
    pub ball_found: Option<BallFound>,
    #[serde(rename = "localizationstatus")]
    pub localization_status: bool,
    #[serde(rename = "cpb", skip_serializing_if = "Option::is_none")]
    pub cpb: Option<Cpb>,

    #[serde(rename = "batteryvoltage")]
    pub battery_voltage: u8,
    #[serde(rename = "emergencystatus")]
    pub emergency_status: u8,

    #[serde(rename = "role", skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "refboxrole", skip_serializing_if = "Option::is_none")]
    pub refbox_role: Option<Role>,

    #[serde(rename = "robotinfield")]
    pub robot_in_field: bool,
    #[serde(rename = "robotembutton")]
    pub robot_emergency_button: bool,

    #[serde(rename = "homegoal", skip_serializing_if = "Option::is_none")]
    pub home_goal: Option<HomeGoal>,
    #[serde(rename = "teamcolor", skip_serializing_if = "Option::is_none")]
    pub team_color: Option<TeamColor>,

    /// DevPC currently controlling the robot.
    #[serde(rename = "activedevpc")]
    pub active_dev_pc: u8,

    #[serde(rename = "kinect1_state", skip_serializing_if = "Option::is_none")]
    pub kinect1_state: Option<KinectState>,
    #[serde(rename = "kinect2_state", skip_serializing_if = "Option::is_none")]
    pub kinect2_state: Option<KinectState>,
}

impl TurtleState {
    fn validate_as(&self, id: &str) -> Result<(), ValidationError> {
        let checks = [
            ("restartcountmotion", self.restart_count_motion, MAX_COUNTER),
            ("restartcountvision", self.restart_count_vision, MAX_COUNTER),
            (
                "restartcountworldmodel",
                self.restart_count_worldmodel,
                MAX_COUNTER,
            ),
            ("batteryvoltage", self.battery_voltage, MAX_COUNTER),
            (
                "emergencystatus",
                self.emergency_status,
                MAX_EMERGENCY_STATUS,
            ),
            ("activedevpc", self.active_dev_pc, MAX_ACTIVE_DEV_PC),
        ];
        for (field, value, max) in checks {
            if value > max {
                return Err(ValidationError::new(
                    format!("turtles.{id}.{field}"),
                    format!("{value} exceeds maximum {max}"),
                ));
            }
        }
        Ok(())
    }
}

/// State of TRC and its turtles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turtles: Option<BTreeMap<String, TurtleState>>,
}

impl State {
    pub fn with_command(command: Command) -> Self {
        Self {
            command: Some(command),
            turtles: None,
        }
    }

    pub fn with_turtles(turtles: BTreeMap<String, TurtleState>) -> Self {
        Self {
            command: None,
            turtles: Some(turtles),
        }
    }

    /// Returns the record of turtle `id`, if known.
    pub fn turtle(&self, id: &str) -> Option<&TurtleState> {
        self.turtles.as_ref().and_then(|t| t.get(id))
    }

    /// Applies `patch` (a decoded state payload) onto a copy of `self`.
    ///
    /// Only keys present in `patch` are written; nested objects are merged
    /// key by key and `null` values are ignored. `self` is never modified.
    pub fn merge(&self, patch: &Value) -> Result<State, ProtocolError> {
        let Value::Object(patch) = patch else {
            return Err(ProtocolError::PatchNotObject(json_kind(patch)));
        };
        let mut current = serde_json::to_value(self)?;
        if let Value::Object(target) = &mut current {
            merge_object(target, patch);
        }
        Ok(serde_json::from_value(current)?)
    }
}

impl Validate for State {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(turtles) = &self.turtles {
            if turtles.is_empty() {
                return Err(ValidationError::new("turtles", "must not be empty"));
            }
            for (id, turtle) in turtles {
                turtle.validate_as(id)?;
            }
        }
        Ok(())
    }
}

fn merge_object(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Null => {}
            Value::Object(inner) => match target.get_mut(key) {
                Some(Value::Object(existing)) => merge_object(existing, inner),
                _ => {
                    let mut fresh = Map::new();
                    merge_object(&mut fresh, inner);
                    target.insert(key.clone(), Value::Object(fresh));
                }
            },
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
