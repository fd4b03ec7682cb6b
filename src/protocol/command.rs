//! Logical robot commands and their wire encodings.
//!
//! A [`Command`] is what the operator asked for ("lift up"). A
//! [`ProtocolVariant`] is one way of spelling it on the wire. Backends across
//! deployments accept different spellings, so every [`CommandFamily`] carries
//! an ordered candidate list, most structured first.
//!
//! # Variants
//!
//! | Variant | Body |
//! |---------|------|
//! | `Structured` | `{robotId, commandType, content: {...}, source}` |
//! | `TaskArgs` | `{robotId, task, args: {...}, source}` |
//! | `TaskOnly` | `{type: "command", robotId, task, value?, source}` |
//!
//! # Candidates
//!
//! | Family | Candidates |
//! |--------|------------|
//! | `move`, `turn`, `lift`, `tilt`, `mode` | Structured, TaskArgs, TaskOnly |
//! | `start`, `stop`, `take_photo` | Structured, TaskArgs |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

// ============================================================================
// Constants
// ============================================================================

/// Value of the `source` field stamped on every outbound command.
pub const COMMAND_SOURCE: &str = "web_ui";

/// Candidate order for families that carry an argument.
const WITH_ARGUMENT: &[ProtocolVariant] = &[
    ProtocolVariant::Structured,
    ProtocolVariant::TaskArgs,
    ProtocolVariant::TaskOnly,
];

/// Candidate order for argument-less families.
const BARE: &[ProtocolVariant] = &[ProtocolVariant::Structured, ProtocolVariant::TaskArgs];

// ============================================================================
// Argument Enums
// ============================================================================

/// Drive direction for `move`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelDirection {
    /// Drive forward.
    Forward,
    /// Drive backward.
    Backward,
}

/// Rotation direction for `turn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDirection {
    /// Rotate left.
    Left,
    /// Rotate right.
    Right,
}

/// Vertical direction for `lift` (mast) and `tilt` (camera/platform).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerticalDirection {
    /// Raise.
    Up,
    /// Lower.
    Down,
}

/// Operating mode for `mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// Robot follows its route on its own.
    Auto,
    /// Operator drives.
    Manual,
}

impl TravelDirection {
    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

impl TurnDirection {
    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl VerticalDirection {
    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl DriveMode {
    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

// ============================================================================
// CommandFamily
// ============================================================================

/// Logical command family. The protocol cache is keyed by family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandFamily {
    /// Drive forward/backward.
    Move,
    /// Rotate in place.
    Turn,
    /// Raise/lower the mast.
    Lift,
    /// Tilt up/down.
    Tilt,
    /// Switch auto/manual.
    Mode,
    /// Start the automatic route.
    Start,
    /// Stop everything.
    Stop,
    /// Capture an image.
    TakePhoto,
}

impl CommandFamily {
    /// All families, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Move,
        Self::Turn,
        Self::Lift,
        Self::Tilt,
        Self::Mode,
        Self::Start,
        Self::Stop,
        Self::TakePhoto,
    ];

    /// Wire spelling used as `commandType`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Turn => "turn",
            Self::Lift => "lift",
            Self::Tilt => "tilt",
            Self::Mode => "mode",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::TakePhoto => "take_photo",
        }
    }

    /// Candidate variants in priority order.
    #[must_use]
    pub const fn candidates(self) -> &'static [ProtocolVariant] {
        match self {
            Self::Move | Self::Turn | Self::Lift | Self::Tilt | Self::Mode => WITH_ARGUMENT,
            Self::Start | Self::Stop | Self::TakePhoto => BARE,
        }
    }
}

impl fmt::Display for CommandFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Command
// ============================================================================

/// A logical operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Drive.
    Move(TravelDirection),
    /// Rotate.
    Turn(TurnDirection),
    /// Raise/lower the mast.
    Lift(VerticalDirection),
    /// Tilt.
    Tilt(VerticalDirection),
    /// Switch operating mode.
    Mode(DriveMode),
    /// Start the automatic route.
    Start,
    /// Stop all motion.
    Stop,
    /// Capture an image.
    TakePhoto,
}

impl Command {
    /// Returns the family this command belongs to.
    #[must_use]
    pub const fn family(&self) -> CommandFamily {
        match self {
            Self::Move(_) => CommandFamily::Move,
            Self::Turn(_) => CommandFamily::Turn,
            Self::Lift(_) => CommandFamily::Lift,
            Self::Tilt(_) => CommandFamily::Tilt,
            Self::Mode(_) => CommandFamily::Mode,
            Self::Start => CommandFamily::Start,
            Self::Stop => CommandFamily::Stop,
            Self::TakePhoto => CommandFamily::TakePhoto,
        }
    }

    /// Flat task name used by the task-style variants.
    #[must_use]
    pub const fn task_name(&self) -> &'static str {
        match self {
            Self::Move(TravelDirection::Forward) => "move_forward",
            Self::Move(TravelDirection::Backward) => "move_backward",
            Self::Turn(TurnDirection::Left) => "turn_left",
            Self::Turn(TurnDirection::Right) => "turn_right",
            Self::Lift(VerticalDirection::Up) => "lift_up",
            Self::Lift(VerticalDirection::Down) => "lift_down",
            Self::Tilt(VerticalDirection::Up) => "tilt_up",
            Self::Tilt(VerticalDirection::Down) => "tilt_down",
            Self::Mode(_) => "change_mode",
            Self::Start => "start_route",
            Self::Stop => "stop",
            Self::TakePhoto => "capture_image",
        }
    }

    /// Scalar argument carried outside the task name, if any.
    #[must_use]
    pub const fn scalar(&self) -> Option<&'static str> {
        match self {
            Self::Mode(mode) => Some(mode.as_str()),
            _ => None,
        }
    }

    /// Semantic arguments in structured form (`content`).
    fn content(&self) -> Option<Value> {
        match self {
            Self::Move(d) => Some(json!({ "direction": d.as_str() })),
            Self::Turn(d) => Some(json!({ "direction": d.as_str() })),
            Self::Lift(d) | Self::Tilt(d) => Some(json!({ "direction": d.as_str() })),
            Self::Mode(m) => Some(json!({ "mode": m.as_str() })),
            Self::TakePhoto => Some(json!({})),
            Self::Start | Self::Stop => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scalar() {
            Some(value) => write!(f, "{}({value})", self.task_name()),
            None => f.write_str(self.task_name()),
        }
    }
}

// ============================================================================
// ProtocolVariant
// ============================================================================

/// Pure encoder from a command and robot id to a request body.
pub type Encoder = fn(&Command, &str) -> Value;

/// One candidate wire encoding for a command family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// `commandType` + nested `content`.
    Structured,
    /// Flat `task` + `args`.
    TaskArgs,
    /// Minimal `task` with an optional top-level `value`.
    TaskOnly,
}

impl ProtocolVariant {
    /// Returns the encoder for this variant.
    #[must_use]
    pub const fn encoder(self) -> Encoder {
        match self {
            Self::Structured => encode_structured,
            Self::TaskArgs => encode_task_args,
            Self::TaskOnly => encode_task_only,
        }
    }

    /// Encodes `command` for `robot_id`.
    #[inline]
    #[must_use]
    pub fn encode(self, command: &Command, robot_id: &str) -> Value {
        (self.encoder())(command, robot_id)
    }

    /// Short name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::TaskArgs => "task_args",
            Self::TaskOnly => "task_only",
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Encoders
// ============================================================================

fn encode_structured(command: &Command, robot_id: &str) -> Value {
    let mut body = Map::new();
    body.insert("robotId".into(), Value::from(robot_id));
    body.insert("commandType".into(), Value::from(command.family().as_str()));
    if let Some(content) = command.content() {
        body.insert("content".into(), content);
    }
    body.insert("source".into(), Value::from(COMMAND_SOURCE));
    Value::Object(body)
}

fn encode_task_args(command: &Command, robot_id: &str) -> Value {
    let args = match command.scalar() {
        Some(value) => json!({ "value": value }),
        None => json!({}),
    };
    json!({
        "robotId": robot_id,
        "task": command.task_name(),
        "args": args,
        "source": COMMAND_SOURCE,
    })
}

fn encode_task_only(command: &Command, robot_id: &str) -> Value {
    let mut body = Map::new();
    body.insert("type".into(), Value::from("command"));
    body.insert("robotId".into(), Value::from(robot_id));
    body.insert("task".into(), Value::from(command.task_name()));
    if let Some(value) = command.scalar() {
        body.insert("value".into(), Value::from(value));
    }
    body.insert("source".into(), Value::from(COMMAND_SOURCE));
    Value::Object(body)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOT: &str = "507f1f77bcf86cd799439011";

    #[test]
    fn test_structured_move() {
        let body = ProtocolVariant::Structured.encode(&Command::Move(TravelDirection::Forward), ROBOT);
        assert_eq!(
            body,
            json!({
                "robotId": ROBOT,
                "commandType": "move",
                "content": { "direction": "forward" },
                "source": "web_ui",
            })
        );
    }

    #[test]
    fn test_structured_stop_has_no_content() {
        let body = ProtocolVariant::Structured.encode(&Command::Stop, ROBOT);
        assert!(body.get("content").is_none());
        assert_eq!(body["commandType"], "stop");
    }

    #[test]
    fn test_structured_mode_uses_mode_key() {
        let body = ProtocolVariant::Structured.encode(&Command::Mode(DriveMode::Auto), ROBOT);
        assert_eq!(body["content"], json!({ "mode": "auto" }));
    }

    #[test]
    fn test_task_args_maps_directions_to_task_names() {
        let body = ProtocolVariant::TaskArgs.encode(&Command::Lift(VerticalDirection::Down), ROBOT);
        assert_eq!(body["task"], "lift_down");
        assert_eq!(body["args"], json!({}));

        let body = ProtocolVariant::TaskArgs.encode(&Command::TakePhoto, ROBOT);
        assert_eq!(body["task"], "capture_image");

        let body = ProtocolVariant::TaskArgs.encode(&Command::Start, ROBOT);
        assert_eq!(body["task"], "start_route");
    }

    #[test]
    fn test_task_args_mode_value() {
        let body = ProtocolVariant::TaskArgs.encode(&Command::Mode(DriveMode::Manual), ROBOT);
        assert_eq!(body["task"], "change_mode");
        assert_eq!(body["args"], json!({ "value": "manual" }));
    }

    #[test]
    fn test_task_only_is_minimal() {
        let body = ProtocolVariant::TaskOnly.encode(&Command::Turn(TurnDirection::Left), ROBOT);
        assert_eq!(
            body,
            json!({ "type": "command", "robotId": ROBOT, "task": "turn_left", "source": "web_ui" })
        );

        let body = ProtocolVariant::TaskOnly.encode(&Command::Mode(DriveMode::Auto), ROBOT);
        assert_eq!(body["value"], "auto");
    }

    #[test]
    fn test_candidate_order() {
        assert_eq!(CommandFamily::Tilt.candidates(), WITH_ARGUMENT);
        assert_eq!(CommandFamily::TakePhoto.candidates(), BARE);
        for family in CommandFamily::ALL {
            let candidates = family.candidates();
            assert!((2..=3).contains(&candidates.len()));
            assert_eq!(candidates[0], ProtocolVariant::Structured);
        }
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::Tilt(VerticalDirection::Up).to_string(), "tilt_up");
        assert_eq!(Command::Mode(DriveMode::Auto).to_string(), "change_mode(auto)");
    }

    #[test]
    fn test_family_serde_spelling() {
        let json = serde_json::to_string(&CommandFamily::TakePhoto).expect("serialize");
        assert_eq!(json, "\"take_photo\"");
    }
}
