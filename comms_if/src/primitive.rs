//! # Primitives
//!
//! A primitive is the instruction the AI gives one robot for the next control period. The AI
//! sends a [`PrimitiveSet`] holding a primitive for every robot it controls; each robot picks out
//! its own.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::eqpt::{motor::{LocalVelocity, MotorControl}, power::PowerControl};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Wall clock timestamp attached to messages.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Timestamp {
    pub epoch_timestamp_seconds: f64,
}

/// A set of primitives for every robot the AI is controlling.
///
/// Newness is judged by `time_sent`, not by `sequence_number`, since the transport may reorder
/// packets.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PrimitiveSet {
    /// Monotonically increasing number assigned by the AI
    pub sequence_number: u64,

    /// Time the AI sent this set
    pub time_sent: Timestamp,

    /// Primitive for each robot, by robot id
    pub robot_primitives: BTreeMap<u32, Primitive>,
}

/// Direct control over the robot's motors and power board.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct DirectControlPrimitive {
    pub motor_control: MotorControl,
    pub power_control: PowerControl,
}

/// Move at a target velocity, respecting an acceleration limit.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct MovePrimitive {
    pub target_velocity: LocalVelocity,
    pub max_acceleration_m_per_s_2: f64,
    pub dribbler_speed_rpm: f64,
    pub power_control: PowerControl,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Stop,
    DirectControl(DirectControlPrimitive),
    Move(MovePrimitive),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for Primitive {
    fn default() -> Self {
        Primitive::Stop
    }
}

impl PrimitiveSet {
    /// Get the primitive addressed to the given robot, if the set has one.
    pub fn primitive_for(&self, robot_id: u32) -> Option<&Primitive> {
        self.robot_primitives.get(&robot_id)
    }

    /// True if this set was sent strictly after `other`.
    pub fn is_newer_than(&self, other: &PrimitiveSet) -> bool {
        self.time_sent.epoch_timestamp_seconds > other.time_sent.epoch_timestamp_seconds
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_json_round_trip_with_robot_keys() {
        let mut set = PrimitiveSet {
            sequence_number: 42,
            time_sent: Timestamp { epoch_timestamp_seconds: 1700000000.25 },
            ..Default::default()
        };
        set.robot_primitives.insert(3, Primitive::Stop);
        set.robot_primitives.insert(5, Primitive::Move(MovePrimitive {
            target_velocity: LocalVelocity { x_m_per_s: 1.0, ..Default::default() },
            max_acceleration_m_per_s_2: 3.0,
            ..Default::default()
        }));

        let json = serde_json::to_string(&set).unwrap();
        let parsed: PrimitiveSet = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, set);
        assert_eq!(parsed.primitive_for(3), Some(&Primitive::Stop));
        assert_eq!(parsed.primitive_for(4), None);
    }

    #[test]
    fn test_newness_uses_timestamp() {
        let older = PrimitiveSet {
            sequence_number: 10,
            time_sent: Timestamp { epoch_timestamp_seconds: 5.0 },
            ..Default::default()
        };
        // Reordered: lower sequence number but later send time
        let newer = PrimitiveSet {
            sequence_number: 9,
            time_sent: Timestamp { epoch_timestamp_seconds: 6.0 },
            ..Default::default()
        };

        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
        assert!(!older.is_newer_than(&older));
    }
}
