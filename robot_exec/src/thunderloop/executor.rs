//! Primitive execution
//!
//! Turning a primitive into motor and power demands is the job of a [`PrimitiveExecutor`]. The
//! loop only relies on the trait; [`BasicExecutor`] is the executor the robot ships with.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::{motor::{LocalVelocity, MotorControl}, power::PowerControl},
    primitive::Primitive,
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait PrimitiveExecutor: Send {
    /// Begin executing `primitive`, replacing whatever was running.
    fn start(&mut self, primitive: &Primitive);

    /// Advance by `dt_s` seconds given the velocity measured by the motor service.
    fn step(&mut self, measured: &LocalVelocity, dt_s: f64) -> ExecutorOutput;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Demands produced by one executor step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExecutorOutput {
    pub motor_control: MotorControl,
    pub power_control: PowerControl,
}

/// Executes primitives directly, without any trajectory planning.
///
/// - `Stop` commands zero velocity and leaves the chicker idle
/// - `DirectControl` is passed straight through
/// - `Move` steps the measured velocity towards the target, limiting the change in linear
///   velocity to the primitive's maximum acceleration
#[derive(Debug, Default)]
pub struct BasicExecutor {
    primitive: Primitive,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PrimitiveExecutor for BasicExecutor {
    fn start(&mut self, primitive: &Primitive) {
        self.primitive = *primitive;
    }

    fn step(&mut self, measured: &LocalVelocity, dt_s: f64) -> ExecutorOutput {
        match self.primitive {
            Primitive::Stop => ExecutorOutput::default(),
            Primitive::DirectControl(d) => ExecutorOutput {
                motor_control: d.motor_control,
                power_control: d.power_control,
            },
            Primitive::Move(m) => ExecutorOutput {
                motor_control: MotorControl {
                    target_velocity: limit_acceleration(
                        measured,
                        &m.target_velocity,
                        m.max_acceleration_m_per_s_2,
                        dt_s
                    ),
                    dribbler_speed_rpm: m.dribbler_speed_rpm,
                },
                power_control: m.power_control,
            },
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Step from `current` towards `target`, changing the linear velocity by at most
/// `max_acc * dt_s`. A non-positive limit means no limit.
pub fn limit_acceleration(
    current: &LocalVelocity,
    target: &LocalVelocity,
    max_acc: f64,
    dt_s: f64
) -> LocalVelocity {
    if !(max_acc > 0.0) || !(dt_s > 0.0) {
        return *target
    }

    let dx = target.x_m_per_s - current.x_m_per_s;
    let dy = target.y_m_per_s - current.y_m_per_s;
    let change = dx.hypot(dy);
    let max_change = max_acc * dt_s;

    if change <= max_change {
        return *target
    }

    let scale = max_change / change;
    LocalVelocity {
        x_m_per_s: current.x_m_per_s + dx * scale,
        y_m_per_s: current.y_m_per_s + dy * scale,
        angular_rad_per_s: target.angular_rad_per_s,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::{
        eqpt::power::ChickerCommand,
        primitive::{DirectControlPrimitive, MovePrimitive},
    };

    #[test]
    fn test_stop_is_zero() {
        let mut exec = BasicExecutor::default();
        let out = exec.step(&LocalVelocity { x_m_per_s: 1.0, ..Default::default() }, 0.005);
        assert_eq!(out, ExecutorOutput::default());
    }

    #[test]
    fn test_direct_control_passthrough() {
        let direct = DirectControlPrimitive {
            motor_control: MotorControl {
                target_velocity: LocalVelocity { x_m_per_s: 2.0, ..Default::default() },
                dribbler_speed_rpm: 500.0,
            },
            power_control: PowerControl { chicker: ChickerCommand::Chip { distance_m: 1.0 } },
        };

        let mut exec = BasicExecutor::default();
        exec.start(&Primitive::DirectControl(direct));
        let out = exec.step(&LocalVelocity::default(), 0.005);
        assert_eq!(out.motor_control, direct.motor_control);
        assert_eq!(out.power_control, direct.power_control);
    }

    #[test]
    fn test_move_is_acceleration_limited() {
        let mut exec = BasicExecutor::default();
        exec.start(&Primitive::Move(MovePrimitive {
            target_velocity: LocalVelocity { x_m_per_s: 3.0, y_m_per_s: 4.0, angular_rad_per_s: 1.0 },
            max_acceleration_m_per_s_2: 2.0,
            ..Default::default()
        }));

        // 2 m/s^2 for 0.5 s from rest is 1 m/s along the direction of the target
        let out = exec.step(&LocalVelocity::default(), 0.5);
        let v = out.motor_control.target_velocity;
        assert!((v.x_m_per_s - 0.6).abs() < 1e-9);
        assert!((v.y_m_per_s - 0.8).abs() < 1e-9);
        assert_eq!(v.angular_rad_per_s, 1.0);

        // Close enough to reach the target in one step
        let out = exec.step(&LocalVelocity { x_m_per_s: 2.9, y_m_per_s: 4.0, ..Default::default() }, 0.5);
        assert_eq!(out.motor_control.target_velocity.x_m_per_s, 3.0);
    }
}
