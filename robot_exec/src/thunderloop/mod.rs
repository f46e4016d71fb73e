//! # Thunderloop
//!
//! The robot's fixed frequency control loop. Each cycle:
//!
//! 1. Wait for the cycle's absolute deadline
//! 2. Poll the network for the newest primitive set (and maybe send the last status)
//! 3. Resolve the primitive to run, substituting `Stop` if primitives have gone stale
//! 4. Step the primitive executor
//! 5. Poll the motor and power services with the executor's demands
//! 6. Assemble the status, faults included, and hand it to every status observer
//!
//! Everything here runs on one thread. The only thing that blocks is the deadline wait.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod executor;
mod faults;
mod monitors;
mod pacing;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use std::{
    sync::{Arc, atomic::{AtomicBool, Ordering}},
    time::{Duration, Instant},
};

use comms_if::{
    eqpt::power::KickCalibration,
    primitive::{Primitive, PrimitiveSet},
    status::{
        ChipperKickerStatus, ComputeStatus, PrimitiveExecutorStatus, RobotStatus
    },
};
use util::host;

use crate::{
    data_store::DataStore,
    handoff::Handoff,
    motor::MotorService,
    network::NetworkLink,
    params::{RobotParams, ThunderloopParams},
    power::PowerLink,
};

pub use executor::*;
pub use faults::*;
pub use monitors::*;
pub use pacing::*;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Receives every status the loop assembles, once per cycle.
pub trait StatusObserver: Send {
    fn observe(&mut self, status: &RobotStatus);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The services the loop drives.
pub struct Services {
    pub network: Box<dyn NetworkLink>,
    pub power: Box<dyn PowerLink>,
    pub motor: Box<dyn MotorService>,
    pub executor: Box<dyn PrimitiveExecutor>,
}

/// The control loop.
pub struct Thunderloop {
    robot_id: u32,
    params: ThunderloopParams,
    calibration: KickCalibration,

    services: Services,
    observers: Vec<Box<dyn StatusObserver>>,

    ds: DataStore,

    /// Status assembled on the previous cycle, sent by the network service this cycle
    status: RobotStatus,

    /// Newest primitive set accepted so far
    current_set: Option<PrimitiveSet>,

    staleness: StalenessMonitor,
    was_stale: bool,
    chicker: ChickerTimers,
    stability: PowerStabilityMonitor,

    firmware_version: String,
    date_flashed: String,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Thunderloop {
    pub fn new(robot: &RobotParams, params: ThunderloopParams, services: Services) -> Self {
        let firmware_version = host::read_first_line(&params.firmware_version_path)
            .unwrap_or_else(|| String::from("unknown"));
        let date_flashed = host::read_first_line(&params.date_flashed_path)
            .unwrap_or_else(|| String::from("unknown"));

        info!(
            "Thunderloop for robot {} at {} Hz, firmware {} flashed {}",
            robot.robot_id, params.loop_hz, firmware_version, date_flashed
        );

        let packet_timeout = Duration::from_secs_f64(params.packet_timeout_ms / 1000.0);

        Self {
            robot_id: robot.robot_id,
            calibration: robot.calibration,
            services,
            observers: Vec::new(),
            ds: DataStore {
                power_stable: true,
                ..Default::default()
            },
            status: RobotStatus {
                robot_id: robot.robot_id,
                ..Default::default()
            },
            current_set: None,
            staleness: StalenessMonitor::new(packet_timeout, Instant::now()),
            was_stale: true,
            chicker: ChickerTimers::default(),
            stability: PowerStabilityMonitor::new(&params.kernel_log_path),
            firmware_version,
            date_flashed,
            params,
        }
    }

    /// Add something that gets every assembled status.
    pub fn add_observer(&mut self, observer: Box<dyn StatusObserver>) {
        self.observers.push(observer);
    }

    /// The most recently assembled status.
    pub fn status(&self) -> &RobotStatus {
        &self.status
    }

    /// Run at the configured frequency until `keep_running` is cleared.
    pub fn run(&mut self, keep_running: &AtomicBool) {
        let mut pacer = Pacer::new(self.params.loop_hz);

        info!("Beginning main loop");

        while keep_running.load(Ordering::Relaxed) {
            pacer.wait();
            self.run_iteration_at(Instant::now());
        }

        info!("Main loop ended after {} cycles", self.ds.num_cycles);
    }

    /// Run one cycle as if the loop woke at `now`.
    pub fn run_iteration_at(&mut self, now: Instant) {
        self.ds.cycle_start(now, self.params.loop_hz);

        // ---- NETWORK ----

        let t = Instant::now();
        let inbound = self.services.network.poll(&mut self.status);
        self.ds.iteration.network_poll_time = t.elapsed();

        // ---- PRIMITIVE RESOLUTION ----

        let mut new_set = false;
        if let Some(inbound) = inbound {
            let is_newer = match self.current_set {
                Some(ref current) => inbound.set.is_newer_than(current),
                None => true,
            };

            if is_newer {
                self.staleness.accept(inbound.received_at);
                self.current_set = Some(inbound.set);
                new_set = true;
            }
        }

        let stale = self.staleness.is_stale(now);
        if stale && !self.was_stale {
            warn!(
                "No new primitive for {:.0} ms, stopping",
                self.staleness.ms_since_last_accepted(now)
            );
        }
        else if !stale && self.was_stale {
            info!("Primitives resumed");
        }

        let primitive = match (stale, self.current_set.as_ref()) {
            (false, Some(set)) => set.primitive_for(self.robot_id).copied().unwrap_or_default(),
            _ => Primitive::Stop,
        };

        // ---- EXECUTION ----

        if new_set || stale != self.was_stale || self.ds.num_cycles == 0 {
            let t = Instant::now();
            self.services.executor.start(&primitive);
            self.ds.iteration.executor_start_time = t.elapsed();
        }
        self.was_stale = stale;

        let t = Instant::now();
        let output = self.services.executor.step(
            &self.ds.measured_velocity,
            1.0 / self.params.loop_hz
        );
        self.ds.iteration.executor_step_time = t.elapsed();

        // ---- PERIPHERALS ----

        let t = Instant::now();
        let motor_status = self.services.motor.poll(&output.motor_control);
        self.ds.iteration.motor_poll_time = t.elapsed();
        self.ds.measured_velocity = motor_status.local_velocity;

        let t = Instant::now();
        let power_status = self.services.power.poll(&output.power_control, &self.calibration);
        self.ds.iteration.power_poll_time = t.elapsed();
        self.ds.iteration.power_control = output.power_control;
        self.chicker.update(&output.power_control, now);

        // ---- STATUS ----

        if self.ds.is_1_hz_cycle {
            self.ds.cpu_temperature_c = host::read_cpu_temperature(
                &self.params.cpu_temperature_path
            );
            self.ds.power_stable = self.stability.check();
        }

        self.ds.iteration.faults = compute_faults(
            &FaultInputs {
                power_status,
                power_status_age: self.services.power.status_age(),
                cpu_temperature_c: self.ds.cpu_temperature_c,
                power_stable: self.ds.power_stable,
            },
            &self.params.thresholds,
            Duration::from_secs_f64(self.params.peripheral_timeout_ms / 1000.0),
        );

        let status = &mut self.status;
        status.robot_id = self.robot_id;
        status.last_handled_primitive_set = self.current_set
            .as_ref()
            .map(|s| s.sequence_number)
            .unwrap_or(0);
        status.thunderloop_status = self.ds.iteration.thunderloop_status();
        status.network_status.ms_since_last_primitive_received =
            self.staleness.ms_since_last_accepted(now);
        status.power_status = power_status;
        status.motor_status = motor_status;
        status.compute_status = ComputeStatus {
            cpu_temperature: self.ds.cpu_temperature_c.unwrap_or(0.0),
        };
        status.chipper_kicker_status = ChipperKickerStatus {
            ms_since_kicker_fired: self.chicker.ms_since_kicker_fired(now),
            ms_since_chipper_fired: self.chicker.ms_since_chipper_fired(now),
        };
        status.primitive_executor_status = PrimitiveExecutorStatus {
            running_stop: primitive == Primitive::Stop,
            timed_out: stale,
        };
        status.error_code = self.ds.iteration.faults.clone();
        status.firmware_version = self.firmware_version.clone();
        status.date_flashed = self.date_flashed.clone();

        for observer in self.observers.iter_mut() {
            observer.observe(&self.status);
        }

        self.ds.cycle_end();
    }

    /// Stop every service, peripheral I/O threads first, then the network.
    pub fn shutdown(&mut self) {
        info!("Shutting down Thunderloop");

        self.services.motor.make_safe();
        self.services.power.stop();
        self.services.network.stop();

        debug!("Thunderloop shutdown complete");
    }
}

impl StatusObserver for Arc<Handoff<RobotStatus>> {
    fn observe(&mut self, status: &RobotStatus) {
        self.publish(status.clone());
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{motor::NullMotorService, network::InboundPrimitive};
    use comms_if::{
        eqpt::{
            motor::{LocalVelocity, MotorControl},
            power::{ChickerCommand, PowerControl, PowerStatus},
        },
        primitive::{DirectControlPrimitive, Timestamp},
        status::ErrorCode,
    };
    use std::sync::Mutex;

    /// Network that delivers whatever the test queued, and keeps every status it was polled with.
    struct FakeNetwork {
        inbox: Arc<Mutex<Option<InboundPrimitive>>>,
        polled: Arc<Mutex<Vec<RobotStatus>>>,
    }

    impl NetworkLink for FakeNetwork {
        fn poll(&mut self, status: &mut RobotStatus) -> Option<InboundPrimitive> {
            self.polled.lock().unwrap().push(status.clone());
            self.inbox.lock().unwrap().clone()
        }

        fn stop(&mut self) {}
    }

    /// Power board that is always healthy and records the commands it was given.
    struct FakePower {
        controls: Arc<Mutex<Vec<PowerControl>>>,
        stopped: Arc<AtomicBool>,
    }

    impl PowerLink for FakePower {
        fn poll(&mut self, control: &PowerControl, _: &KickCalibration) -> PowerStatus {
            self.controls.lock().unwrap().push(*control);
            PowerStatus {
                battery_voltage: 24.0,
                capacitor_voltage: 100.0,
                ..Default::default()
            }
        }

        fn status_age(&self) -> Option<Duration> {
            Some(Duration::from_millis(1))
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        tl: Thunderloop,
        inbox: Arc<Mutex<Option<InboundPrimitive>>>,
        polled: Arc<Mutex<Vec<RobotStatus>>>,
        controls: Arc<Mutex<Vec<PowerControl>>>,
        stopped: Arc<AtomicBool>,
        snapshot: Arc<Handoff<RobotStatus>>,
    }

    fn robot_params() -> RobotParams {
        RobotParams {
            robot_id: 3,
            channel_id: 0,
            network_interface: "lo".into(),
            calibration: KickCalibration { kick_coeff: 0.3, kick_constant: 300, chip_pulse_width: 350 },
        }
    }

    fn harness() -> Harness {
        let inbox = Arc::new(Mutex::new(None));
        let polled = Arc::new(Mutex::new(Vec::new()));
        let controls = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(AtomicBool::new(false));
        let snapshot = Arc::new(Handoff::new(RobotStatus::default()));

        let mut tl = Thunderloop::new(
            &robot_params(),
            ThunderloopParams::for_tests(),
            Services {
                network: Box::new(FakeNetwork { inbox: inbox.clone(), polled: polled.clone() }),
                power: Box::new(FakePower { controls: controls.clone(), stopped: stopped.clone() }),
                motor: Box::new(NullMotorService::default()),
                executor: Box::new(BasicExecutor::default()),
            }
        );
        tl.add_observer(Box::new(snapshot.clone()));

        Harness { tl, inbox, polled, controls, stopped, snapshot }
    }

    fn direct_kick(seq: u64, t: f64, received_at: Instant) -> InboundPrimitive {
        let mut set = PrimitiveSet {
            sequence_number: seq,
            time_sent: Timestamp { epoch_timestamp_seconds: t },
            ..Default::default()
        };
        set.robot_primitives.insert(3, Primitive::DirectControl(DirectControlPrimitive {
            motor_control: MotorControl {
                target_velocity: LocalVelocity { x_m_per_s: 1.0, ..Default::default() },
                dribbler_speed_rpm: 0.0,
            },
            power_control: PowerControl { chicker: ChickerCommand::Kick { speed_m_per_s: 2.0 } },
        }));

        InboundPrimitive {
            set,
            received_at,
            received_time_seconds: t + 0.001,
            loss_percentage: 0.0,
        }
    }

    #[test]
    fn test_stop_before_any_primitive() {
        let mut h = harness();
        h.tl.run_iteration_at(Instant::now());

        let status = h.tl.status();
        assert!(status.primitive_executor_status.running_stop);
        assert!(status.primitive_executor_status.timed_out);
        assert_eq!(status.robot_id, 3);
        assert_eq!(h.controls.lock().unwrap()[0], PowerControl::default());

        // Observer got the same status
        assert_eq!(h.snapshot.get(), *h.tl.status());
    }

    #[test]
    fn test_primitive_executed_then_times_out() {
        let mut h = harness();
        let t0 = Instant::now();

        *h.inbox.lock().unwrap() = Some(direct_kick(42, 100.0, t0));

        h.tl.run_iteration_at(t0);
        let status = h.tl.status().clone();
        assert_eq!(status.last_handled_primitive_set, 42);
        assert!(!status.primitive_executor_status.running_stop);
        assert!(!status.primitive_executor_status.timed_out);
        assert_eq!(status.motor_status.local_velocity.x_m_per_s, 1.0);
        assert!(h.controls.lock().unwrap()[0].chicker.is_kick());

        // Still within the packet timeout with nothing new
        h.tl.run_iteration_at(t0 + Duration::from_millis(400));
        assert!(!h.tl.status().primitive_executor_status.timed_out);

        // Past the timeout the executor is stopped on the very next cycle
        h.tl.run_iteration_at(t0 + Duration::from_millis(501));
        let status = h.tl.status().clone();
        assert!(status.primitive_executor_status.timed_out);
        assert!(status.primitive_executor_status.running_stop);
        assert_eq!(status.motor_status.local_velocity, LocalVelocity::default());
        assert_eq!(*h.controls.lock().unwrap().last().unwrap(), PowerControl::default());

        // The same set again doesn't revive it
        h.tl.run_iteration_at(t0 + Duration::from_millis(505));
        assert!(h.tl.status().primitive_executor_status.timed_out);

        // A newer set does
        let t1 = t0 + Duration::from_millis(510);
        *h.inbox.lock().unwrap() = Some(direct_kick(43, 101.0, t1));
        h.tl.run_iteration_at(t1);
        let status = h.tl.status();
        assert!(!status.primitive_executor_status.timed_out);
        assert_eq!(status.last_handled_primitive_set, 43);
    }

    #[test]
    fn test_older_set_is_ignored() {
        let mut h = harness();
        let t0 = Instant::now();

        *h.inbox.lock().unwrap() = Some(direct_kick(10, 100.0, t0));
        h.tl.run_iteration_at(t0);

        // Higher sequence number but sent earlier, reordered in transit
        *h.inbox.lock().unwrap() = Some(direct_kick(11, 99.0, t0));
        h.tl.run_iteration_at(t0 + Duration::from_millis(5));
        assert_eq!(h.tl.status().last_handled_primitive_set, 10);
    }

    #[test]
    fn test_status_reaches_network_next_cycle() {
        let mut h = harness();
        let t0 = Instant::now();
        *h.inbox.lock().unwrap() = Some(direct_kick(7, 100.0, t0));

        h.tl.run_iteration_at(t0);
        h.tl.run_iteration_at(t0 + Duration::from_millis(5));

        let polled = h.polled.lock().unwrap();
        assert_eq!(polled.len(), 2);
        assert_eq!(polled[1].last_handled_primitive_set, 7);
        assert!(polled[1].chipper_kicker_status.ms_since_kicker_fired >= 0.0);
        // Healthy fake power board and unreadable host files raise no faults
        assert!(!polled[1].error_code.contains(&ErrorCode::PeripheralDisconnected));
        assert!(polled[1].error_code.is_empty());
        assert_eq!(polled[1].firmware_version, "unknown");
    }

    #[test]
    fn test_run_and_shutdown() {
        let mut h = harness();
        let keep_running = Arc::new(AtomicBool::new(true));

        let flag = keep_running.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            flag.store(false, Ordering::Relaxed);
        });

        h.tl.run(&keep_running);
        stopper.join().unwrap();
        h.tl.shutdown();

        // 200 Hz for about 50 ms
        let cycles = h.polled.lock().unwrap().len();
        assert!(cycles >= 5, "only {} cycles ran", cycles);
        assert!(h.stopped.load(Ordering::SeqCst));
    }
}
