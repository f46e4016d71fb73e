//! Main robot-side executable entry point.
//!
//! # Architecture
//!
//! - Initialise the session, logging and parameters
//! - Wait for the network to come up
//! - Start the background services:
//!     - Network service (primitive listeners, status sender)
//!     - Power service (serial link to the power board)
//!     - Telemetry server
//! - Install the crash handler, which safes the power board and broadcasts a crash report
//! - Run the Thunderloop until the process is stopped

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{Report, eyre::{WrapErr, eyre}};
use log::{info, warn};
use std::{
    sync::{Arc, atomic::AtomicBool},
    thread,
    time::Duration,
};

// Internal
use comms_if::{
    net::{NetParams, zmq, udp::UdpSender},
    status::RobotStatus,
};
use robot_lib::{
    crash::{self, CrashContext, Peripheral},
    handoff::Handoff,
    motor::NullMotorService,
    network::NetworkService,
    params::{PowerParams, RobotParams, ThunderloopParams},
    power::PowerService,
    telemetry::TmServer,
    thunderloop::{BasicExecutor, Services, Thunderloop},
};
use util::{
    audit::AuditLog,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Time between attempts to reach the network during startup.
const NETWORK_RETRY_PERIOD: Duration = Duration::from_secs(1);

/// Cleared to end the main loop.
///
/// Nothing in this executable clears it: SIGINT, SIGTERM and the fatal signals all leave through
/// the crash handler, which exits the process without returning here. The shutdown sequence after
/// the loop only runs if the loop is stopped from inside the process.
static KEEP_RUNNING: AtomicBool = AtomicBool::new(true);

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {

    // ---- EARLY INITIALISATION ----

    color_eyre::install()?;

    let session = Session::new(
        "robot_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Debug, &session)
        .wrap_err("Failed to initialise logging")?;

    info!("Thunderbots Robot Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let robot_params: RobotParams = util::params::load("robot.toml")
        .wrap_err("Could not load robot params")?;
    let net_params: NetParams = util::params::load("net.toml")
        .wrap_err("Could not load net params")?;
    let loop_params: ThunderloopParams = util::params::load("thunderloop.toml")
        .wrap_err("Could not load thunderloop params")?;
    let power_params: PowerParams = util::params::load("power.toml")
        .wrap_err("Could not load power params")?;

    robot_params.are_valid().wrap_err("Invalid robot params")?;
    loop_params.are_valid().wrap_err("Invalid thunderloop params")?;
    power_params.are_valid().wrap_err("Invalid power params")?;

    info!(
        "Parameters loaded, robot {} on channel {} via {}",
        robot_params.robot_id, robot_params.channel_id, robot_params.network_interface
    );

    // ---- WAIT FOR NETWORK ----

    wait_for_network(&robot_params, &net_params);

    // ---- INITIALISE SERVICES ----

    let audit_log = if net_params.audit_primitives {
        let path = session.audit_root.join("primitives.bin");
        info!("Auditing received primitives to {:?}", path);
        Some(AuditLog::new(&path).wrap_err("Failed to create the primitive audit log")?)
    }
    else {
        None
    };

    let network = NetworkService::new(
        &robot_params,
        &net_params,
        &loop_params,
        audit_log.as_ref().and_then(|a| a.sink())
    ).wrap_err("Failed to initialise the network service")?;
    info!("Network service initialised");

    let power = PowerService::open(&power_params)
        .wrap_err("Failed to initialise the power service")?;
    info!("Power service initialised on {}", power_params.device);

    // ---- CRASH HANDLING ----

    let last_status = Arc::new(Handoff::new(RobotStatus {
        robot_id: robot_params.robot_id,
        ..Default::default()
    }));

    let group = NetParams::multicast_group(robot_params.channel_id)
        .ok_or_else(|| eyre!("No multicast group for channel {}", robot_params.channel_id))?;

    crash::install(CrashContext {
        robot_id: robot_params.robot_id,
        sender: UdpSender::new(
            group,
            net_params.robot_crash_port,
            Some(&robot_params.network_interface)
        ).wrap_err("Failed to create the crash report sender")?,
        peripherals: vec![power.safing() as Arc<dyn Peripheral>],
        last_status: last_status.clone(),
    }).wrap_err("Failed to install the crash handler")?;
    info!("Crash handler installed");

    // ---- TELEMETRY ----

    let zmq_ctx = zmq::Context::new();
    let tm_server = TmServer::new(&zmq_ctx, &net_params)
        .wrap_err("Failed to initialise the TmServer")?;
    info!("TmServer initialised on {}\n", net_params.tm_endpoint);

    // ---- MAIN LOOP ----

    let mut thunderloop = Thunderloop::new(
        &robot_params,
        loop_params,
        Services {
            network: Box::new(network),
            power: Box::new(power),
            motor: Box::new(NullMotorService::default()),
            executor: Box::new(BasicExecutor::default()),
        }
    );
    thunderloop.add_observer(Box::new(tm_server));
    thunderloop.add_observer(Box::new(last_status));

    thunderloop.run(&KEEP_RUNNING);

    // ---- SHUTDOWN ----

    // Unreachable through signals, see `KEEP_RUNNING`

    thunderloop.shutdown();

    if let Some(log) = audit_log {
        log.exit();
    }

    info!("End of execution");

    Ok(())
}

/// Block until a datagram can be sent on the robot's channel.
///
/// On boot the wireless interface can come up after this process starts, sockets created before
/// then would never reach the network.
fn wait_for_network(robot: &RobotParams, net: &NetParams) {
    let mut attempts: u64 = 0;

    loop {
        let result = NetParams::multicast_group(robot.channel_id)
            .ok_or(())
            .and_then(|group| UdpSender::new(
                group,
                net.network_test_port,
                Some(&robot.network_interface)
            ).map_err(|e| {
                if attempts == 0 {
                    warn!("Network not ready: {}", e);
                }
            }))
            .and_then(|sender| sender.send_bytes(&[]).map_err(|e| {
                if attempts == 0 {
                    warn!("Network not ready: {}", e);
                }
            }));

        match result {
            Ok(_) => break,
            Err(_) => {
                attempts += 1;
                thread::sleep(NETWORK_RETRY_PERIOD);
            }
        }
    }

    info!("Network ready after {} retries", attempts);
}
