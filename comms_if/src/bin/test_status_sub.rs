//! Robot status subscriber test
//!
//! Joins the status multicast group of a channel and prints every status (and crash report) that
//! arrives, along with the primitive round trip time when the robot reports one.

use comms_if::{
    net::{listener::{MsgListener, UdpEndpoint, DEFAULT_RECV_BUFFER_SIZE}, NetParams},
    status::{RobotCrash, RobotStatus},
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "test_status_sub", about = "Print robot statuses")]
struct Opt {
    /// Multicast channel to listen on
    #[structopt(short, long, default_value = "0")]
    channel: usize,

    /// Status port
    #[structopt(short, long, default_value = "42071")]
    port: u16,

    /// Crash report port
    #[structopt(long, default_value = "42074")]
    crash_port: u16,

    /// Interface to join the group on
    #[structopt(short, long)]
    interface: Option<String>,

    /// Only print the summary line of each status
    #[structopt(short, long)]
    quiet: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let group = NetParams::multicast_group(opt.channel)
        .ok_or_else(|| format!("No multicast group for channel {}", opt.channel))?;

    let quiet = opt.quiet;
    let _status = MsgListener::new(
        UdpEndpoint::bind(group, opt.port, opt.interface.as_deref(), DEFAULT_RECV_BUFFER_SIZE)?,
        DEFAULT_RECV_BUFFER_SIZE,
        move |status: RobotStatus| {
            println!(
                "robot {} handled {} errors {:?}",
                status.robot_id, status.last_handled_primitive_set, status.error_code
            );
            if let Some(rtt) = status.network_status.primitive_round_trip {
                println!(
                    "    primitive {} round trip {:.2} ms",
                    rtt.primitive_sequence_num, rtt.round_trip_seconds() * 1000.0
                );
            }
            if !quiet {
                println!("{:#?}", status);
            }
        },
        None
    )?;

    let _crash = MsgListener::new(
        UdpEndpoint::bind(group, opt.crash_port, opt.interface.as_deref(), DEFAULT_RECV_BUFFER_SIZE)?,
        DEFAULT_RECV_BUFFER_SIZE,
        |crash: RobotCrash| {
            println!(
                "ROBOT {} CRASHED ({})\n{}",
                crash.robot_id, crash.exit_signal, crash.stack_dump
            );
        },
        None
    )?;

    println!("Listening on {} ports {} and {}", group, opt.port, opt.crash_port);

    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}
