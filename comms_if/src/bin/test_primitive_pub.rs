//! Primitive set publisher test
//!
//! Sends primitive sets to a robot at a fixed rate, either on the multicast group of a channel or
//! on a local unix datagram socket. Used to drive a robot without the AI.

use comms_if::{
    eqpt::{motor::LocalVelocity, power::{ChickerCommand, PowerControl}},
    net::{udp::UdpSender, NetParams},
    primitive::{MovePrimitive, Primitive, PrimitiveSet, Timestamp},
};
use std::{os::unix::net::UnixDatagram, path::PathBuf, time::Duration};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "test_primitive_pub", about = "Send primitive sets to a robot")]
struct Opt {
    /// Id of the robot the primitives are addressed to
    #[structopt(short, long, default_value = "0")]
    robot_id: u32,

    /// Multicast channel to send on
    #[structopt(short, long, default_value = "0")]
    channel: usize,

    /// Destination port
    #[structopt(short, long, default_value = "42070")]
    port: u16,

    /// Interface to send multicast from
    #[structopt(short, long)]
    interface: Option<String>,

    /// Send to a unix datagram socket instead of multicast
    #[structopt(long, parse(from_os_str))]
    unix: Option<PathBuf>,

    /// Rate to send at in Hz
    #[structopt(long, default_value = "60")]
    rate: f64,

    /// Forward speed in m/s, 0 sends a stop primitive
    #[structopt(long, default_value = "0")]
    speed: f64,

    /// Send a kick at this speed in m/s once every second
    #[structopt(long)]
    kick: Option<f64>,
}

enum Dest {
    Udp(UdpSender),
    Unix(UnixDatagram, PathBuf),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    if !(opt.rate > 0.0) {
        return Err(format!("Invalid rate {}", opt.rate).into())
    }

    let dest = match opt.unix {
        Some(ref path) => Dest::Unix(UnixDatagram::unbound()?, path.clone()),
        None => {
            let group = NetParams::multicast_group(opt.channel)
                .ok_or_else(|| format!("No multicast group for channel {}", opt.channel))?;
            let sender = UdpSender::new(group, opt.port, opt.interface.as_deref())?;
            println!("Sending to {}", sender.dest());
            Dest::Udp(sender)
        }
    };

    let period = Duration::from_secs_f64(1.0 / opt.rate);
    let kick_every = opt.rate.round().max(1.0) as u64;
    let mut sequence_number = 0u64;

    loop {
        let power_control = match opt.kick {
            Some(speed) if sequence_number % kick_every == 0 => PowerControl {
                chicker: ChickerCommand::Kick { speed_m_per_s: speed },
            },
            _ => PowerControl::default()
        };

        let primitive = if opt.speed == 0.0 && opt.kick.is_none() {
            Primitive::Stop
        }
        else {
            Primitive::Move(MovePrimitive {
                target_velocity: LocalVelocity { x_m_per_s: opt.speed, ..Default::default() },
                max_acceleration_m_per_s_2: 3.0,
                dribbler_speed_rpm: 0.0,
                power_control,
            })
        };

        let mut set = PrimitiveSet {
            sequence_number,
            time_sent: Timestamp { epoch_timestamp_seconds: util::time::epoch_seconds() },
            ..Default::default()
        };
        set.robot_primitives.insert(opt.robot_id, primitive);

        let result = match dest {
            Dest::Udp(ref sender) => sender.send_msg(&set).map_err(|e| e.to_string()),
            Dest::Unix(ref socket, ref path) => serde_json::to_vec(&set)
                .map_err(|e| e.to_string())
                .and_then(|b| socket.send_to(&b, path).map(|_| ()).map_err(|e| e.to_string())),
        };

        match result {
            Ok(()) => (),
            Err(e) => println!("Failed to send primitive set {}: {}", sequence_number, e)
        }

        sequence_number += 1;
        std::thread::sleep(period);
    }
}
