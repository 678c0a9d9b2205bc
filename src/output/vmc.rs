//! VMC (Virtual Motion Capture) sender.
//!
//! Each tracking result becomes a short run of OSC messages sent over UDP:
//! availability, time, root, head and neck bones, then blend shapes closed by
//! `/VMC/Ext/Blend/Apply`. Receivers such as Warudo, VSeeFace and
//! VMagicMirror read this directly.

use super::{PipelineEvent, ResultSink};
use crate::{config::VmcConfig, tracker::TrackingResult, Error, Result};
use log::{debug, info, warn};
use nalgebra::Vector3;
use rosc::{encoder, OscMessage, OscPacket, OscType};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

/// `/VMC/Ext/OK` calibration state meaning "calibrated"
const CALIBRATED: i32 = 3;
/// Share of head rotation and translation given to the neck bone
const NECK_ROTATION_SHARE: f64 = 0.3;
const NECK_TRANSLATION_SHARE: f64 = 0.5;
/// Millimetres to metres
const TRANSLATION_SCALE: f64 = 1.0 / 1000.0;

/// Unity-frame quaternion from pitch, yaw and roll in degrees, as `(x, y, z, w)`
#[must_use]
pub fn euler_to_quaternion(pitch: f64, yaw: f64, roll: f64) -> [f32; 4] {
    let (sr, cr) = (roll.to_radians() * 0.5).sin_cos();
    let (sp, cp) = (pitch.to_radians() * 0.5).sin_cos();
    let (sy, cy) = (yaw.to_radians() * 0.5).sin_cos();

    let w = cr * cp * cy + sr * sp * sy;
    let x = sr * cp * cy - cr * sp * sy;
    let y = cr * sp * cy + sr * cp * sy;
    let z = cr * cp * sy - sr * sp * cy;

    #[allow(clippy::cast_possible_truncation)]
    [x as f32, y as f32, z as f32, w as f32]
}

fn message(addr: &str, args: Vec<OscType>) -> OscMessage {
    OscMessage {
        addr: addr.to_string(),
        args,
    }
}

fn available(ok: bool) -> OscMessage {
    message(
        "/VMC/Ext/OK",
        vec![OscType::Int(i32::from(ok)), OscType::Int(CALIBRATED), OscType::Int(1)],
    )
}

#[allow(clippy::cast_possible_truncation)]
fn bone(name: &str, position: &Vector3<f64>, rotation: [f32; 4]) -> OscMessage {
    let mut args = vec![
        OscType::String(name.to_string()),
        OscType::Float(position.x as f32),
        OscType::Float(position.y as f32),
        OscType::Float(position.z as f32),
    ];
    args.extend(rotation.iter().map(|&q| OscType::Float(q)));
    message("/VMC/Ext/Bone/Pos", args)
}

fn blend(name: &str, value: f32) -> OscMessage {
    message(
        "/VMC/Ext/Blend/Val",
        vec![OscType::String(name.to_string()), OscType::Float(value.clamp(0.0, 1.0))],
    )
}

/// Messages describing one tracking result, in send order
#[must_use]
pub fn vmc_messages(result: &TrackingResult) -> Vec<OscMessage> {
    let tracked = result.pose.valid && !result.filtered.is_empty();
    let mut messages = vec![
        available(tracked),
        message("/VMC/Ext/T", vec![OscType::Float(result.timestamp.as_secs_f32())]),
        message(
            "/VMC/Ext/Root/Pos",
            vec![
                OscType::String("root".to_string()),
                OscType::Float(0.0),
                OscType::Float(0.0),
                OscType::Float(0.0),
                OscType::Float(0.0),
                OscType::Float(0.0),
                OscType::Float(0.0),
                OscType::Float(1.0),
            ],
        ),
    ];
    if !tracked {
        return messages;
    }

    let euler = result.pose.euler_degrees();
    let t = result.pose.translation;
    let head_position = Vector3::new(t.x, -t.y, t.z) * TRANSLATION_SCALE;
    messages.push(bone(
        "Head",
        &head_position,
        euler_to_quaternion(-euler.pitch, -euler.yaw, euler.roll),
    ));
    messages.push(bone(
        "Neck",
        &(head_position * NECK_TRANSLATION_SHARE),
        euler_to_quaternion(
            -euler.pitch * NECK_ROTATION_SHARE,
            -euler.yaw * NECK_ROTATION_SHARE,
            euler.roll * NECK_ROTATION_SHARE,
        ),
    ));

    if let Some(features) = result.features {
        let right = 1.0 - features.eye_open_right.clamp(0.0, 1.0);
        let left = 1.0 - features.eye_open_left.clamp(0.0, 1.0);
        messages.push(blend("eyeBlinkRight", right));
        messages.push(blend("eyeBlinkLeft", left));
        messages.push(blend("Blink_R", right));
        messages.push(blend("Blink_L", left));
        messages.push(blend("Blink", (right + left) / 2.0));
        messages.push(blend("jawOpen", features.mouth_open));
        messages.push(blend("A", features.mouth_open));
        messages.push(blend("Aa", features.mouth_open));

        // A wide mouth and a raised corner both read as a smile
        let smile_left = features.mouth_wide.max(features.mouth_corner_left);
        let smile_right = features.mouth_wide.max(features.mouth_corner_right);
        let frown_left = (-features.mouth_wide).max(-features.mouth_corner_left);
        let frown_right = (-features.mouth_wide).max(-features.mouth_corner_right);
        messages.push(blend("mouthSmileLeft", smile_left));
        messages.push(blend("mouthSmileRight", smile_right));
        messages.push(blend("mouthFrownLeft", frown_left));
        messages.push(blend("mouthFrownRight", frown_right));

        messages.push(blend("browInnerUp", features.brow_left.max(features.brow_right)));
        messages.push(blend("browDownLeft", -features.brow_left));
        messages.push(blend("browDownRight", -features.brow_right));
    }
    messages.push(message("/VMC/Ext/Blend/Apply", Vec::new()));
    messages
}

/// Sends pipeline events to a VMC receiver over UDP
pub struct VmcSink {
    socket: UdpSocket,
    target: SocketAddr,
    failures: u64,
}

impl VmcSink {
    /// Bind an ephemeral local socket aimed at `ip:port`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Output`] if the address does not resolve, or an I/O
    /// error if the socket cannot be bound
    pub fn new(ip: &str, port: u16) -> Result<Self> {
        let target = (ip, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Output(format!("VMC address {ip}:{port} did not resolve")))?;
        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)?;
        info!("Sending VMC data to {}", target);
        Ok(Self {
            socket,
            target,
            failures: 0,
        })
    }

    /// # Errors
    ///
    /// See [`VmcSink::new`]
    pub fn from_config(config: &VmcConfig) -> Result<Self> {
        Self::new(&config.ip, config.port)
    }

    #[must_use]
    pub const fn target(&self) -> SocketAddr {
        self.target
    }

    /// Datagrams that failed to encode or send so far
    #[must_use]
    pub const fn failures(&self) -> u64 {
        self.failures
    }

    fn send(&mut self, msg: OscMessage) {
        let sent = encoder::encode(&OscPacket::Message(msg))
            .map_err(|e| Error::Output(format!("OSC encode failed: {e:?}")))
            .and_then(|bytes| Ok(self.socket.send_to(&bytes, self.target)?));
        if let Err(e) = sent {
            self.failures += 1;
            // One warning, then only debug output while the receiver stays away
            if self.failures == 1 {
                warn!("VMC send failed: {}", e);
            } else {
                debug!("VMC send failed: {}", e);
            }
        }
    }
}

impl ResultSink for VmcSink {
    fn publish(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Result(result) => {
                for msg in vmc_messages(&result) {
                    self.send(msg);
                }
            }
            PipelineEvent::Fault(_) | PipelineEvent::Stopped => self.send(available(false)),
        }
    }
}
