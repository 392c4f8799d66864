pub mod bucket;
pub mod tcp;

use tracing::{debug, info, warn};

use crate::block::{Block, WorldState};
use crate::config::LinkSettings;
use tcp::{CommandChannel, DataChannel, InfoChannel};

// Host command codes on the command channel.
const CODE_TERMINATE: i32 = 1;
const CODE_PAUSE: i32 = 2;
const CODE_RESUME: i32 = 3;

/// What the per-frame command poll resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Idle,
    Terminate,
    Pause,
}

struct Channels {
    command: CommandChannel,
    data: DataChannel,
    info: InfoChannel,
}

/// The three-channel connection to the external visualization/control
/// host. All-or-nothing: if any channel fails to connect at startup the
/// whole set is disabled for the run (standalone mode) and never retried.
/// A write/read error mid-run likewise drops the set for the remainder
/// of the run.
pub struct HostLink {
    channels: Option<Channels>,
}

impl HostLink {
    pub fn disabled() -> Self {
        Self { channels: None }
    }

    pub fn connect(settings: &LinkSettings) -> Self {
        let host = &settings.host;
        let connected = (|| -> std::io::Result<Channels> {
            Ok(Channels {
                command: CommandChannel::connect(&format!("{host}:{}", settings.command_port))?,
                data: DataChannel::connect(&format!("{host}:{}", settings.data_port))?,
                info: InfoChannel::connect(&format!("{host}:{}", settings.info_port))?,
            })
        })();
        match connected {
            Ok(channels) => {
                info!(host = %host, "host link connected");
                Self {
                    channels: Some(channels),
                }
            }
            Err(e) => {
                warn!(host = %host, error = %e, "host link unavailable, running standalone");
                Self::disabled()
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.channels.is_some()
    }

    fn disable(&mut self, channel: &str, err: std::io::Error) {
        warn!(channel, error = %err, "host link failed, disabled for the rest of the run");
        self.channels = None;
    }

    /// Best-effort text notice; lost if nobody is listening.
    pub fn notice(&mut self, message: &str) {
        let result = match &mut self.channels {
            Some(ch) => ch.info.send_text(message),
            None => return,
        };
        if let Err(e) = result {
            self.disable("info", e);
        }
    }

    /// Publish one frame's flagged outputs and pose as a bucket. The
    /// whole buffer goes out in a single send; there is no double
    /// buffering, so a slow consumer may observe torn data.
    pub fn publish(&mut self, outputs: &[Block], world: &WorldState) {
        let result = match &mut self.channels {
            Some(ch) => {
                let buffer = bucket::encode(outputs, world);
                ch.data.send(&buffer)
            }
            None => return,
        };
        if let Err(e) = result {
            self.disable("data", e);
        }
    }

    /// One command read per frame, after publish. Unknown codes are
    /// ignored.
    pub fn poll_command(&mut self) -> Command {
        let result = match &mut self.channels {
            Some(ch) => ch.command.poll(),
            None => return Command::Idle,
        };
        match result {
            Ok(Some(CODE_TERMINATE)) => Command::Terminate,
            Ok(Some(CODE_PAUSE)) => Command::Pause,
            Ok(Some(code)) => {
                debug!(code, "ignoring unknown command code");
                Command::Idle
            }
            Ok(None) => Command::Idle,
            Err(e) => {
                self.disable("command", e);
                Command::Idle
            }
        }
    }

    /// Block until the host sends the resume code. Codes other than
    /// resume are re-read and ignored; there is no timeout.
    pub fn wait_resume(&mut self) {
        loop {
            let result = match &mut self.channels {
                Some(ch) => ch.command.wait_code(),
                None => return,
            };
            match result {
                Ok(CODE_RESUME) => return,
                Ok(code) => debug!(code, "still paused, ignoring code"),
                Err(e) => {
                    self.disable("command", e);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Duration;

    fn listening_settings() -> (Vec<TcpListener>, LinkSettings) {
        let listeners: Vec<TcpListener> = (0..3)
            .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let ports: Vec<u16> = listeners
            .iter()
            .map(|l| l.local_addr().unwrap().port())
            .collect();
        let settings = LinkSettings {
            enabled: true,
            host: "127.0.0.1".to_string(),
            command_port: ports[0],
            data_port: ports[1],
            info_port: ports[2],
        };
        (listeners, settings)
    }

    #[test]
    fn test_missing_host_disables_whole_set() {
        // Only the command port is listening; the set must not come up.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let settings = LinkSettings {
            enabled: true,
            host: "127.0.0.1".to_string(),
            command_port: listener.local_addr().unwrap().port(),
            data_port: 1,
            info_port: 1,
        };
        let mut link = HostLink::connect(&settings);
        assert!(!link.is_active());
        // Disabled link is inert.
        assert_eq!(link.poll_command(), Command::Idle);
        link.notice("ignored");
        link.publish(&[], &WorldState::default());
    }

    #[test]
    fn test_pause_blocks_until_resume() {
        let (listeners, settings) = listening_settings();
        let mut link = HostLink::connect(&settings);
        let (mut command_host, _) = listeners[0].accept().unwrap();
        let _data_host = listeners[1].accept().unwrap();
        let _info_host = listeners[2].accept().unwrap();
        assert!(link.is_active());

        command_host.write_all(&2i32.to_le_bytes()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(link.poll_command(), Command::Pause);

        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            command_host.write_all(&3i32.to_le_bytes()).unwrap();
            command_host
        });
        let started = std::time::Instant::now();
        link.wait_resume();
        assert!(started.elapsed() >= Duration::from_millis(40));
        drop(writer.join().unwrap());
    }

    #[test]
    fn test_publish_emits_parseable_bucket() {
        let (listeners, settings) = listening_settings();
        let mut link = HostLink::connect(&settings);
        let _command_host = listeners[0].accept().unwrap();
        let (mut data_host, _) = listeners[1].accept().unwrap();
        let _info_host = listeners[2].accept().unwrap();

        let block = Block::new("left", image::DynamicImage::new_rgb8(4, 2)).with_flags(
            false, false, true,
        );
        let world = WorldState {
            fetch_kind: 1,
            x: 9.0,
            ..Default::default()
        };
        link.publish(&[block], &world);

        let mut buffer = vec![0u8; bucket::HEADER_LEN + 4 * 2 * 3];
        data_host.read_exact(&mut buffer).unwrap();
        let header = bucket::BucketHeader::parse(&buffer).unwrap();
        assert_eq!(header.image_count, 1);
        assert_eq!(header.cols[0], 4);
        assert_eq!(header.rows[0], 2);
        assert_eq!(header.fetch_kind, 1);
        assert_eq!(header.pose[0], 9.0);
    }
}
