// Fixed-period control loop with input watchdog
//
// decode (packet task) -> select -> map -> encode -> bus, once per tick.
// The packet and detection tasks only ever replace a single-slot mailbox;
// the loop reads whatever is newest and never waits on them.

use std::time::{Duration, Instant};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::behavior::{self, BehaviorMode, PowerControl};
use crate::config::{RuntimeConfig, TOPIC_BUS_TX, TOPIC_DETECTION, TOPIC_HEALTH, TOPIC_INPUT};
use crate::input::{self, InputState, SlotReader, SlotWriter, Stamped};
use crate::messages::{BodyVelocityCommand, BusFrame, DetectionResult, RuntimeHealth};
use crate::motor::{map_to_motors, BusError, BusWriter, FrameSink, MotorId, MotorTarget};

/// Result of one tick, before it reaches the bus
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    pub command: BodyVelocityCommand,
    pub targets: MotorTarget,
    pub health: RuntimeHealth,
}

pub struct Runtime<P> {
    config: RuntimeConfig,
    mode: BehaviorMode,
    power: P,
    health: RuntimeHealth,
}

impl<P: PowerControl> Runtime<P> {
    pub fn new(config: RuntimeConfig, power: P) -> Self {
        if let Some(reason) = config.platform.geometry_problem() {
            warn!("Platform geometry unusable ({}), holding motors at zero", reason);
        }
        let mode = BehaviorMode::new(&config.platform);
        Self {
            config,
            mode,
            power,
            health: RuntimeHealth::InputStale, // Start stale until first packet
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn mode(&self) -> &BehaviorMode {
        &self.mode
    }

    /// Compute command and motor targets for this tick.
    ///
    /// A missing or stale pad snapshot is replaced by the neutral one and the
    /// tool motor is stopped. Toggled modes are kept, so with follow-me on the
    /// robot goes on tracking or scanning without a pad.
    pub fn tick(
        &mut self,
        now: Instant,
        input: Option<Stamped<InputState>>,
        detection: Option<Stamped<DetectionResult>>,
    ) -> TickOutput {
        let fresh_input = input.filter(|s| age(now, s.at) <= self.config.input_timeout);
        let state = match fresh_input {
            Some(s) => {
                if self.health != RuntimeHealth::Ok {
                    info!("Controller input live");
                }
                self.health = RuntimeHealth::Ok;
                s.value
            }
            None => {
                if self.health != RuntimeHealth::InputStale {
                    warn!("Controller input stale, stopping robot");
                }
                self.health = RuntimeHealth::InputStale;
                InputState::default()
            }
        };

        let detection = detection
            .filter(|s| age(now, s.at) <= self.config.detection_max_age)
            .map(|s| s.value);

        let command = behavior::step(
            now,
            &state,
            detection.as_ref(),
            &mut self.mode,
            &self.config.platform,
            &mut self.power,
        );

        let mut targets = map_to_motors(&command, &self.config.platform);
        if self.config.platform.node_id(MotorId::Tool).is_some() {
            let tool = if self.health == RuntimeHealth::Ok {
                self.mode.tool_speed
            } else {
                0.0
            };
            targets.set(MotorId::Tool, tool);
        }

        TickOutput {
            command,
            targets,
            health: self.health,
        }
    }
}

fn age(now: Instant, at: Instant) -> Duration {
    now.saturating_duration_since(at)
}

/// Publishes encoded frames for a bus bridge process
pub struct ZenohFrameSink {
    publisher: zenoh::pubsub::Publisher<'static>,
}

impl ZenohFrameSink {
    pub async fn declare(session: &zenoh::Session) -> Result<Self, BusError> {
        let publisher = session
            .declare_publisher(TOPIC_BUS_TX)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(Self { publisher })
    }
}

impl FrameSink for ZenohFrameSink {
    async fn send(&mut self, id: u16, data: &[u8]) -> Result<(), BusError> {
        let frame = BusFrame {
            id,
            data: data.to_vec(),
        };
        let json = serde_json::to_string(&frame).map_err(|e| BusError::Transport(e.to_string()))?;
        self.publisher
            .put(json)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))
    }
}

/// Forward raw controller packets into the input mailbox
async fn spawn_input_task(
    session: &zenoh::Session,
    writer: SlotWriter<InputState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let subscriber = session.declare_subscriber(TOPIC_INPUT).await?;
    tokio::spawn(async move {
        while let Ok(sample) = subscriber.recv_async().await {
            let packet = sample.payload().to_bytes();
            input::on_packet(&writer, &packet, Instant::now());
        }
        warn!("Controller input subscription closed");
    });
    Ok(())
}

/// Forward detection results into the detection mailbox
async fn spawn_detection_task(
    session: &zenoh::Session,
    writer: SlotWriter<DetectionResult>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let subscriber = session.declare_subscriber(TOPIC_DETECTION).await?;
    tokio::spawn(async move {
        while let Ok(sample) = subscriber.recv_async().await {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DetectionResult>(&payload) {
                Ok(detection) => writer.publish(detection, Instant::now()),
                Err(e) => warn!("Failed to parse detection: {}", e),
            }
        }
        warn!("Detection subscription closed");
    });
    Ok(())
}

/// Run the control loop until ctrl-c or until the bus sink closes
pub async fn run<P, S>(
    session: zenoh::Session,
    config: RuntimeConfig,
    power: P,
    sink: Option<S>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    P: PowerControl,
    S: FrameSink,
{
    info!("Setting up publishers and subscribers...");
    let (input_tx, input_rx): (SlotWriter<InputState>, SlotReader<InputState>) = input::slot();
    let (detection_tx, detection_rx) = input::slot::<DetectionResult>();
    spawn_input_task(&session, input_tx).await?;
    spawn_detection_task(&session, detection_tx).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut bus = BusWriter::with_timing(sink, config.bus_min_interval, config.bus_send_timeout);
    let node_id = config.node_id;
    let mut runtime = Runtime::new(config, power);

    let mut tick = interval(runtime.config().tick_period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Runtime started: {:?} tick, {:?} platform, {}ms input watchdog",
        runtime.config().tick_period,
        runtime.config().platform.topology,
        runtime.config().input_timeout.as_millis()
    );
    info!("Subscribed to: {}, {}", TOPIC_INPUT, TOPIC_DETECTION);
    info!("Publishing to: {}, {}", TOPIC_BUS_TX, TOPIC_HEALTH);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break Ok(());
            }
        }

        let now = Instant::now();
        let output = runtime.tick(now, input_rx.latest(), detection_rx.latest());
        debug!("Tick: {:?}", output.command);

        // Motor targets
        if let Err(e) = bus.submit_targets(node_id, &output.targets, &runtime.config().platform) {
            warn!("Cannot encode motor targets: {}", e);
        }
        match bus.flush(now).await {
            Ok(_) => {}
            Err(BusError::Closed) => break Err(BusError::Closed.into()),
            Err(e) => warn!("Bus flush failed: {}", e),
        }

        // Health
        match serde_json::to_string(&output.health) {
            Ok(health_json) => {
                if let Err(e) = pub_health.put(health_json).await {
                    debug!("Failed to publish health: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize health: {}", e),
        }
    };

    bus.stop_all(node_id, &runtime.config().platform).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::LogOnlyPower;
    use crate::config::PlatformConfig;
    use crate::input::{ExtraButton, JoystickButton};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn stamped<T>(value: T, at: Instant) -> Option<Stamped<T>> {
        Some(Stamped { value, at })
    }

    fn up() -> InputState {
        InputState {
            joystick_button: JoystickButton::Up,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_input_is_stale_and_stopped() {
        let mut rt = Runtime::new(RuntimeConfig::default(), LogOnlyPower);
        let out = rt.tick(Instant::now(), None, None);
        assert_eq!(out.health, RuntimeHealth::InputStale);
        assert!(out.targets.is_stopped());
        // differential default has a tool motor
        assert_eq!(out.targets.len(), 3);
    }

    #[test]
    fn test_fresh_input_drives() {
        let mut rt = Runtime::new(RuntimeConfig::default(), LogOnlyPower);
        let t0 = Instant::now();
        let out = rt.tick(t0 + ms(5), stamped(up(), t0), None);
        assert_eq!(out.health, RuntimeHealth::Ok);
        assert_eq!(out.targets.get(MotorId::Left), Some(-100.0));
        assert_eq!(out.targets.get(MotorId::Right), Some(100.0));
    }

    #[test]
    fn test_watchdog_stops_on_old_input() {
        let mut rt = Runtime::new(RuntimeConfig::default(), LogOnlyPower);
        let t0 = Instant::now();
        let out = rt.tick(t0 + ms(1500), stamped(up(), t0), None);
        assert_eq!(out.health, RuntimeHealth::InputStale);
        assert!(out.targets.is_stopped());
    }

    #[test]
    fn test_tool_speed_follows_mode() {
        let mut rt = Runtime::new(RuntimeConfig::default(), LogOnlyPower);
        let t0 = Instant::now();
        let circle = InputState {
            extra_button: ExtraButton::Circle,
            ..Default::default()
        };
        let out = rt.tick(t0, stamped(circle, t0), None);
        assert_eq!(out.targets.get(MotorId::Tool), Some(100.0));
        assert_eq!(rt.mode().tool_speed, 100.0);
    }

    #[test]
    fn test_mecanum_has_no_tool_motor() {
        let config = RuntimeConfig {
            platform: PlatformConfig::mecanum(),
            ..Default::default()
        };
        let mut rt = Runtime::new(config, LogOnlyPower);
        let t0 = Instant::now();
        let out = rt.tick(t0, stamped(up(), t0), None);
        assert_eq!(out.targets.get(MotorId::Tool), None);
        assert_eq!(out.targets.len(), 4);
    }

    #[test]
    fn test_mecanum_file_without_nodes_never_drives_a_tool() {
        let config = RuntimeConfig::from_json(
            r#"{ "platform": { "topology": "mecanum", "wheel_radius": 0.05,
                               "wheel_to_center_x": 0.15, "wheel_to_center_y": 0.2 } }"#,
        )
        .unwrap();
        let mut rt = Runtime::new(config, LogOnlyPower);
        let t0 = Instant::now();
        let circle = InputState {
            extra_button: ExtraButton::Circle,
            joystick_button: JoystickButton::Up,
            ..Default::default()
        };

        let out = rt.tick(t0, stamped(circle, t0), None);
        assert_eq!(out.targets.get(MotorId::Tool), None);
        for m in MotorId::MECANUM {
            assert!(rt.config().platform.node_id(m).is_some(), "{:?}", m);
            assert!(out.targets.get(m).unwrap() > 0.0, "{:?}", m);
        }
    }

    #[test]
    fn test_follow_me_keeps_scanning_without_pad() {
        let mut rt = Runtime::new(RuntimeConfig::default(), LogOnlyPower);
        let t0 = Instant::now();
        let select = InputState {
            extra_button: ExtraButton::Select,
            ..Default::default()
        };
        rt.tick(t0, stamped(select, t0), None);
        assert!(rt.mode().follow_me_enabled);

        let out = rt.tick(t0 + ms(1500), stamped(select, t0), None);
        assert_eq!(out.health, RuntimeHealth::InputStale);
        assert_ne!(out.command.angular_z, 0.0);
        assert_eq!(out.targets.get(MotorId::Tool), Some(0.0));
    }

    #[test]
    fn test_old_detection_is_ignored() {
        let mut rt = Runtime::new(RuntimeConfig::default(), LogOnlyPower);
        let t0 = Instant::now();
        let select = InputState {
            extra_button: ExtraButton::Select,
            ..Default::default()
        };
        let ahead = DetectionResult::at(0.5, 0.5);

        let out = rt.tick(t0, stamped(select, t0), stamped(ahead, t0));
        assert!(rt.mode().follow_me_enabled);
        assert_eq!(out.command.linear_x, 0.5);

        // same detection, now too old: scanning instead of approaching
        let later = t0 + ms(400);
        let out = rt.tick(later, stamped(InputState::default(), later), stamped(ahead, t0));
        assert_eq!(out.command.linear_x, 0.0);
        assert_ne!(out.command.angular_z, 0.0);
    }
}
