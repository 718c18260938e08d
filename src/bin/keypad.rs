// Keyboard gamepad: emulates the Dabble app and publishes its packets
//
// Arrows/WASD = pad, M = toggle digital/analog stick,
// Enter = start, Tab = select, T = triangle, C = circle, X = cross,
// R = rectangle, Q/Esc = quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use owl_teleop_runtime::config::TOPIC_INPUT;
use owl_teleop_runtime::input::dabble::{encode_analog, encode_digital};
use owl_teleop_runtime::input::{ExtraButton, JoystickButton};

const INPUT_TIMEOUT_MS: u64 = 150; // Release the pad after this much time with no key
const ANALOG_RADIUS: u8 = 7;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_INPUT).await?;

    info!("Controls: arrows/WASD=pad, M=analog, Enter=start, Tab=select, T/C/X/R=buttons, Q=quit");

    enable_raw_mode()?;
    let result = run_keypad(&publisher).await;
    disable_raw_mode()?;

    result
}

/// Angle step (15° units) for a pad direction, counter-clockwise from right
fn angle_step(button: JoystickButton) -> Option<u8> {
    match button {
        JoystickButton::Right => Some(0),
        JoystickButton::Up => Some(6),
        JoystickButton::Left => Some(12),
        JoystickButton::Down => Some(18),
        JoystickButton::Released => None,
    }
}

async fn run_keypad(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut analog = false;
    let mut direction = JoystickButton::Released;
    let mut extra = ExtraButton::Released;
    let mut last_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Up | KeyCode::Char('w') if pressed => direction = JoystickButton::Up,
                    KeyCode::Down | KeyCode::Char('s') if pressed => direction = JoystickButton::Down,
                    KeyCode::Left | KeyCode::Char('a') if pressed => direction = JoystickButton::Left,
                    KeyCode::Right | KeyCode::Char('d') if pressed => direction = JoystickButton::Right,

                    KeyCode::Enter if pressed => extra = ExtraButton::Start,
                    KeyCode::Tab if pressed => extra = ExtraButton::Select,
                    KeyCode::Char('t') if pressed => extra = ExtraButton::Triangle,
                    KeyCode::Char('c') if pressed => extra = ExtraButton::Circle,
                    KeyCode::Char('x') if pressed => extra = ExtraButton::Cross,
                    KeyCode::Char('r') if pressed => extra = ExtraButton::Rectangle,

                    KeyCode::Char('m') if pressed => {
                        analog = !analog;
                        info!("Stick: {}", if analog { "analog" } else { "digital" });
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
                last_input = Instant::now();
            }
        }

        // Release everything if no key for INPUT_TIMEOUT_MS
        if last_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            direction = JoystickButton::Released;
            extra = ExtraButton::Released;
        }

        let packet = if analog {
            match angle_step(direction) {
                Some(step) => encode_analog(step, ANALOG_RADIUS, extra),
                None => encode_analog(0, 0, extra),
            }
        } else {
            encode_digital(direction, extra)
        };
        publisher.put(packet.to_vec()).await?;
    }

    Ok(())
}
