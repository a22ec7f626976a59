use rppal::gpio::{Gpio, InputPin, Level};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::sequence_lock::Color;

/// A digital input wired active-low: `Level::Low` means pressed.
pub trait ButtonInput {
    fn level(&mut self) -> Level;
}

impl ButtonInput for InputPin {
    fn level(&mut self) -> Level {
        self.read()
    }
}

struct ButtonChannel {
    color: Color,
    input: Box<dyn ButtonInput + Send>,
    last_level: Level,
}

/// Turns raw button levels into press events.
///
/// All channels share one cooldown: after any accepted press, no press on any button is
/// accepted until `debounce_window` has passed. Channels are checked in the order given,
/// and at most one press is accepted per poll.
pub struct ButtonDebouncer {
    channels: Vec<ButtonChannel>,
    debounce_window: Duration,
    last_accept: Option<Instant>,
}

impl ButtonDebouncer {
    pub fn new(
        inputs: Vec<(Color, Box<dyn ButtonInput + Send>)>,
        debounce_window: Duration,
    ) -> Self {
        let channels = inputs
            .into_iter()
            .map(|(color, input)| ButtonChannel {
                color,
                input,
                last_level: Level::High,
            })
            .collect();
        Self {
            channels,
            debounce_window,
            last_accept: None,
        }
    }

    /// Claims the red, green and blue BCM pins with internal pull-ups.
    pub fn from_gpio(
        red_pin: u8,
        green_pin: u8,
        blue_pin: u8,
        debounce_window: Duration,
    ) -> Result<Self, rppal::gpio::Error> {
        let gpio = Gpio::new()?;
        let mut inputs: Vec<(Color, Box<dyn ButtonInput + Send>)> = Vec::with_capacity(3);
        for (color, pin) in [
            (Color::Red, red_pin),
            (Color::Green, green_pin),
            (Color::Blue, blue_pin),
        ] {
            let input = gpio.get(pin)?.into_input_pullup();
            info!("{} button on GPIO {}", color, pin);
            inputs.push((color, Box::new(input)));
        }
        Ok(Self::new(inputs, debounce_window))
    }

    pub fn poll(&mut self, now: Instant) -> Option<Color> {
        let cooled_down = self
            .last_accept
            .map_or(true, |t| now.saturating_duration_since(t) >= self.debounce_window);
        let mut accepted = None;

        for channel in self.channels.iter_mut() {
            let level = channel.input.level();
            if accepted.is_none()
                && cooled_down
                && level == Level::Low
                && channel.last_level == Level::High
            {
                debug!("{} button pressed", channel.color);
                accepted = Some(channel.color);
            }
            channel.last_level = level;
        }

        if accepted.is_some() {
            self.last_accept = Some(now);
        }
        accepted
    }
}
