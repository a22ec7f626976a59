//! Cooperative control loop with a statum lifecycle
//!
//! `LockController<Initializing>` owns every component but has no broker session yet.
//! `initialize()` performs the blocking handshake and yields `LockController<Running>`,
//! whose `run()` ticks until the shutdown token is cancelled:
//!
//! ```text
//! tick: keep-alive/reconnect ─► poll broker ─► poll buttons ─► lock + LEDs ─► sleep
//! ```

use statum::{machine, state};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::debouncer::ButtonDebouncer;
use super::sequence_lock::{Color, Outcome, SequenceLock};
use crate::led::{LedError, LedFeedback};
use crate::mqtt::{BrokerLink, ConnectError, InboundMessage};

pub const UNLOCK_PAYLOAD: &str = "UNLOCK";

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub code_topic: String,
    pub unlock_topic: String,
    pub tick_interval: Duration,
    pub error_backoff: Duration,
    pub reconnect_interval: Duration,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    pub status_log_interval: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            code_topic: "lock/code".to_string(),
            unlock_topic: "lock/status".to_string(),
            tick_interval: Duration::from_millis(50),
            error_backoff: Duration::from_secs(1),
            reconnect_interval: Duration::from_secs(5),
            connect_attempts: 5,
            connect_backoff: Duration::from_secs(2),
            status_log_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("could not reach broker after {attempts} attempts: {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: ConnectError,
    },

    #[error("LED error: {0}")]
    Led(#[from] LedError),

    #[error("shutdown requested during initialization")]
    Cancelled,
}

#[state]
#[derive(Debug, Clone)]
pub enum ControllerState {
    Initializing,
    Running,
}

#[machine]
pub struct LockController<S: ControllerState> {
    link: BrokerLink,
    lock: SequenceLock,
    buttons: ButtonDebouncer,
    leds: LedFeedback,
    settings: ControllerSettings,
    shutdown: CancellationToken,
    last_reconnect: Option<Instant>,
    last_status_log: Option<Instant>,
}

impl<S: ControllerState> LockController<S> {
    pub fn lock(&self) -> &SequenceLock {
        &self.lock
    }

    pub fn link(&self) -> &BrokerLink {
        &self.link
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }
}

impl LockController<Initializing> {
    pub fn create(
        link: BrokerLink,
        lock: SequenceLock,
        buttons: ButtonDebouncer,
        leds: LedFeedback,
        settings: ControllerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        debug!("Creating lock controller with settings: {:?}", settings);
        Self::new(link, lock, buttons, leds, settings, shutdown, None, None)
    }

    /// Clears the strip, connects with bounded retries and subscribes to the code topic.
    /// A failed subscription is logged; the lock still works locally.
    pub fn initialize(mut self) -> Result<LockController<Running>, ControllerError> {
        info!("Initializing lock controller, code is {}", self.lock.code());
        self.leds.clear_all()?;
        self.connect_with_retry()?;

        let topic = self.settings.code_topic.clone();
        if let Err(e) = self.link.subscribe(&topic) {
            warn!("Subscription to {} failed, remote code updates disabled: {}", topic, e);
        }

        info!("Lock controller initialized, transitioning to Running state");
        Ok(self.transition())
    }

    fn connect_with_retry(&mut self) -> Result<(), ControllerError> {
        let attempts = self.settings.connect_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.link.connect() {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= attempts => {
                    error!("Giving up on broker after {} attempts", attempt);
                    return Err(ControllerError::Connect {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let backoff = self.settings.connect_backoff * attempt;
                    warn!(
                        "Connect attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, attempts, e, backoff
                    );
                    if self.sleep_or_cancel(backoff) {
                        return Err(ControllerError::Cancelled);
                    }
                }
            }
        }
    }

    // Returns true when shutdown was requested while waiting
    fn sleep_or_cancel(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if self.shutdown.is_cancelled() {
                return true;
            }
            std::thread::sleep(self.settings.tick_interval.min(duration));
        }
        self.shutdown.is_cancelled()
    }
}

impl LockController<Running> {
    pub fn run(mut self) {
        info!("Starting lock controller loop, waiting for button presses");

        while !self.shutdown.is_cancelled() {
            match self.tick(Instant::now()) {
                Ok(()) => std::thread::sleep(self.settings.tick_interval),
                Err(e) => {
                    error!("Error in control loop: {}", e);
                    std::thread::sleep(self.settings.error_backoff);
                }
            }
        }

        info!("Shutdown requested, clearing LEDs");
        if let Err(e) = self.leds.clear_all() {
            warn!("Could not clear LEDs on shutdown: {}", e);
        }
    }

    /// One pass of the loop without the trailing sleep.
    pub fn tick(&mut self, now: Instant) -> Result<(), ControllerError> {
        self.maintain_link(now);

        if let Some(msg) = self.link.poll_incoming() {
            self.handle_message(msg)?;
        }

        if let Some(color) = self.buttons.poll(now) {
            self.handle_press(color)?;
        }

        Ok(())
    }

    fn maintain_link(&mut self, now: Instant) {
        if self.link.is_connected() {
            self.link.keep_alive();
        } else {
            let due = self
                .last_reconnect
                .map_or(true, |t| now.saturating_duration_since(t) >= self.settings.reconnect_interval);
            if due {
                self.last_reconnect = Some(now);
                info!("Broker link is down, reconnecting");
                if let Err(e) = self.link.reconnect() {
                    warn!("Reconnect failed: {}", e);
                }
            }
        }

        let log_due = self
            .last_status_log
            .map_or(true, |t| now.saturating_duration_since(t) >= self.settings.status_log_interval);
        if log_due {
            self.last_status_log = Some(now);
            let status = self.link.status();
            info!(
                "Link {:?}: {} received, {} sent, {} reconnects, last activity {}",
                status.connection_state,
                status.messages_received,
                status.messages_sent,
                status.reconnects,
                status
                    .last_activity
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string())
            );
        }
    }

    fn handle_message(&mut self, msg: InboundMessage) -> Result<(), ControllerError> {
        if msg.topic != self.settings.code_topic {
            debug!("Ignoring message on {}", msg.topic);
            return Ok(());
        }

        match self.lock.apply_remote_payload(&msg.payload) {
            Ok(_) => {
                info!("Accepted code update from {}", msg);
                self.leds.flash_confirmation()?;
            }
            // noise, not user action: no LED feedback
            Err(e) => warn!("Ignoring code update {:?}: {}", msg.payload, e),
        }
        Ok(())
    }

    fn handle_press(&mut self, color: Color) -> Result<(), ControllerError> {
        info!("{} button pressed", color);
        let code_len = self.lock.code().len();

        match self.lock.accept_press(color) {
            Outcome::InProgress(progress) => self.leds.render_progress(&progress, code_len)?,
            outcome @ (Outcome::Success | Outcome::Failure) => {
                self.leds.render_progress(self.lock.last_attempt(), code_len)?;
                self.leds.flash_result(&outcome)?;
                if outcome == Outcome::Success {
                    self.send_unlock();
                }
                self.leds.clear_all()?;
            }
            Outcome::CodeUpdated => {}
        }
        Ok(())
    }

    fn send_unlock(&mut self) {
        match self.link.publish(&self.settings.unlock_topic, UNLOCK_PAYLOAD) {
            Ok(()) => info!("Unlock signal sent"),
            Err(e) => error!("Error sending unlock signal: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::debouncer::tests::{fake_debouncer, FakeButton};
    use crate::controller::sequence_lock::SecurityCode;
    use crate::led::tests::recording_feedback;
    use crate::led::Rgb;
    use crate::mqtt::codec;
    use crate::mqtt::link::tests::{scripted_link, Wire, CONNACK_OK, SUBACK_OK};
    use rppal::gpio::Level;
    use std::sync::{Arc, Mutex};

    type Frames = Arc<Mutex<Vec<Vec<Rgb>>>>;

    struct Rig {
        controller: LockController<Running>,
        wire: Arc<Mutex<Wire>>,
        frames: Frames,
        buttons: [FakeButton; 3],
        now: Instant,
    }

    impl Rig {
        fn new() -> Self {
            let (link, wire) = scripted_link();
            {
                let mut w = wire.lock().unwrap();
                w.push(&CONNACK_OK);
                w.push(&SUBACK_OK);
            }
            let (buttons, fakes) = fake_debouncer(Duration::from_millis(200));
            let (leds, frames, _) = recording_feedback(vec![2, 2, 2, 4]);
            let controller = LockController::create(
                link,
                SequenceLock::new(SecurityCode::default()),
                buttons,
                leds,
                ControllerSettings::default(),
                CancellationToken::new(),
            )
            .initialize()
            .unwrap();
            wire.lock().unwrap().written.clear();
            frames.lock().unwrap().clear();
            Self {
                controller,
                wire,
                frames,
                buttons: fakes,
                now: Instant::now(),
            }
        }

        fn press(&mut self, color: Color) {
            let button = match color {
                Color::Red => self.buttons[0].clone(),
                Color::Green => self.buttons[1].clone(),
                Color::Blue => self.buttons[2].clone(),
            };
            button.set(Level::Low);
            self.step();
            button.set(Level::High);
            self.step();
        }

        fn step(&mut self) {
            self.now += Duration::from_millis(150);
            self.controller.tick(self.now).unwrap();
        }

        fn deliver(&mut self, topic: &str, payload: &str) {
            let packet = codec::encode_publish(topic, payload.as_bytes()).unwrap();
            self.wire.lock().unwrap().push(&packet);
            self.step();
        }

        fn written(&self) -> Vec<u8> {
            self.wire.lock().unwrap().written.clone()
        }
    }

    fn unlock_packet() -> Vec<u8> {
        codec::encode_publish("lock/status", b"UNLOCK").unwrap()
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn initialize_connects_and_subscribes() {
        let (link, wire) = scripted_link();
        {
            let mut w = wire.lock().unwrap();
            w.push(&CONNACK_OK);
            w.push(&SUBACK_OK);
        }
        let (buttons, _) = fake_debouncer(Duration::from_millis(200));
        let (leds, frames, _) = recording_feedback(vec![1, 1]);

        let controller = LockController::create(
            link,
            SequenceLock::default(),
            buttons,
            leds,
            ControllerSettings::default(),
            CancellationToken::new(),
        )
        .initialize()
        .unwrap();

        assert!(controller.link().is_connected());
        let written = wire.lock().unwrap().written.clone();
        assert!(written.ends_with(&codec::encode_subscribe(1, "lock/code", 0).unwrap()));
        assert_eq!(frames.lock().unwrap()[0], vec![Rgb::OFF; 2]);
    }

    #[test]
    fn initialize_gives_up_after_configured_attempts() {
        let (link, wire) = scripted_link();
        wire.lock().unwrap().refuse_opens = 2;
        let (buttons, _) = fake_debouncer(Duration::from_millis(200));
        let (leds, _, _) = recording_feedback(vec![1, 1]);
        let settings = ControllerSettings {
            connect_attempts: 2,
            connect_backoff: Duration::from_millis(1),
            tick_interval: Duration::from_millis(1),
            ..ControllerSettings::default()
        };

        let result = LockController::create(
            link,
            SequenceLock::default(),
            buttons,
            leds,
            settings,
            CancellationToken::new(),
        )
        .initialize();

        assert!(matches!(
            result,
            Err(ControllerError::Connect { attempts: 2, .. })
        ));
        assert_eq!(wire.lock().unwrap().opens, 2);
    }

    #[test]
    fn correct_sequence_publishes_unlock() {
        let mut rig = Rig::new();
        rig.press(Color::Red);
        rig.press(Color::Green);
        assert!(rig.written().is_empty());
        rig.press(Color::Blue);

        assert!(contains(&rig.written(), &unlock_packet()));
        assert!(rig.controller.lock().progress().is_empty());
        let frames = rig.frames.lock().unwrap();
        assert!(frames.iter().any(|f| f[6..10] == [Rgb::GREEN; 4]));
        assert_eq!(frames.last().unwrap(), &vec![Rgb::OFF; 10]);
    }

    #[test]
    fn wrong_sequence_flashes_red_and_stays_quiet() {
        let mut rig = Rig::new();
        rig.press(Color::Red);
        rig.press(Color::Blue);
        rig.press(Color::Green);

        assert!(!contains(&rig.written(), &unlock_packet()));
        let frames = rig.frames.lock().unwrap();
        let red_result = frames.iter().filter(|f| f[6..10] == [Rgb::RED; 4]).count();
        assert_eq!(red_result, 3);
    }

    #[test]
    fn progress_is_rendered_per_press() {
        let mut rig = Rig::new();
        rig.press(Color::Green);

        let frames = rig.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][0..2], &[Rgb::GREEN, Rgb::GREEN]);
        assert_eq!(&frames[0][2..6], &[Rgb::OFF; 4]);
    }

    #[test]
    fn remote_code_update_is_applied_and_confirmed() {
        let mut rig = Rig::new();
        rig.deliver("lock/code", r#"["green","red"]"#);

        assert_eq!(
            rig.controller.lock().code().as_slice(),
            &[Color::Green, Color::Red]
        );
        let green_frames = rig
            .frames
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.iter().all(|&p| p == Rgb::GREEN))
            .count();
        assert_eq!(green_frames, 2);

        rig.press(Color::Green);
        rig.press(Color::Red);
        assert!(contains(&rig.written(), &unlock_packet()));
    }

    #[test]
    fn invalid_code_update_is_ignored_silently() {
        let mut rig = Rig::new();
        rig.deliver("lock/code", r#"["purple"]"#);

        assert_eq!(rig.controller.lock().code(), &SecurityCode::default());
        assert!(rig.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn messages_on_other_topics_are_ignored() {
        let mut rig = Rig::new();
        rig.deliver("lock/other", r#"["blue"]"#);
        assert_eq!(rig.controller.lock().code(), &SecurityCode::default());
    }

    #[test]
    fn dropped_link_is_reconnected_and_resubscribed() {
        let mut rig = Rig::new();
        rig.wire.lock().unwrap().closed = true;
        rig.step();
        assert!(!rig.controller.link().is_connected());

        {
            let mut w = rig.wire.lock().unwrap();
            w.closed = false;
            w.push(&CONNACK_OK);
            w.push(&SUBACK_OK);
        }
        rig.step();

        assert!(rig.controller.link().is_connected());
        assert!(rig
            .written()
            .ends_with(&codec::encode_subscribe(2, "lock/code", 0).unwrap()));
    }
}
