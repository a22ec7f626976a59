use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Colors available on the three buttons. Serialized as lower-case names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Green,
    Blue,
}

impl Color {
    pub fn name(&self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Green => "green",
            Color::Blue => "blue",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Color {
    type Err = CodeUpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "red" => Ok(Color::Red),
            "green" => Ok(Color::Green),
            "blue" => Ok(Color::Blue),
            other => Err(CodeUpdateError::InvalidSymbol(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodeUpdateError {
    #[error("invalid code symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("security code must contain at least one symbol")]
    Empty,

    #[error("code payload is not a JSON array of strings: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Result of one press or one code update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Attempt not complete yet, carries what has been pressed so far
    InProgress(Vec<Color>),
    Success,
    Failure,
    CodeUpdated,
}

/// Ordered unlock sequence, never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityCode(Vec<Color>);

impl SecurityCode {
    pub fn new(symbols: Vec<Color>) -> Result<Self, CodeUpdateError> {
        if symbols.is_empty() {
            return Err(CodeUpdateError::Empty);
        }
        Ok(Self(symbols))
    }

    pub fn parse<S: AsRef<str>>(symbols: &[S]) -> Result<Self, CodeUpdateError> {
        let colors = symbols
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<Color>, _>>()?;
        Self::new(colors)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[Color] {
        &self.0
    }
}

impl Default for SecurityCode {
    fn default() -> Self {
        Self(vec![Color::Red, Color::Green, Color::Blue])
    }
}

impl fmt::Display for SecurityCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Color::name).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Parses the JSON array carried on the code topic, e.g. `["green","red"]`.
pub fn parse_code_payload(payload: &str) -> Result<Vec<String>, CodeUpdateError> {
    Ok(serde_json::from_str::<Vec<String>>(payload)?)
}

/// Owns the security code and the attempt in progress.
#[derive(Debug, Clone, Default)]
pub struct SequenceLock {
    code: SecurityCode,
    progress: Vec<Color>,
    last_attempt: Vec<Color>,
}

impl SequenceLock {
    pub fn new(code: SecurityCode) -> Self {
        Self {
            code,
            progress: Vec::new(),
            last_attempt: Vec::new(),
        }
    }

    pub fn code(&self) -> &SecurityCode {
        &self.code
    }

    pub fn progress(&self) -> &[Color] {
        &self.progress
    }

    /// The most recently completed attempt, kept for display after the reset.
    pub fn last_attempt(&self) -> &[Color] {
        &self.last_attempt
    }

    pub fn accept_press(&mut self, color: Color) -> Outcome {
        self.progress.push(color);
        debug!("Sequence so far: {:?}", self.progress);

        if self.progress.len() < self.code.len() {
            return Outcome::InProgress(self.progress.clone());
        }

        self.last_attempt = std::mem::take(&mut self.progress);
        if self.last_attempt == self.code.as_slice() {
            info!("Correct sequence");
            Outcome::Success
        } else {
            info!("Incorrect sequence");
            Outcome::Failure
        }
    }

    /// Replaces the code wholesale. On error the previous code stays in place.
    pub fn apply_remote_code<S: AsRef<str>>(
        &mut self,
        update: &[S],
    ) -> Result<Outcome, CodeUpdateError> {
        let code = SecurityCode::parse(update)?;
        info!("New security code set: {}", code);
        self.code = code;
        self.progress.clear();
        Ok(Outcome::CodeUpdated)
    }

    pub fn apply_remote_payload(&mut self, payload: &str) -> Result<Outcome, CodeUpdateError> {
        let symbols = parse_code_payload(payload)?;
        self.apply_remote_code(&symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Color::*;

    fn rgb_lock() -> SequenceLock {
        SequenceLock::new(SecurityCode::new(vec![Red, Green, Blue]).unwrap())
    }

    #[test]
    fn correct_sequence_succeeds_and_resets() {
        let mut lock = rgb_lock();
        assert_eq!(lock.accept_press(Red), Outcome::InProgress(vec![Red]));
        assert_eq!(lock.accept_press(Green), Outcome::InProgress(vec![Red, Green]));
        assert_eq!(lock.accept_press(Blue), Outcome::Success);
        assert!(lock.progress().is_empty());
        assert_eq!(lock.last_attempt(), &[Red, Green, Blue]);
    }

    #[test]
    fn wrong_order_fails_and_resets() {
        let mut lock = rgb_lock();
        lock.accept_press(Red);
        lock.accept_press(Blue);
        assert_eq!(lock.accept_press(Green), Outcome::Failure);
        assert!(lock.progress().is_empty());
    }

    #[test]
    fn partial_progress_leaves_code_alone() {
        let mut lock = rgb_lock();
        assert_eq!(lock.accept_press(Red), Outcome::InProgress(vec![Red]));
        assert_eq!(lock.code().as_slice(), &[Red, Green, Blue]);
    }

    #[test]
    fn remote_update_replaces_code() {
        let mut lock = rgb_lock();
        assert_eq!(
            lock.apply_remote_code(&["green", "red"]).unwrap(),
            Outcome::CodeUpdated
        );
        assert_eq!(lock.code().as_slice(), &[Green, Red]);
        lock.accept_press(Green);
        assert_eq!(lock.accept_press(Red), Outcome::Success);
    }

    #[test]
    fn invalid_symbol_keeps_previous_code() {
        let mut lock = rgb_lock();
        assert!(matches!(
            lock.apply_remote_code(&["purple"]),
            Err(CodeUpdateError::InvalidSymbol(s)) if s == "purple"
        ));
        assert_eq!(lock.code().as_slice(), &[Red, Green, Blue]);
    }

    #[test]
    fn empty_update_is_rejected() {
        let mut lock = rgb_lock();
        let empty: [&str; 0] = [];
        assert!(matches!(
            lock.apply_remote_code(&empty),
            Err(CodeUpdateError::Empty)
        ));
        assert_eq!(lock.code().len(), 3);
    }

    #[test]
    fn update_clears_attempt_in_progress() {
        let mut lock = rgb_lock();
        lock.accept_press(Red);
        lock.apply_remote_code(&["blue"]).unwrap();
        assert!(lock.progress().is_empty());
        assert_eq!(lock.accept_press(Blue), Outcome::Success);
    }

    #[test]
    fn payload_parsing() {
        let mut lock = rgb_lock();
        lock.apply_remote_payload(r#"["blue","blue"]"#).unwrap();
        assert_eq!(lock.code().as_slice(), &[Blue, Blue]);

        assert!(matches!(
            lock.apply_remote_payload("not json"),
            Err(CodeUpdateError::Malformed(_))
        ));
        assert!(matches!(
            lock.apply_remote_payload(r#"{"code":["red"]}"#),
            Err(CodeUpdateError::Malformed(_))
        ));
        assert!(matches!(
            lock.apply_remote_payload(r#"["Red"]"#),
            Err(CodeUpdateError::InvalidSymbol(_))
        ));
        assert_eq!(lock.code().as_slice(), &[Blue, Blue]);
    }

    #[test]
    fn code_display() {
        assert_eq!(SecurityCode::default().to_string(), "[red, green, blue]");
    }
}
