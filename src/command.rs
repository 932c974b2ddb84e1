/// Line-oriented command parsing for the channel file.
///
/// Each line is `KEY,DURATION`. Blank lines and `#` comments are skipped,
/// anything else that does not fit the schema is rejected with a reason.
use std::fmt;
use std::time::Duration;

/// Field separator between key and duration.
pub const SEPARATOR: char = ',';

/// A single validated key-hold instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    key: String,
    duration_secs: f64,
    duration: Duration,
}

impl Command {
    /// Key name, already uppercased.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Hold duration in seconds (always finite and >= 0).
    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.key, SEPARATOR, self.duration_secs)
    }
}

/// Why a line was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line did not split into exactly two fields.
    FieldCount { found: usize },
    /// Key field was empty after trimming.
    EmptyKey,
    /// Duration field is not a finite number.
    InvalidDuration { raw: String },
    /// Duration parsed but is below zero.
    NegativeDuration { raw: String },
    /// Duration is too large to hold.
    DurationOutOfRange { raw: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::FieldCount { found } => {
                write!(f, "expected KEY{SEPARATOR}DURATION, found {found} field(s)")
            }
            ParseError::EmptyKey => write!(f, "key is empty"),
            ParseError::InvalidDuration { raw } => write!(f, "invalid duration '{raw}'"),
            ParseError::NegativeDuration { raw } => write!(f, "negative duration '{raw}'"),
            ParseError::DurationOutOfRange { raw } => {
                write!(f, "duration '{raw}' is out of range")
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Outcome of parsing one line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Command(Command),
    /// Blank line or comment.
    Skip,
    Reject(ParseError),
}

/// Parse a single line of the channel file.
pub fn parse_line(line: &str) -> ParsedLine {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return ParsedLine::Skip;
    }

    let fields: Vec<&str> = trimmed.split(SEPARATOR).collect();
    if fields.len() != 2 {
        return ParsedLine::Reject(ParseError::FieldCount {
            found: fields.len(),
        });
    }

    let key = fields[0].trim();
    if key.is_empty() {
        return ParsedLine::Reject(ParseError::EmptyKey);
    }

    let raw = fields[1].trim();
    let duration_secs = match raw.parse::<f64>() {
        Ok(d) if d.is_finite() => d,
        _ => {
            return ParsedLine::Reject(ParseError::InvalidDuration {
                raw: raw.to_string(),
            })
        }
    };
    if duration_secs < 0.0 {
        return ParsedLine::Reject(ParseError::NegativeDuration {
            raw: raw.to_string(),
        });
    }

    // abs() turns -0.0 into 0.0 so the conversion below never sees a sign bit.
    let duration_secs = duration_secs.abs();
    let Ok(duration) = Duration::try_from_secs_f64(duration_secs) else {
        return ParsedLine::Reject(ParseError::DurationOutOfRange {
            raw: raw.to_string(),
        });
    };

    ParsedLine::Command(Command {
        key: key.to_uppercase(),
        duration_secs,
        duration,
    })
}

/// Commands extracted from one read of the channel file, in line order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CommandBatch {
    pub commands: Vec<Command>,
    /// Number of lines rejected while building the batch.
    pub rejected: usize,
}

impl CommandBatch {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Sum of all hold durations, saturating at `Duration::MAX`.
    pub fn total_duration(&self) -> Duration {
        self.commands
            .iter()
            .fold(Duration::ZERO, |total, cmd| total.saturating_add(cmd.duration()))
    }
}

/// Parse every line, logging and dropping rejections.
pub fn parse_batch<I, S>(lines: I) -> CommandBatch
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut batch = CommandBatch::default();
    for (idx, line) in lines.into_iter().enumerate() {
        let line = line.as_ref();
        match parse_line(line) {
            ParsedLine::Command(cmd) => {
                tracing::debug!(line = idx + 1, command = %cmd, "parsed command");
                batch.commands.push(cmd);
            }
            ParsedLine::Skip => {}
            ParsedLine::Reject(reason) => {
                tracing::warn!(line = idx + 1, text = line.trim(), %reason, "rejected command line");
                batch.rejected += 1;
            }
        }
    }
    batch
}
