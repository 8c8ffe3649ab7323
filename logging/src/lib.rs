#[cfg(feature = "color")]
use colored::Colorize;
use log::{Level, Log, Metadata, Record, SetLoggerError};
use std::time::Instant;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const TIMESTAMP_UTC: &[FormatItem] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]Z");
const TIMESTAMP_LOCAL: &[FormatItem] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

pub enum TimestampFormat {
    Utc,
    Local,
    Relative,
}

pub struct EvergreenLogger {
    level: Level,
    timestamp_format: TimestampFormat,
    show_target: bool,
    use_colors: bool,
    target_levels: Vec<(String, Level)>,
    started: Instant,
}

pub struct EvergreenLoggerBuilder {
    level: Level,
    timestamp_format: TimestampFormat,
    show_target: bool,
    use_colors: bool,
    target_levels: Vec<(String, Level)>,
}

impl Default for EvergreenLoggerBuilder {
    fn default() -> Self {
        Self {
            level: Level::Info,
            timestamp_format: TimestampFormat::Utc,
            show_target: true,
            use_colors: true,
            target_levels: Vec::new(),
        }
    }
}

impl EvergreenLoggerBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
    pub fn timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.timestamp_format = format;
        self
    }
    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }
    pub fn use_colors(mut self, colors: bool) -> Self {
        self.use_colors = colors;
        self
    }
    /// Override the level for log targets starting with `prefix`.
    pub fn with_target_level(mut self, prefix: &str, level: Level) -> Self {
        self.target_levels.push((prefix.to_string(), level));
        self
    }
    pub fn init(mut self) -> Result<(), SetLoggerError> {
        self.target_levels.sort_by(|a, b| a.0.cmp(&b.0));
        let max_level = self
            .target_levels
            .iter()
            .map(|(_, l)| *l)
            .chain([self.level])
            .max()
            .unwrap_or(self.level);
        let logger = EvergreenLogger {
            level: self.level,
            timestamp_format: self.timestamp_format,
            show_target: self.show_target,
            use_colors: self.use_colors,
            target_levels: self.target_levels,
            started: Instant::now(),
        };
        log::set_boxed_logger(Box::new(logger))?;
        log::set_max_level(max_level.to_level_filter());
        Ok(())
    }
}

impl EvergreenLogger {
    pub fn build() -> EvergreenLoggerBuilder {
        EvergreenLoggerBuilder::new()
    }

    fn timestamp(&self) -> String {
        match self.timestamp_format {
            TimestampFormat::Utc => OffsetDateTime::now_utc()
                .format(&TIMESTAMP_UTC)
                .unwrap_or_default(),
            TimestampFormat::Local => OffsetDateTime::now_local()
                .unwrap_or_else(|_| OffsetDateTime::now_utc())
                .format(&TIMESTAMP_LOCAL)
                .unwrap_or_default(),
            TimestampFormat::Relative => {
                let elapsed = self.started.elapsed();
                let secs = elapsed.as_secs();
                format!(
                    "{:02}:{:02}:{:02}.{:03}",
                    secs / 3600,
                    (secs % 3600) / 60,
                    secs % 60,
                    elapsed.subsec_millis()
                )
            }
        }
    }

    fn level_label(&self, level: Level) -> String {
        let label = format!("{level:<5}");
        #[cfg(feature = "color")]
        if self.use_colors {
            return match level {
                Level::Error => label.red().to_string(),
                Level::Warn => label.yellow().to_string(),
                Level::Info => label.cyan().to_string(),
                Level::Debug => label.purple().to_string(),
                Level::Trace => label.magenta().to_string(),
            };
        }
        label
    }
}

impl Log for EvergreenLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let limit = self
            .target_levels
            .iter()
            .find(|(prefix, _)| metadata.target().starts_with(prefix))
            .map_or(self.level, |(_, level)| *level);
        metadata.level() <= limit
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let target = if self.show_target {
            format!("[{}] ", record.target())
        } else {
            String::new()
        };
        println!(
            "{} {} {}{}",
            self.timestamp(),
            self.level_label(record.level()),
            target,
            record.args()
        );
    }

    fn flush(&self) {}
}
