use log::{LevelFilter, Metadata, Record};

static LOGGER: SimpleLogger = SimpleLogger;

struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("{} - {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Parses the `--log-level` flag's CRITICAL/ERROR/WARNING/INFO/DEBUG scale
/// (the Python original's `logging` levels) into `log`'s `LevelFilter`.
/// CRITICAL has no direct `log` equivalent, so it maps to `Error`, its
/// nearest less-verbose neighbor.
pub fn parse_level(name: &str) -> LevelFilter {
    match name.to_uppercase().as_str() {
        "CRITICAL" | "ERROR" => LevelFilter::Error,
        "WARNING" => LevelFilter::Warn,
        "INFO" => LevelFilter::Info,
        "DEBUG" => LevelFilter::Debug,
        _ => LevelFilter::Info,
    }
}

pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_level_name_falls_back_to_info() {
        assert_eq!(parse_level("bogus"), LevelFilter::Info);
    }

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("Debug"), LevelFilter::Debug);
    }

    #[test]
    fn critical_maps_to_error() {
        assert_eq!(parse_level("CRITICAL"), LevelFilter::Error);
    }
}
