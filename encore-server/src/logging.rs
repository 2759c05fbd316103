use std::fmt::Display;

use colored::{ColoredString, Colorize};
use log::Level;

/// External crates only need to log warnings and errors
const EXTERNAL_LEVEL_FLOOR: Level = Level::Warn;

pub fn init_logger() {
    fern::Dispatch::new()
        .format(|out, message, record| {
            let target = Target::from_str(record.target());
            let now = chrono::Local::now();

            out.finish(format_args!(
                "{} {} {:^8} {}",
                now.format("%H:%M:%S").to_string().bright_black(),
                level_badge(record.level()),
                target,
                message
            ))
        })
        .filter(|meta| {
            let target = Target::from_str(meta.target());

            if target.is_local() {
                meta.level() <= Level::Info
            } else {
                meta.level() <= EXTERNAL_LEVEL_FLOOR
            }
        })
        .chain(std::io::stdout())
        .apply()
        .expect("logging is initialized")
}

enum Target {
    External(String),
    Server,
    Collab,
}

impl Target {
    fn from_str(target: &str) -> Self {
        match target.split("::").next().unwrap_or_default() {
            "encore_server" => Self::Server,
            "encore_collab" => Self::Collab,
            other => Self::External(other.to_string()),
        }
    }

    fn is_local(&self) -> bool {
        !matches!(self, Self::External(_))
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            Target::External(x) => x.as_str().clear(),
            Target::Server => "SERVER".bright_green(),
            Target::Collab => "COLLAB".bright_purple(),
        };

        Display::fmt(&result, f)
    }
}

fn level_badge(level: Level) -> ColoredString {
    match level {
        Level::Error => " ERR ".black().on_red().bold(),
        Level::Warn => " WRN ".black().on_yellow().bold(),
        Level::Info => " INF ".black().on_blue().bold(),
        Level::Debug => " DBG ".white().on_black(),
        Level::Trace => " TRC ".white().on_black(),
    }
}
