use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::debugger::lifecycle::Lifecycle;

#[derive(Debug, Clone)]
pub struct Config {
    pub debugger_path: Option<PathBuf>,
    pub work_directory: Option<PathBuf>,
    pub kill_after: Duration,
    pub exit_deadline: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            debugger_path: None,
            work_directory: None,
            kill_after: Duration::from_millis(1000),
            exit_deadline: Duration::from_millis(2000),
        }
    }
}

impl Config {
    pub fn new(opt: &super::Opt) -> Config {
        Config {
            debugger_path: opt.debugger.clone(),
            work_directory: opt.work_directory.clone().or_else(|| {
                opt.program
                    .as_deref()
                    .and_then(parent_directory)
            }),
            kill_after: Duration::from_millis(opt.kill_after_ms),
            exit_deadline: Duration::from_millis(opt.exit_deadline_ms),
        }
    }

    pub fn is_missing_config(&self) -> bool {
        self.debugger_path.is_none()
    }

    pub fn missing_config_message(&self) -> String {
        if !self.is_missing_config() {
            return "No required configurations missing".to_owned();
        }

        let mut error = "Missing required configurations:".to_owned();
        if self.debugger_path.is_none() {
            error = format!("{}\n\t{}", error, "debugger path (DEBUGGER_PATH)");
        }

        error
    }

    /// Directory the debugger is started in: the configured one, else the program's own.
    pub fn work_directory_for(&self, program: &Path) -> Option<PathBuf> {
        self.work_directory
            .clone()
            .or_else(|| parent_directory(program))
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::new(self.kill_after, self.exit_deadline)
    }
}

fn parent_directory(program: &Path) -> Option<PathBuf> {
    program
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_missing_debugger() {
        let config = Config::default();
        assert!(config.is_missing_config());
        assert!(config.missing_config_message().contains("DEBUGGER_PATH"));
    }

    #[test]
    fn work_directory_follows_program() {
        let config = Config::default();
        assert_eq!(
            config.work_directory_for(Path::new("/src/turtle/main.tt")),
            Some(PathBuf::from("/src/turtle"))
        );
        assert_eq!(config.work_directory_for(Path::new("main.tt")), None);

        let config = Config {
            work_directory: Some(PathBuf::from("/work")),
            ..Config::default()
        };
        assert_eq!(
            config.work_directory_for(Path::new("/src/main.tt")),
            Some(PathBuf::from("/work"))
        );
    }
}
