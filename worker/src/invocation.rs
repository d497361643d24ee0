//! Worker invocation carried across `exec` in environment variables
//!
//! The coordinator builds a `WorkerInvocation`, exports it with `env_vars`,
//! and re-executes its own binary. The re-executed process recognises itself
//! as a worker because `CAPTEST_WORKER_TEST` is set.

use std::os::fd::RawFd;
use std::path::PathBuf;

use crate::error::{WorkerError, WorkerResult};

pub const ENV_TEST: &str = "CAPTEST_WORKER_TEST";
pub const ENV_WORKER_ID: &str = "CAPTEST_WORKER_ID";
pub const ENV_RESULT_FD: &str = "CAPTEST_RESULT_FD";
pub const ENV_COVERAGE_DIR: &str = "CAPTEST_COVERAGE_DIR";
pub const ENV_COVERAGE_FD: &str = "CAPTEST_COVERAGE_FD";
pub const ENV_DATA_FILE: &str = "CAPTEST_DATA_FILE";
pub const ENV_LOG_LEVEL: &str = "CAPTEST_LOG_LEVEL";
pub const ENV_SOURCE_ROOT: &str = "CAPTEST_SOURCE_ROOT";

/// Everything a worker needs to run one isolated test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInvocation {
    pub test_name: String,
    pub worker_id: u32,
    /// Inherited write end of the result channel
    pub result_fd: RawFd,
    pub coverage_dir: PathBuf,
    /// Inherited handle of `coverage_dir`
    pub coverage_fd: RawFd,
    pub data_file: String,
    pub log_level: Option<String>,
    pub source_root: Option<PathBuf>,
}

impl WorkerInvocation {
    /// Read the invocation from the process environment; `None` outside a worker
    pub fn from_env() -> WorkerResult<Option<Self>> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> WorkerResult<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(test_name) = lookup(ENV_TEST) else {
            return Ok(None);
        };

        let required = |name: &'static str| lookup(name).ok_or(WorkerError::MissingEnvironment { name });

        Ok(Some(Self {
            test_name,
            worker_id: parse(ENV_WORKER_ID, required(ENV_WORKER_ID)?)?,
            result_fd: parse(ENV_RESULT_FD, required(ENV_RESULT_FD)?)?,
            coverage_dir: PathBuf::from(required(ENV_COVERAGE_DIR)?),
            coverage_fd: parse(ENV_COVERAGE_FD, required(ENV_COVERAGE_FD)?)?,
            data_file: required(ENV_DATA_FILE)?,
            log_level: lookup(ENV_LOG_LEVEL),
            source_root: lookup(ENV_SOURCE_ROOT).map(PathBuf::from),
        }))
    }

    /// Environment to set on the spawned worker
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            (ENV_TEST, self.test_name.clone()),
            (ENV_WORKER_ID, self.worker_id.to_string()),
            (ENV_RESULT_FD, self.result_fd.to_string()),
            (ENV_COVERAGE_DIR, self.coverage_dir.to_string_lossy().into_owned()),
            (ENV_COVERAGE_FD, self.coverage_fd.to_string()),
            (ENV_DATA_FILE, self.data_file.clone()),
        ];
        if let Some(level) = &self.log_level {
            vars.push((ENV_LOG_LEVEL, level.clone()));
        }
        if let Some(root) = &self.source_root {
            vars.push((ENV_SOURCE_ROOT, root.to_string_lossy().into_owned()));
        }
        vars
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: String) -> WorkerResult<T> {
    value
        .parse()
        .map_err(|_| WorkerError::InvalidEnvironment { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample() -> WorkerInvocation {
        WorkerInvocation {
            test_name: "sandbox_trivial".to_string(),
            worker_id: 2,
            result_fd: 7,
            coverage_dir: PathBuf::from("/tmp/covdata"),
            coverage_fd: 8,
            data_file: ".coverage".to_string(),
            log_level: Some("debug".to_string()),
            source_root: None,
        }
    }

    #[test]
    fn test_absent_test_variable_means_not_a_worker() {
        let parsed = WorkerInvocation::from_lookup(|_| None).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_env_vars_parse_back() {
        let invocation = sample();
        let env: HashMap<&str, String> = invocation.env_vars().into_iter().collect();

        let parsed = WorkerInvocation::from_lookup(|name| env.get(name).cloned()).unwrap();
        assert_eq!(parsed, Some(invocation));
    }

    #[test]
    fn test_missing_and_invalid_variables() {
        let mut env: HashMap<&str, String> = sample().env_vars().into_iter().collect();
        env.remove(ENV_COVERAGE_FD);
        let err = WorkerInvocation::from_lookup(|name| env.get(name).cloned()).unwrap_err();
        assert!(matches!(err, WorkerError::MissingEnvironment { name } if name == ENV_COVERAGE_FD));

        env.insert(ENV_COVERAGE_FD, "eight".to_string());
        let err = WorkerInvocation::from_lookup(|name| env.get(name).cloned()).unwrap_err();
        assert!(err.to_string().contains("eight"));
    }
}
