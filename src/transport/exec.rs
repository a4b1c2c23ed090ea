//! Exec transport: runs an arbitrary user-supplied command with a
//! minimal environment, built on a `subprocess`-backed exec wrapper and on
//! `shlex` for splitting the configured command line.

use serde::Deserialize;
use subprocess::{Exec, NullFile, Redirection};

use crate::error::TransportError;
use crate::transport::{Transport, TransportContext, base_env, planb_env};

#[derive(Debug, Clone, Deserialize)]
pub struct ExecConfig {
    pub transport_command: String,
}

/// `\<LF>` is allowed for readability in the config file and stripped
/// before shell-word splitting.
fn unwrap_continuations(s: &str) -> String {
    s.replace("\\\n", " ")
}

pub fn split_command(raw: &str) -> Result<Vec<String>, TransportError> {
    let joined = unwrap_continuations(raw);
    shlex::split(&joined).ok_or_else(|| TransportError::Fatal {
        code: -1,
        stderr: format!("could not shell-split transport_command: {raw:?}"),
    })
}

impl Transport for ExecConfig {
    fn run_transport(&self, ctx: &TransportContext<'_>) -> Result<(), TransportError> {
        let argv = split_command(&self.transport_command)?;
        let Some((program, rest)) = argv.split_first() else {
            return Err(TransportError::Fatal {
                code: -1,
                stderr: "transport_command is empty".to_string(),
            });
        };

        let mut cmd = Exec::cmd(program).args(rest).stdin(NullFile).env_clear();
        for (key, value) in base_env().into_iter().chain(planb_env(ctx)) {
            cmd = cmd.env(key, value);
        }

        let capture = cmd
            .stdout(Redirection::Pipe)
            .stderr(Redirection::Merge)
            .capture()
            .map_err(|e| TransportError::Fatal {
                code: -1,
                stderr: e.to_string(),
            })?;

        let code = match capture.exit_status {
            subprocess::ExitStatus::Exited(0) => return Ok(()),
            subprocess::ExitStatus::Exited(code) => code as i32,
            other => {
                return Err(TransportError::Fatal {
                    code: -1,
                    stderr: format!("transport_command did not exit normally: {other:?}"),
                });
            }
        };
        Err(TransportError::Fatal {
            code,
            stderr: capture.stdout_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_command() {
        let argv = split_command("/usr/bin/fetch --verbose").unwrap();
        assert_eq!(argv, vec!["/usr/bin/fetch", "--verbose"]);
    }

    #[test]
    fn strips_line_continuations() {
        let argv = split_command("/usr/bin/fetch \\\n--verbose \\\n--slow").unwrap();
        assert_eq!(argv, vec!["/usr/bin/fetch", "--verbose", "--slow"]);
    }

    #[test]
    fn respects_quoting() {
        let argv = split_command(r#"/bin/sh -c "echo hello world""#).unwrap();
        assert_eq!(argv, vec!["/bin/sh", "-c", "echo hello world"]);
    }
}
