/*!
Fake ipmitool for process-level tests

A POSIX shell script run as `/bin/sh <script> <ipmitool args...>`. It finds
the target address after `-H`, counts the attempts made against it and
replays the behaviour scripted for that attempt. Once the script runs out of
behaviours the last one repeats; an address with no behaviour fails like an
unreachable controller.

Every invocation records its pid so tests can check the process is gone.
*/

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// What one invocation does
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    /// Print `stdout` verbatim, then exit
    Output { stdout: String, exit_code: i32 },
    /// Print to stderr, then exit
    Fail { stderr: String, exit_code: i32 },
    /// Print `stdout`, then block without closing the stream
    Hang { stdout: String },
}

impl Behavior {
    /// Full listing with newline-terminated lines, exit 0
    pub fn listing<S: AsRef<str>>(lines: &[S]) -> Self {
        Behavior::Output {
            stdout: join_lines(lines),
            exit_code: 0,
        }
    }

    pub fn listing_with_exit<S: AsRef<str>>(lines: &[S], exit_code: i32) -> Self {
        Behavior::Output {
            stdout: join_lines(lines),
            exit_code,
        }
    }

    pub fn fail(stderr: &str, exit_code: i32) -> Self {
        Behavior::Fail {
            stderr: stderr.to_string(),
            exit_code,
        }
    }

    pub fn hang<S: AsRef<str>>(lines: &[S]) -> Self {
        Behavior::Hang {
            stdout: join_lines(lines),
        }
    }

    fn shell_body(&self) -> String {
        match self {
            Behavior::Output { stdout, exit_code } => {
                format!("printf '%s' {}\nexit {}\n", quote(stdout), exit_code)
            }
            Behavior::Fail { stderr, exit_code } => {
                format!("printf '%s' {} >&2\nexit {}\n", quote(stderr), exit_code)
            }
            // exec keeps the recorded pid pointing at the blocked process
            Behavior::Hang { stdout } => {
                format!("printf '%s' {}\nexec sleep 30\n", quote(stdout))
            }
        }
    }
}

pub struct FakeIpmiTool {
    script: PathBuf,
    state_dir: PathBuf,
}

impl FakeIpmiTool {
    /// Install the script and its state directory under `dir`.
    pub fn install(dir: &Path) -> Result<Self> {
        let state_dir = dir.join("fake-ipmitool.d");
        fs::create_dir_all(&state_dir)
            .with_context(|| format!("creating {}", state_dir.display()))?;

        let script = dir.join("fake-ipmitool.sh");
        fs::write(&script, dispatcher(&state_dir))
            .with_context(|| format!("writing {}", script.display()))?;

        log::debug!("fake ipmitool installed at {}", script.display());
        Ok(Self { script, state_dir })
    }

    /// Script the successive attempts against `address`.
    pub fn on(&self, address: &str, behaviors: Vec<Behavior>) -> Result<&Self> {
        let Some(last) = behaviors.last() else {
            anyhow::bail!("no behaviour given for {}", address);
        };
        for (idx, behavior) in behaviors.iter().enumerate() {
            self.write_plan(&format!("{}.{}.sh", address, idx + 1), behavior)?;
        }
        self.write_plan(&format!("{}.rest.sh", address), last)?;
        Ok(self)
    }

    /// Interpreter to configure as the ipmitool program
    pub fn program(&self) -> String {
        "/bin/sh".to_string()
    }

    /// Arguments placed before the ipmitool ones
    pub fn program_args(&self) -> Vec<String> {
        vec![self.script.to_string_lossy().into_owned()]
    }

    /// Invocations seen for `address`
    pub fn attempts(&self, address: &str) -> u32 {
        self.read_state(&format!("{}.count", address)).unwrap_or(0) as u32
    }

    /// Pid of the latest invocation for `address`
    pub fn last_pid(&self, address: &str) -> Option<i32> {
        self.read_state(&format!("{}.pid", address)).map(|pid| pid as i32)
    }

    fn write_plan(&self, file: &str, behavior: &Behavior) -> Result<()> {
        let path = self.state_dir.join(file);
        fs::write(&path, behavior.shell_body())
            .with_context(|| format!("writing {}", path.display()))
    }

    fn read_state(&self, file: &str) -> Option<i64> {
        fs::read_to_string(self.state_dir.join(file))
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

fn dispatcher(state_dir: &Path) -> String {
    format!(
        r#"#!/bin/sh
state={state}
addr=
while [ $# -gt 0 ]; do
  if [ "$1" = "-H" ]; then addr="$2"; shift; fi
  shift
done
if [ -z "$addr" ]; then
  echo "fake-ipmitool: no -H argument" >&2
  exit 64
fi
n=$(cat "$state/$addr.count" 2>/dev/null || echo 0)
n=$((n + 1))
echo "$n" > "$state/$addr.count"
echo "$$" > "$state/$addr.pid"
plan="$state/$addr.$n.sh"
[ -f "$plan" ] || plan="$state/$addr.rest.sh"
if [ ! -f "$plan" ]; then
  echo "Error: Unable to establish IPMI v2 / RMCP+ session" >&2
  exit 1
fi
. "$plan"
"#,
        state = quote(&state_dir.to_string_lossy())
    )
}

fn join_lines<S: AsRef<str>>(lines: &[S]) -> String {
    lines.iter().fold(String::new(), |mut out, line| {
        out.push_str(line.as_ref());
        out.push('\n');
        out
    })
}

/// Single-quote for sh
fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}
