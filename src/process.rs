use std::io::{BufReader, Read};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;

use crate::error::{ScribeError, ScribeResult};

#[must_use]
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Read a program name from `key`, falling back to `default` when the
/// variable is unset or blank.
pub(crate) fn binary_from_env(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_owned())
}

pub fn run_command(program: &str, args: &[String], cwd: Option<&Path>) -> ScribeResult<Output> {
    ensure_program(program)?;

    let rendered = render(program, args);
    let mut command = Command::new(program);
    command.args(args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command.output()?;
    validate_command_output(&rendered, output)
}

/// Run a subprocess and hand every stderr line to `on_line` as it arrives.
///
/// Progress bars redraw in place with `\r`, so both `\r` and `\n` end a line.
/// Stdout is drained on a helper thread so a chatty child cannot block on a
/// full pipe while we are reading stderr. There is no timeout: a hung child
/// hangs the caller.
pub fn run_command_streaming(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    on_line: &mut dyn FnMut(&str),
) -> ScribeResult<Output> {
    ensure_program(program)?;

    let rendered = render(program, args);
    let mut command = Command::new(program);
    command.args(args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;
    let (Some(mut stdout_pipe), Some(stderr_pipe)) = (child.stdout.take(), child.stderr.take())
    else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(ScribeError::Io(std::io::Error::other(format!(
            "`{rendered}` did not expose piped stdio"
        ))));
    };

    let stdout_reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf);
        buf
    });

    let stderr = read_lines(stderr_pipe, on_line);
    let status = child.wait()?;
    let stdout = stdout_reader.join().unwrap_or_default();

    validate_command_output(
        &rendered,
        Output {
            status,
            stdout,
            stderr,
        },
    )
}

/// Split a byte stream on `\r`/`\n`, forwarding each non-empty line. Returns
/// everything that was read so callers can still report stderr on failure.
fn read_lines(pipe: impl Read, on_line: &mut dyn FnMut(&str)) -> Vec<u8> {
    let mut reader = BufReader::new(pipe);
    let mut captured = Vec::new();
    let mut line = Vec::new();
    let mut chunk = [0_u8; 4096];

    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => {
                tracing::debug!(error = %error, "stderr stream closed with error");
                break;
            }
        };
        captured.extend_from_slice(&chunk[..read]);
        for &byte in &chunk[..read] {
            if byte == b'\n' || byte == b'\r' {
                flush_line(&mut line, on_line);
            } else {
                line.push(byte);
            }
        }
    }
    flush_line(&mut line, on_line);
    captured
}

fn flush_line(line: &mut Vec<u8>, on_line: &mut dyn FnMut(&str)) {
    if line.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(line);
    on_line(&text);
    line.clear();
}

fn ensure_program(program: &str) -> ScribeResult<()> {
    if command_exists(program) {
        Ok(())
    } else {
        Err(ScribeError::CommandMissing {
            command: program.to_owned(),
        })
    }
}

fn render(program: &str, args: &[String]) -> String {
    format!("{} {}", program, args.join(" "))
}

fn validate_command_output(rendered: &str, output: Output) -> ScribeResult<Output> {
    if output.status.success() {
        return Ok(output);
    }

    let status = output.status.code().unwrap_or(-1);
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    Err(ScribeError::from_command_failure(
        rendered.to_owned(),
        status,
        stderr,
    ))
}
