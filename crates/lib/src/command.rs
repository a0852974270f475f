//! Shell-command handlers.
//!
//! Rules loaded from a script carry their work as a command template rather
//! than a closure. Templates use the conventional automatic variables:
//! `$@` expands to the target, `$<` to the first source, `$^` to all sources
//! separated by spaces, and `$$` to a literal `$`. Expansion happens against
//! the binding at execution time, so one wildcard rule serves every target it
//! matches.

use std::process::Command;

use tracing::{debug, info};

use crate::matcher::Binding;
use crate::rule::Handler;

/// Expand the automatic variables in a command template.
///
/// Unrecognized `$x` sequences and a trailing `$` pass through unchanged.
pub fn expand(template: &str, binding: &Binding) -> String {
  let mut out = String::with_capacity(template.len());
  let mut chars = template.chars().peekable();

  while let Some(c) = chars.next() {
    if c != '$' {
      out.push(c);
      continue;
    }
    match chars.peek() {
      Some('@') => {
        chars.next();
        out.push_str(&binding.target);
      }
      Some('<') => {
        chars.next();
        if let Some(first) = binding.sources.first() {
          out.push_str(first);
        }
      }
      Some('^') => {
        chars.next();
        out.push_str(&binding.sources.join(" "));
      }
      Some('$') => {
        chars.next();
        out.push('$');
      }
      _ => out.push('$'),
    }
  }

  out
}

/// The system shell and its command flag.
///
/// Always `/bin/sh` on Unix and `cmd.exe` on Windows; the user's interactive
/// shell may source profile files that change the environment.
fn shell() -> (&'static str, &'static str) {
  #[cfg(unix)]
  {
    ("/bin/sh", "-c")
  }

  #[cfg(windows)]
  {
    ("cmd.exe", "/C")
  }
}

/// Build a handler that expands the template and runs it through the system
/// shell, inheriting stdout and stderr.
///
/// A non-zero exit status fails the job with the expanded command and the
/// exit code in the error.
pub fn shell_handler(template: impl Into<String>) -> Handler {
  let template = template.into();
  std::sync::Arc::new(move |binding: &Binding| {
    let cmd = expand(&template, binding);
    info!(cmd = %cmd, target = %binding.target, "running command");

    let (shell_cmd, shell_arg) = shell();
    let status = Command::new(shell_cmd).arg(shell_arg).arg(&cmd).status()?;

    debug!(cmd = %cmd, status = %status, "command finished");

    if !status.success() {
      match status.code() {
        Some(code) => anyhow::bail!("command '{cmd}' failed with exit code {code}"),
        None => anyhow::bail!("command '{cmd}' was terminated by a signal"),
      }
    }
    Ok(())
  })
}
