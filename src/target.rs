//! Target file guard and the read/write operations the editor uses.

use crate::error::TargetError;
use std::fs;
use std::io::{self, BufRead, ErrorKind, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Asks the operator whether a missing target should be created.
pub trait CreatePrompt {
    fn confirm_create(&mut self, path: &Path) -> bool;
}

/// Prompts on the controlling terminal. Answers "no" when stdin or stdout
/// is not a terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl CreatePrompt for TerminalPrompt {
    fn confirm_create(&mut self, path: &Path) -> bool {
        if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
            return false;
        }

        let mut stdout = io::stdout();
        let _ = write!(
            stdout,
            "Target file \"{}\" does not exist. Create it? (y/N): ",
            path.display()
        );
        let _ = stdout.flush();

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_affirmative(&answer),
            Err(_) => false,
        }
    }
}

/// Accepts `y` or `yes` in any case.
pub fn is_affirmative(answer: &str) -> bool {
    let answer = answer.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

/// A validated, existing regular file.
#[derive(Debug, Clone)]
pub struct TargetFile {
    path: PathBuf,
    name: String,
}

impl TargetFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn read(&self) -> io::Result<String> {
        tokio::fs::read_to_string(&self.path).await
    }

    /// Overwrite the file contents. Concurrent writers are not reconciled.
    pub async fn write(&self, content: &str) -> io::Result<()> {
        tokio::fs::write(&self.path, content).await
    }

    fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }
}

/// Turn a CLI path into an absolute one, defaulting to the working directory.
pub fn resolve_target_path(arg: Option<&Path>) -> io::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(match arg {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => cwd.join(path),
        None => cwd,
    })
}

/// Ensure `path` names an existing regular file, offering to create it.
///
/// Returns the ready file or the reason startup must stop.
pub fn ensure_target_file(
    path: &Path,
    prompt: &mut dyn CreatePrompt,
) -> Result<TargetFile, TargetError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(TargetFile::new(path.to_path_buf())),
        Ok(_) => Err(TargetError::NotAFile(path.to_path_buf())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            if !prompt.confirm_create(path) {
                return Err(TargetError::Missing(path.to_path_buf()));
            }
            create_empty(path)?;
            info!(path = %path.display(), "created new file");
            Ok(TargetFile::new(path.to_path_buf()))
        }
        Err(source) => Err(TargetError::Access {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn create_empty(path: &Path) -> Result<(), TargetError> {
    let create_err = |source| TargetError::Create {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(create_err)?;
    }
    fs::write(path, "").map_err(create_err)
}
