// External collaborators of the analysis pipeline
// Fetching a source recording and isolating its vocal stem

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Vocal isolation failed: {0}")]
    IsolationFailed(String),

    #[error("Isolated vocals not found under {0}")]
    OutputNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

const VOCALS_FILE_NAME: &str = "vocals.wav";

/// Brings a source recording into a job directory
pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, source: &str, dest_dir: &Path) -> CollaboratorResult<PathBuf>;
}

/// Produces an isolated vocal WAV from a mixed recording
pub trait VocalIsolator: Send + Sync {
    fn isolate(&self, input: &Path, out_dir: &Path) -> CollaboratorResult<PathBuf>;
}

// ==================== FETCHERS ====================

/// Treats the source identifier as a local file path
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileFetcher;

impl SourceFetcher for LocalFileFetcher {
    fn fetch(&self, source: &str, dest_dir: &Path) -> CollaboratorResult<PathBuf> {
        let src = Path::new(source);
        if !src.is_file() {
            return Err(CollaboratorError::DownloadFailed(format!(
                "{} is not a readable file",
                source
            )));
        }

        let file_name = src
            .file_name()
            .ok_or_else(|| CollaboratorError::DownloadFailed(format!("no file name in {}", source)))?;

        fs::create_dir_all(dest_dir)?;
        let dest = dest_dir.join(file_name);
        fs::copy(src, &dest)?;

        log::debug!("Fetched {} -> {}", source, dest.display());
        Ok(dest)
    }
}

// ==================== ISOLATORS ====================

/// For inputs that already are isolated vocals
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughIsolator;

impl VocalIsolator for PassthroughIsolator {
    fn isolate(&self, input: &Path, _out_dir: &Path) -> CollaboratorResult<PathBuf> {
        if !input.is_file() {
            return Err(CollaboratorError::OutputNotFound(input.to_path_buf()));
        }
        Ok(input.to_path_buf())
    }
}

/// Runs an external source-separation program.
///
/// Arguments may contain `{input}` and `{output}` placeholders. After the
/// program exits successfully the output directory is searched for `vocals.wav`.
#[derive(Debug, Clone)]
pub struct CommandIsolator {
    program: String,
    args: Vec<String>,
}

impl CommandIsolator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a command line given as `[program, arg, ...]`
    pub fn from_command_line(parts: &[String]) -> Option<Self> {
        let (program, args) = parts.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    fn render_args(&self, input: &Path, out_dir: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = out_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

impl VocalIsolator for CommandIsolator {
    fn isolate(&self, input: &Path, out_dir: &Path) -> CollaboratorResult<PathBuf> {
        fs::create_dir_all(out_dir)?;
        let args = self.render_args(input, out_dir);

        log::info!("Running separator: {} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| {
                CollaboratorError::IsolationFailed(format!("could not run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollaboratorError::IsolationFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        find_file(out_dir, VOCALS_FILE_NAME)?
            .ok_or_else(|| CollaboratorError::OutputNotFound(out_dir.to_path_buf()))
    }
}

/// Depth-first search for a file name below `dir`
fn find_file(dir: &Path, name: &str) -> std::io::Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file(&path, name)? {
                return Ok(Some(found));
            }
        } else if entry.file_name() == name {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_fetch_copies_file() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("take.wav");
        fs::write(&src, b"RIFF").unwrap();

        let dest_dir = temp_dir.path().join("job");
        let fetched = LocalFileFetcher
            .fetch(src.to_str().unwrap(), &dest_dir)
            .unwrap();

        assert_eq!(fetched, dest_dir.join("take.wav"));
        assert_eq!(fs::read(fetched).unwrap(), b"RIFF");
    }

    #[test]
    fn test_local_fetch_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let result = LocalFileFetcher.fetch("/nonexistent/take.wav", temp_dir.path());
        assert!(matches!(result, Err(CollaboratorError::DownloadFailed(_))));
    }

    #[test]
    fn test_passthrough() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("vocals.wav");
        fs::write(&input, b"RIFF").unwrap();

        assert_eq!(
            PassthroughIsolator.isolate(&input, temp_dir.path()).unwrap(),
            input
        );
        assert!(matches!(
            PassthroughIsolator.isolate(&temp_dir.path().join("gone.wav"), temp_dir.path()),
            Err(CollaboratorError::OutputNotFound(_))
        ));
    }

    #[test]
    fn test_render_args_placeholders() {
        let isolator = CommandIsolator::new(
            "demucs",
            vec!["-o".into(), "{output}".into(), "{input}".into()],
        );
        let args = isolator.render_args(Path::new("/in/song.wav"), Path::new("/out"));
        assert_eq!(args, vec!["-o", "/out", "/in/song.wav"]);
    }

    #[test]
    fn test_from_command_line() {
        assert!(CommandIsolator::from_command_line(&[]).is_none());
        let isolator =
            CommandIsolator::from_command_line(&["sep".to_string(), "{input}".to_string()]).unwrap();
        assert_eq!(isolator.program, "sep");
        assert_eq!(isolator.args, vec!["{input}"]);
    }

    #[test]
    fn test_find_file_nested() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("htdemucs").join("song");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("drums.wav"), b"x").unwrap();
        fs::write(nested.join("vocals.wav"), b"x").unwrap();

        let found = find_file(temp_dir.path(), "vocals.wav").unwrap();
        assert_eq!(found, Some(nested.join("vocals.wav")));
        assert_eq!(find_file(temp_dir.path(), "bass.wav").unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_isolator_outputs() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("mix.wav");
        fs::write(&input, b"RIFF").unwrap();

        // Copies the input into place as the vocal stem
        let ok = CommandIsolator::new(
            "sh",
            vec!["-c".into(), "cp {input} {output}/vocals.wav".into()],
        );
        let out_dir = temp_dir.path().join("sep");
        assert_eq!(ok.isolate(&input, &out_dir).unwrap(), out_dir.join("vocals.wav"));

        let silent = CommandIsolator::new("sh", vec!["-c".into(), "true".into()]);
        assert!(matches!(
            silent.isolate(&input, &temp_dir.path().join("empty")),
            Err(CollaboratorError::OutputNotFound(_))
        ));

        let failing = CommandIsolator::new("sh", vec!["-c".into(), "exit 3".into()]);
        assert!(matches!(
            failing.isolate(&input, &temp_dir.path().join("fail")),
            Err(CollaboratorError::IsolationFailed(_))
        ));
    }
}
