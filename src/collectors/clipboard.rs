use super::command::{decode_cmd_stdout, run_first_available};
use super::{Probe, ProbeError, ProbeKind, Sample};
use crate::state::ClipboardSample;
use tracing::debug;

pub trait ClipboardSource: Send {
    fn read_text(&mut self) -> Result<String, ProbeError>;
}

/// Reads the system clipboard through whichever desktop tool is installed.
pub struct ClipboardCommand;

#[cfg(target_os = "linux")]
const READERS: &[(&str, &[&str])] = &[
    ("wl-paste", &["--no-newline"]),
    ("xclip", &["-selection", "clipboard", "-o"]),
    ("xsel", &["-b", "-o"]),
];

#[cfg(target_os = "macos")]
const READERS: &[(&str, &[&str])] = &[("pbpaste", &[])];

#[cfg(target_os = "windows")]
const READERS: &[(&str, &[&str])] = &[(
    "powershell",
    &["-NoProfile", "-NonInteractive", "-Command", "Get-Clipboard -Raw"],
)];

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const READERS: &[(&str, &[&str])] = &[];

/// Messages the readers print when the clipboard is simply empty or holds
/// no text. These exit non-zero but are not failures.
const EMPTY_MARKERS: &[&str] = &[
    "nothing is copied",
    "no selection",
    "not available",
    "no suitable type",
];

#[derive(Debug, PartialEq)]
enum ReaderOutcome {
    Text(String),
    Empty,
    Failed,
}

fn classify(success: bool, stdout: &[u8], stderr: &[u8]) -> ReaderOutcome {
    if success {
        return ReaderOutcome::Text(decode_cmd_stdout(stdout));
    }
    let stderr = String::from_utf8_lossy(stderr).to_lowercase();
    if EMPTY_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        ReaderOutcome::Empty
    } else {
        ReaderOutcome::Failed
    }
}

impl ClipboardSource for ClipboardCommand {
    fn read_text(&mut self) -> Result<String, ProbeError> {
        for &(program, args) in READERS {
            let Some(output) = run_first_available(&[program], args)? else {
                continue;
            };
            match classify(output.status.success(), &output.stdout, &output.stderr) {
                ReaderOutcome::Text(text) => return Ok(text),
                ReaderOutcome::Empty => return Ok(String::new()),
                ReaderOutcome::Failed => {
                    // no display, or the tool is broken
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    debug!(program, status = %output.status, stderr = %stderr.trim(), "clipboard reader failed");
                }
            }
        }
        Err(ProbeError::Unavailable(
            "no working clipboard reader".to_string(),
        ))
    }
}

/// Never fails: an unreadable clipboard becomes the failure sentinel.
pub struct ClipboardProbe<S> {
    source: S,
}

impl<S: ClipboardSource> ClipboardProbe<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: ClipboardSource> Probe for ClipboardProbe<S> {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Clipboard
    }

    fn sample(&mut self) -> Result<Sample, ProbeError> {
        let sample = match self.source.read_text() {
            Ok(text) => ClipboardSample::Text(text),
            Err(err) => {
                debug!(error = %err, "clipboard unreadable");
                ClipboardSample::Unavailable
            }
        };
        Ok(Sample::Clipboard(sample))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Result<String, ProbeError>);

    impl ClipboardSource for Canned {
        fn read_text(&mut self) -> Result<String, ProbeError> {
            self.0.clone()
        }
    }

    fn clip(sample: Sample) -> ClipboardSample {
        match sample {
            Sample::Clipboard(v) => v,
            other => panic!("unexpected sample {other:?}"),
        }
    }

    #[test]
    fn text_is_passed_through_verbatim() {
        let mut probe = ClipboardProbe::new(Canned(Ok("  two\nlines ".to_string())));
        assert_eq!(
            clip(probe.sample().expect("clipboard")),
            ClipboardSample::Text("  two\nlines ".to_string())
        );
    }

    #[test]
    fn empty_clipboard_is_empty_text() {
        let mut reader = ClipboardProbe::new(Canned(Ok(String::new())));
        assert_eq!(
            clip(reader.sample().expect("clipboard")),
            ClipboardSample::Text(String::new())
        );
    }

    #[test]
    fn reader_exit_status_is_classified_by_stderr() {
        assert_eq!(
            classify(true, b"copied", b""),
            ReaderOutcome::Text("copied".to_string())
        );
        assert_eq!(
            classify(false, b"", b"Nothing is copied\n"),
            ReaderOutcome::Empty
        );
        assert_eq!(
            classify(false, b"", b"Error: target STRING not available\n"),
            ReaderOutcome::Empty
        );
        assert_eq!(
            classify(false, b"", b"Error: Can't open display: (null)\n"),
            ReaderOutcome::Failed
        );
        assert_eq!(classify(false, b"", b""), ReaderOutcome::Failed);
    }

    #[test]
    fn unreadable_clipboard_becomes_sentinel() {
        let mut probe = ClipboardProbe::new(Canned(Err(ProbeError::PermissionDenied(
            "display locked".to_string(),
        ))));
        let sample = clip(probe.sample().expect("clipboard never fails"));
        assert_eq!(sample, ClipboardSample::Unavailable);
        assert_eq!(sample.as_str(), "Clipboard access failed");
    }
}
