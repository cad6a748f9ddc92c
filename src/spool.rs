//! Sandbox backed by a spool directory. Each sandbox is one HTML file that an
//! external print command picks up.

use crate::error::PrintError;
use crate::sandbox::{LoadSignal, OutputSignal, Sandbox, SandboxDocument, SandboxId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

pub struct DirectorySandbox {
    dir: PathBuf,
    print_command: Option<Vec<String>>,
    keep_files: bool,
    next_id: u64,
    attached: BTreeMap<SandboxId, Option<PathBuf>>,
}

impl DirectorySandbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            print_command: None,
            keep_files: false,
            next_id: 0,
            attached: BTreeMap::new(),
        }
    }

    /// Program and leading arguments; the document path is appended.
    pub fn with_print_command(mut self, command: Vec<String>) -> Self {
        self.print_command = if command.is_empty() { None } else { Some(command) };
        self
    }

    /// Splits a command line on whitespace.
    pub fn with_print_command_line(self, line: &str) -> Self {
        self.with_print_command(line.split_whitespace().map(str::to_string).collect())
    }

    /// Leaves documents on disk after teardown.
    pub fn with_keep_files(mut self, keep: bool) -> Self {
        self.keep_files = keep;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn document_path(&self, id: SandboxId) -> Option<&Path> {
        self.attached.get(&id).and_then(|path| path.as_deref())
    }

    fn file_name(id: SandboxId) -> String {
        format!("isoprint-{}.html", id.0)
    }
}

impl Sandbox for DirectorySandbox {
    fn create(&mut self) -> Result<SandboxId, PrintError> {
        std::fs::create_dir_all(&self.dir)?;
        self.next_id += 1;
        let id = SandboxId(self.next_id);
        self.attached.insert(id, None);
        Ok(id)
    }

    fn populate(
        &mut self,
        id: SandboxId,
        document: &SandboxDocument,
    ) -> Result<LoadSignal, PrintError> {
        if !self.attached.contains_key(&id) {
            return Err(PrintError::UnknownSandbox(id));
        }
        let path = self.dir.join(Self::file_name(id));
        std::fs::write(&path, document.html.as_bytes())?;
        debug!(sandbox = %id, path = %path.display(), bytes = document.html.len(), "document spooled");
        self.attached.insert(id, Some(path));
        Ok(LoadSignal::ready())
    }

    fn trigger_output(&mut self, id: SandboxId) -> Result<OutputSignal, PrintError> {
        let Some(Some(path)) = self.attached.get(&id) else {
            return Err(PrintError::UnknownSandbox(id));
        };
        let Some((program, args)) = self
            .print_command
            .as_ref()
            .and_then(|command| command.split_first())
        else {
            info!(sandbox = %id, path = %path.display(), "document ready; no print command configured");
            return Ok(OutputSignal::none());
        };

        let mut child = Command::new(program)
            .args(args)
            .arg(path)
            .spawn()
            .map_err(|err| PrintError::PrintCommand(format!("{program}: {err}")))?;
        info!(sandbox = %id, program = %program, "print command started");

        // A clean exit of the print command is the only completion signal
        // this platform has.
        let (tx, signal) = OutputSignal::channel();
        let program = program.clone();
        std::thread::spawn(move || match child.wait() {
            Ok(status) if status.success() => {
                let _ = tx.send(());
            }
            Ok(status) => warn!(program = %program, %status, "print command exited unsuccessfully"),
            Err(err) => warn!(program = %program, error = %err, "print command could not be awaited"),
        });
        Ok(signal)
    }

    fn destroy(&mut self, id: SandboxId) -> bool {
        let Some(path) = self.attached.remove(&id) else {
            return false;
        };
        if let Some(path) = path {
            if !self.keep_files {
                if let Err(err) = std::fs::remove_file(&path) {
                    warn!(sandbox = %id, path = %path.display(), error = %err, "spooled document not removed");
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobKind;
    use crate::sandbox::SandboxContext;
    use crate::types::{Margins, PageSize};
    use std::time::Duration;

    fn document() -> SandboxDocument {
        SandboxDocument {
            kind: JobKind::Label,
            title: "B-001".to_string(),
            html: "<html><body>B-001</body></html>".to_string(),
            page: PageSize::label_80x40(),
            margins: Margins::zero(),
        }
    }

    #[tokio::test]
    async fn populate_writes_and_destroy_removes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sandbox = DirectorySandbox::new(dir.path().join("spool"));
        let (mut context, load) = SandboxContext::open(&mut sandbox, &document()).expect("open");
        load.wait(Duration::from_millis(10)).await.expect("loaded");

        let path = sandbox.document_path(context.id()).expect("spooled").to_path_buf();
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("isoprint-1.html"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), document().html);

        let signal = context.trigger_output(&mut sandbox).expect("trigger");
        assert!(!signal.is_supported());
        assert!(context.teardown(&mut sandbox));
        assert!(!path.exists());
        assert!(!sandbox.destroy(context.id()));
    }

    #[tokio::test]
    async fn kept_files_survive_teardown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sandbox = DirectorySandbox::new(dir.path()).with_keep_files(true);
        let (mut context, _load) = SandboxContext::open(&mut sandbox, &document()).expect("open");
        let path = sandbox.document_path(context.id()).expect("spooled").to_path_buf();
        context.teardown(&mut sandbox);
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_print_command_acknowledges() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sandbox = DirectorySandbox::new(dir.path()).with_print_command_line("true --ignored");
        let (mut context, _load) = SandboxContext::open(&mut sandbox, &document()).expect("open");
        let signal = context.trigger_output(&mut sandbox).expect("trigger");
        assert!(signal.is_supported());
        assert!(signal.wait(Duration::from_secs(10)).await);
        context.teardown(&mut sandbox);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_print_command_never_acknowledges() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sandbox = DirectorySandbox::new(dir.path()).with_print_command_line("false");
        let (mut context, _load) = SandboxContext::open(&mut sandbox, &document()).expect("open");
        let signal = context.trigger_output(&mut sandbox).expect("trigger");
        assert!(!signal.wait(Duration::from_millis(200)).await);
        context.teardown(&mut sandbox);
    }

    #[test]
    fn missing_program_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sandbox = DirectorySandbox::new(dir.path())
            .with_print_command(vec!["isoprint-no-such-program".to_string()]);
        let (mut context, _load) = SandboxContext::open(&mut sandbox, &document()).expect("open");
        let err = context.trigger_output(&mut sandbox).expect_err("spawn fails");
        assert!(matches!(err, PrintError::PrintCommand(_)));
        assert!(context.teardown(&mut sandbox));
    }

    #[test]
    fn populate_of_unknown_sandbox_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sandbox = DirectorySandbox::new(dir.path());
        let err = sandbox.populate(SandboxId(9), &document()).expect_err("unknown");
        assert!(matches!(err, PrintError::UnknownSandbox(SandboxId(9))));
    }
}
