use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};

use anyhow::{Context, Result, bail};
use tracing::debug;

/// Where per-sequence byte streams go: one file per sequence inside a
/// directory, or one subprocess per sequence fed through its standard input.
#[derive(Debug, Clone)]
pub enum SequenceSink {
    Files { directory: PathBuf },
    Pipe { executable: PathBuf },
}

impl SequenceSink {
    /// Open the output for one sequence. `name` is the file name or the
    /// single argument handed to the subprocess.
    pub fn open(&self, name: &str) -> Result<SequenceWriter> {
        match self {
            SequenceSink::Files { directory } => {
                let path = directory.join(name);
                let file = File::create(&path)
                    .with_context(|| format!("unable to create {}", path.display()))?;
                Ok(SequenceWriter::File(BufWriter::new(file)))
            }
            SequenceSink::Pipe { executable } => {
                let mut child = Command::new(executable)
                    .arg(name)
                    .stdin(Stdio::piped())
                    .spawn()
                    .with_context(|| {
                        format!("unable to execute subprocess {}", executable.display())
                    })?;
                let stdin = child.stdin.take().context("subprocess has no standard input")?;
                debug!("spawned {} {name} (pid {})", executable.display(), child.id());
                Ok(SequenceWriter::Pipe { child, stdin: BufWriter::new(stdin) })
            }
        }
    }
}

/// A single open sequence output. The Rust runtime ignores `SIGPIPE`, so a
/// subprocess closing its input surfaces as a `BrokenPipe` write error here
/// rather than killing the emitter.
pub enum SequenceWriter {
    File(BufWriter<File>),
    Pipe { child: Child, stdin: BufWriter<ChildStdin> },
}

impl Write for SequenceWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            SequenceWriter::File(writer) => writer.write(buf),
            SequenceWriter::Pipe { stdin, .. } => stdin.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            SequenceWriter::File(writer) => writer.flush(),
            SequenceWriter::Pipe { stdin, .. } => stdin.flush(),
        }
    }
}

impl SequenceWriter {
    /// Flush and close the output. For subprocesses this waits for
    /// termination; a non-zero or signalled exit is fatal.
    pub fn finish(self) -> Result<()> {
        match self {
            SequenceWriter::File(mut writer) => {
                writer.flush().context("unable to flush sequence output")?;
                Ok(())
            }
            SequenceWriter::Pipe { mut child, stdin } => {
                drop(stdin);
                let status = child.wait().context("unable to wait for subprocess")?;
                if !status.success() {
                    bail!("subprocess (pid {}) exited with {status}", child.id());
                }
                Ok(())
            }
        }
    }
}
