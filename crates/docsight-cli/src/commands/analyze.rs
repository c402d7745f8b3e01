use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use console::style;
use docsight::action::{self, Action};
use docsight::assembler::{assemble, Assembler};
use docsight::transport;
use docsight::validator::RawRequest;

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Text file holding the extracted document
    pub file: PathBuf,

    /// Action to run (summarize, extractTags, riskScan)
    #[arg(short, long, value_parser = parse_action)]
    pub action: Action,

    /// Base URL of the docsight server
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    pub server: String,

    /// Also write the final text to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

fn parse_action(id: &str) -> Result<Action, String> {
    action::lookup(id)
        .map(|definition| definition.id)
        .map_err(|e| format!("{} '{}'", e, id))
}

pub async fn execute(args: AnalyzeArgs) -> Result<()> {
    eprintln!(
        "{} {} {}",
        style("Analyzing").dim(),
        args.file.display(),
        style(format!("({})", args.action.label())).dim()
    );

    let stdout = io::stdout();
    let text = match run(&args, stdout.lock()).await {
        Ok(text) => text,
        Err(e) => {
            eprintln!("\n{} {:#}", style("error:").red().bold(), e);
            return Err(e);
        }
    };

    if let Some(output) = &args.output {
        write_output(output, &text)?;
        eprintln!("{} {}", style("Saved to").dim(), output.display());
    }
    Ok(())
}

/// Submit the file, render text to `out` as it arrives and return the final
/// message text.
async fn run<W: Write>(args: &AnalyzeArgs, out: W) -> Result<String> {
    let document = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    let url = format!("{}/api/chat", args.server.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .json(&RawRequest::new(document, args.action.as_ref()))
        .send()
        .await
        .with_context(|| format!("failed to reach {}", url))?;

    let status = response.status();
    if !status.is_success() {
        let reason = response.text().await.unwrap_or_default();
        bail!("server rejected the request ({}): {}", status, reason);
    }

    let mut printer = ProgressPrinter::new(out);
    let mut assembler = Assembler::new();
    let parts = transport::decode(response.bytes_stream());
    let result = assemble(parts, &mut assembler, |message| printer.update(message.text())).await;
    printer.finish()?;

    let id = result.context("analysis did not complete")?;
    let message = assembler
        .take(id)
        .context("assembled message went missing")?;
    Ok(message.text().to_string())
}

/// Writes only the part of a growing text that was not printed yet.
struct ProgressPrinter<W: Write> {
    out: W,
    printed: usize,
    error: Option<io::Error>,
}

impl<W: Write> ProgressPrinter<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            printed: 0,
            error: None,
        }
    }

    fn update(&mut self, text: &str) {
        if self.error.is_some() || text.len() <= self.printed {
            return;
        }
        let result = self
            .out
            .write_all(text[self.printed..].as_bytes())
            .and_then(|_| self.out.flush());
        match result {
            Ok(()) => self.printed = text.len(),
            Err(e) => self.error = Some(e),
        }
    }

    fn finish(mut self) -> io::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        if self.printed > 0 {
            writeln!(self.out)?;
        }
        self.out.flush()
    }
}

fn write_output(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}
