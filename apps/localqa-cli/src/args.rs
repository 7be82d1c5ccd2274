use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};

pub const USAGE: &str = "Usage: localqa <command> [args...]

Commands:
  ingest [DIR]                 index every supported file under DIR (default: data.data_dir)
  ask \"<question>\" [--top-k N] answer a question from the indexed documents
  chat [--top-k N]             interactive question loop
  stats                        show collection statistics
  delete <SOURCE>              remove one source's entries from the collection
  health                       check that the model service is reachable and both models are installed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ingest { dir: Option<PathBuf> },
    Ask { question: String, top_k: Option<usize> },
    Chat { top_k: Option<usize> },
    Stats,
    Delete { source: String },
    Health,
    Help,
}

pub fn parse_args(args: &[String]) -> Result<Command> {
    let Some((cmd, rest)) = args.split_first() else {
        return Ok(Command::Help);
    };
    match cmd.as_str() {
        "ingest" => {
            let mut dir = None;
            for arg in rest {
                if arg.starts_with('-') {
                    bail!("unknown flag for ingest: {arg}");
                }
                dir = Some(PathBuf::from(arg));
            }
            Ok(Command::Ingest { dir })
        }
        "ask" => {
            let (positional, top_k) = split_top_k(rest)?;
            if positional.is_empty() {
                bail!("Usage: localqa ask \"<question>\" [--top-k N]");
            }
            Ok(Command::Ask { question: positional.join(" "), top_k })
        }
        "chat" => {
            let (positional, top_k) = split_top_k(rest)?;
            if let Some(extra) = positional.first() {
                bail!("unexpected argument for chat: {extra}");
            }
            Ok(Command::Chat { top_k })
        }
        "stats" => Ok(Command::Stats),
        "delete" => {
            let source = rest.first().cloned().ok_or_else(|| anyhow!("Usage: localqa delete <SOURCE>"))?;
            Ok(Command::Delete { source })
        }
        "health" => Ok(Command::Health),
        "help" | "-h" | "--help" => Ok(Command::Help),
        other => bail!("Unknown command: {other}"),
    }
}

fn split_top_k(args: &[String]) -> Result<(Vec<String>, Option<usize>)> {
    let mut positional = Vec::new();
    let mut top_k = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--top-k" | "-k" => {
                let value = args.get(i + 1).ok_or_else(|| anyhow!("--top-k requires a number"))?;
                top_k = Some(value.parse::<usize>().map_err(|_| anyhow!("--top-k requires a number, got '{value}'"))?);
                i += 1;
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }
    Ok((positional, top_k))
}
