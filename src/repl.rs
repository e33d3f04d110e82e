//! Interactive terminal session (`ra chat`).
//!
//! Plain lines are questions; lines starting with `/` are commands. Every
//! error is printed and the session carries on; only `/quit` or end of
//! input ends it.

use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::chat::Conversation;
use crate::models::{Role, Source};

/// Characters of chunk text shown per source.
const SOURCE_PREVIEW_CHARS: usize = 500;

const HELP: &str = "\
Ask a question about your papers, or use a command:
  /load                 load the index (or build it if none is persisted)
  /rebuild              rebuild the index from the papers directory
  /model [name]         show or select the model
  /temperature [0-1]    show or set the temperature
  /topk [1-10]          show or set how many chunks are retrieved
  /stream on|off        toggle streamed answers
  /stats                index statistics
  /sources              sources of the last answer
  /history              conversation so far
  /reset                clear the conversation
  /help                 this help
  /quit                 leave";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ask(String),
    Load,
    Rebuild,
    Model(Option<String>),
    Temperature(Option<String>),
    TopK(Option<String>),
    Stream(Option<String>),
    Stats,
    Sources,
    History,
    Reset,
    Help,
    Quit,
    Unknown(String),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Ask(line.to_string()));
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default().to_ascii_lowercase();
    let arg = parts
        .next()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    Some(match name.as_str() {
        "load" | "init" => Command::Load,
        "rebuild" => Command::Rebuild,
        "model" => Command::Model(arg),
        "temperature" | "temp" => Command::Temperature(arg),
        "topk" | "top_k" => Command::TopK(arg),
        "stream" => Command::Stream(arg),
        "stats" => Command::Stats,
        "sources" => Command::Sources,
        "history" => Command::History,
        "reset" | "clear" => Command::Reset,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    })
}

/// Render sources as numbered blocks with score, text preview and metadata.
pub fn render_sources(sources: &[Source]) -> String {
    if sources.is_empty() {
        return "No sources.\n".to_string();
    }
    let mut out = String::new();
    for (i, source) in sources.iter().enumerate() {
        out.push_str(&format!(
            "Source {} (Score: {:.3}) {}\n",
            i + 1,
            source.score,
            source.label()
        ));
        out.push_str(&preview(&source.text, SOURCE_PREVIEW_CHARS));
        out.push('\n');
        if let Some(meta) = &source.metadata {
            if let Ok(json) = serde_json::to_string(meta) {
                out.push_str(&format!("  {}\n", json));
            }
        }
        out.push('\n');
    }
    out
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Run the session until `/quit` or end of input.
pub async fn run<R, W>(conversation: &mut Conversation, input: R, out: &mut W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "Research Assistant. Type /help for commands.")?;
    if let Err(e) = conversation.load_index().await {
        writeln!(out, "Error: {}", e)?;
        writeln!(
            out,
            "Put your papers in {} and run /load.",
            conversation.index_stats().data_dir.display()
        )?;
    }

    let mut lines = input.lines();
    loop {
        write!(out, "\n> ")?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            writeln!(out)?;
            break;
        };
        let Some(command) = parse_command(&line) else {
            continue;
        };
        if command == Command::Quit {
            break;
        }
        handle(conversation, command, out).await?;
    }
    Ok(())
}

/// Execute one command. Only I/O errors on `out` are returned; everything
/// else is reported in the session.
async fn handle<W: Write>(
    conversation: &mut Conversation,
    command: Command,
    out: &mut W,
) -> std::io::Result<()> {
    match command {
        Command::Ask(question) => {
            let mut write_err = None;
            let result = conversation
                .submit(&question, |fragment| {
                    if write_err.is_none() {
                        if let Err(e) = write!(out, "{}", fragment).and_then(|_| out.flush()) {
                            write_err = Some(e);
                        }
                    }
                })
                .await;
            if let Some(e) = write_err {
                return Err(e);
            }
            writeln!(out)?;
            match result {
                Ok(turn) => {
                    let count = turn.sources.as_ref().map(Vec::len).unwrap_or_default();
                    writeln!(out, "\n({} sources, /sources to show them)", count)?;
                }
                Err(e) => writeln!(out, "Error: {}", e)?,
            }
        }
        Command::Load => match conversation.load_index().await {
            Ok(index) => writeln!(
                out,
                "Index loaded: {} documents, {} chunks.",
                index.document_count(),
                index.chunk_count()
            )?,
            Err(e) => writeln!(out, "Error: {}", e)?,
        },
        Command::Rebuild => {
            writeln!(out, "Rebuilding index...")?;
            match conversation.rebuild_index().await {
                Ok(index) => writeln!(
                    out,
                    "Index rebuilt: {} documents, {} chunks.",
                    index.document_count(),
                    index.chunk_count()
                )?,
                Err(e) => writeln!(out, "Error: {}", e)?,
            }
        }
        Command::Model(None) => writeln!(
            out,
            "Model: {} (available: {})",
            conversation.params().model,
            conversation.models().join(", ")
        )?,
        Command::Model(Some(name)) => match conversation.set_model(&name) {
            Ok(()) => writeln!(out, "Model set to {}.", name)?,
            Err(e) => writeln!(out, "Error: {}", e)?,
        },
        Command::Temperature(None) => {
            writeln!(out, "Temperature: {}", conversation.params().temperature)?
        }
        Command::Temperature(Some(value)) => {
            let result = value
                .parse::<f32>()
                .map_err(|_| format!("'{}' is not a number", value))
                .and_then(|t| conversation.set_temperature(t).map_err(|e| e.to_string()));
            match result {
                Ok(()) => writeln!(out, "Temperature set to {}.", conversation.params().temperature)?,
                Err(e) => writeln!(out, "Error: {}", e)?,
            }
        }
        Command::TopK(None) => writeln!(out, "Top-k: {}", conversation.params().top_k)?,
        Command::TopK(Some(value)) => {
            let result = value
                .parse::<usize>()
                .map_err(|_| format!("'{}' is not a whole number", value))
                .and_then(|k| conversation.set_top_k(k).map_err(|e| e.to_string()));
            match result {
                Ok(()) => writeln!(out, "Top-k set to {}.", conversation.params().top_k)?,
                Err(e) => writeln!(out, "Error: {}", e)?,
            }
        }
        Command::Stream(arg) => match arg.as_deref() {
            Some("on") => {
                conversation.set_streaming(true);
                writeln!(out, "Streaming on.")?;
            }
            Some("off") => {
                conversation.set_streaming(false);
                writeln!(out, "Streaming off.")?;
            }
            _ => writeln!(
                out,
                "Streaming is {}. Use /stream on|off.",
                if conversation.params().streaming { "on" } else { "off" }
            )?,
        },
        Command::Stats => write!(out, "{}", conversation.index_stats().render())?,
        Command::Sources => match conversation.last_sources() {
            Some(sources) => write!(out, "{}", render_sources(sources))?,
            None => writeln!(out, "No answer yet.")?,
        },
        Command::History => {
            if conversation.history().is_empty() {
                writeln!(out, "No messages yet.")?;
            }
            for turn in conversation.history() {
                let who = match turn.role {
                    Role::User => "you",
                    Role::Assistant => "assistant",
                };
                writeln!(out, "[{}] {}", who, turn.content)?;
            }
        }
        Command::Reset => {
            conversation.reset();
            writeln!(out, "Conversation cleared.")?;
        }
        Command::Help => writeln!(out, "{}", HELP)?,
        Command::Unknown(raw) => writeln!(out, "Unknown command: {}. Type /help.", raw)?,
        Command::Quit => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn parses_questions_and_commands() {
        assert_eq!(parse_command("   "), None);
        assert_eq!(
            parse_command(" What is priming? "),
            Some(Command::Ask("What is priming?".to_string()))
        );
        assert_eq!(parse_command("/rebuild"), Some(Command::Rebuild));
        assert_eq!(
            parse_command("/model gpt-4"),
            Some(Command::Model(Some("gpt-4".to_string())))
        );
        assert_eq!(parse_command("/model"), Some(Command::Model(None)));
        assert_eq!(
            parse_command("/TOPK  5"),
            Some(Command::TopK(Some("5".to_string())))
        );
        assert_eq!(parse_command("/quit"), Some(Command::Quit));
        assert_eq!(
            parse_command("/frobnicate"),
            Some(Command::Unknown("/frobnicate".to_string()))
        );
    }

    #[test]
    fn sources_render_with_score_preview_and_metadata() {
        let mut meta = BTreeMap::new();
        meta.insert("file_name".to_string(), "priming.pdf".to_string());
        meta.insert("page_label".to_string(), "7".to_string());
        let sources = vec![Source {
            score: 0.81234,
            text: "x".repeat(600),
            metadata: Some(meta),
        }];
        let text = render_sources(&sources);
        assert!(text.starts_with("Source 1 (Score: 0.812) priming.pdf p. 7\n"));
        assert!(text.contains(&format!("{}...", "x".repeat(500))));
        assert!(!text.contains(&"x".repeat(501)));
        assert!(text.contains(r#""file_name":"priming.pdf""#));
    }

    #[test]
    fn short_text_is_not_truncated() {
        assert_eq!(preview("short", 500), "short");
        assert_eq!(preview("héllo", 2), "hé...");
    }
}
