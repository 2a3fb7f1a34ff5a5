//! `afina chat`: run one turn in-process and print its frames.

use afina_agent::{ChatRuntime, Frame};
use afina_config::AppConfig;
use afina_core::message::ConversationId;
use afina_files::{DocumentStore, validate_name};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

pub async fn run(
    config_path: &Path,
    chat_id: String,
    message: String,
    files: Vec<String>,
    raw: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        AppConfig::load_with_env(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    AFINA_API_KEY, OPENAI_API_KEY, OPENROUTER_API_KEY");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", config_path.display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let runtime = Arc::new(ChatRuntime::from_config(&config)?);
    let id = ConversationId::from(chat_id.as_str());
    let names = attach(runtime.files().store().as_ref(), &id, files).await?;

    let mut frames = runtime.process_turn(id, message, names);
    let mut stdout = std::io::stdout();
    while let Some(frame) = frames.recv().await {
        if raw {
            writeln!(stdout, "{}", serde_json::to_string(&frame)?)?;
            if let Some(error) = frame.error {
                return Err(error.into());
            }
            continue;
        }
        if let Some(error) = finish_or_print(&mut stdout, frame)? {
            return Err(error.into());
        }
    }

    Ok(())
}

/// Print a frame's content. Returns the error carried by a failed final frame.
fn finish_or_print(out: &mut impl Write, frame: Frame) -> std::io::Result<Option<String>> {
    if frame.done {
        writeln!(out)?;
        return Ok(frame.error);
    }
    write!(out, "{}", frame.content)?;
    out.flush()?;
    Ok(None)
}

/// Upload local paths into the chat's store and return the names to attach.
///
/// Arguments that are not existing files are taken as names of documents
/// already stored for the chat.
async fn attach(
    store: &dyn DocumentStore,
    id: &ConversationId,
    files: Vec<String>,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut names = Vec::with_capacity(files.len());
    for arg in files {
        let path = Path::new(&arg);
        if !path.is_file() {
            validate_name(&arg)?;
            names.push(arg);
            continue;
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("Unusable file name: {arg}"))?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        let stored = store.save(id, &name, &bytes).await?;
        tracing::info!(conversation_id = %id, file = %stored.name, size = stored.size, "Uploaded");
        names.push(stored.name);
    }
    Ok(names)
}
