//! `forge` - SceneForge command line
//!
//! `serve` speaks the event channel as JSON lines: one [`ClientMessage`] per
//! stdin line in, one [`RequestEvent`] per stdout line out. Logs go to stderr.
//!
//! Only `serve` and `reset` touch per-request scratch space, so one-shot
//! commands can run beside a live server on the same data root.

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use forge_core::{
    ClientId, ClientMessage, ForgeConfig, RenderOrchestrator, RequestEvent, ServerEvent,
    Session, SyncRenderRequest,
};
use forge_llm::OpenAiCompatibleClient;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("forge")
        .version(forge_core::VERSION)
        .about("SceneForge render-job orchestration engine")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("data-root")
                .long("data-root")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Override the data root directory"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON on stderr"),
        )
        .subcommand(
            Command::new("serve")
                .about("Serve the event channel over stdin/stdout (JSON lines)")
                .arg(
                    Arg::new("client")
                        .long("client")
                        .help("Client identity; generated when omitted"),
                ),
        )
        .subcommand(
            Command::new("prompt")
                .about("Run one natural-language request and stream its events")
                .arg(Arg::new("text").required(true).num_args(1..)),
        )
        .subcommand(
            Command::new("render")
                .about("Render a scene file synchronously")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(Arg::new("client").long("client").help("Preemption scope")),
        )
        .subcommand(Command::new("health").about("Print the liveness status"))
        .subcommand(
            Command::new("reset")
                .about("Delete cache, history, current scene and rendered media (irreversible)"),
        )
        .subcommand(Command::new("context").about("Print the conversation context report"))
        .subcommand(
            Command::new("suggest")
                .about("Suggest short edits for a scene file")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("count")
                        .long("count")
                        .default_value("5")
                        .value_parser(value_parser!(usize)),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<ForgeConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ForgeConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ForgeConfig::default(),
    };
    let mut config = config.apply_env()?;
    if let Some(root) = matches.get_one::<PathBuf>("data-root") {
        config.data_root.clone_from(root);
    }
    Ok(config)
}

async fn open_engine(config: ForgeConfig) -> anyhow::Result<Arc<RenderOrchestrator>> {
    let backend = OpenAiCompatibleClient::new(config.llm.clone())?;
    let engine = RenderOrchestrator::open(config, Arc::new(backend)).await?;
    Ok(Arc::new(engine))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));
    let engine = open_engine(load_config(&matches)?).await?;

    let ok = match matches.subcommand() {
        Some(("serve", args)) => {
            let client = args
                .get_one::<String>("client")
                .map_or_else(ClientId::generate, |c| ClientId::new(c.as_str()));
            serve(&engine, client).await?;
            true
        }
        Some(("prompt", args)) => {
            let text = args
                .get_many::<String>("text")
                .map(|words| words.cloned().collect::<Vec<_>>().join(" "))
                .unwrap_or_default();
            run_prompt(&engine, text).await?
        }
        Some(("render", args)) => {
            let file = args
                .get_one::<PathBuf>("file")
                .context("missing scene file")?;
            let code = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let mut request = SyncRenderRequest::new(code);
            if let Some(client) = args.get_one::<String>("client") {
                request = request.with_client(ClientId::new(client.as_str()));
            }
            let response = engine.render_sync(request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            response.is_success()
        }
        Some(("health", _)) => {
            println!("{}", serde_json::to_string_pretty(&engine.health())?);
            true
        }
        Some(("reset", _)) => {
            engine.reset().await?;
            println!("{}", serde_json::json!({ "status": "reset" }));
            true
        }
        Some(("context", _)) => {
            let report = engine.context_report().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            true
        }
        Some(("suggest", args)) => {
            let file = args
                .get_one::<PathBuf>("file")
                .context("missing scene file")?;
            let count = args.get_one::<usize>("count").copied().unwrap_or(5);
            let code = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let suggestions = engine.suggestions(&code, count).await;
            println!("{}", serde_json::json!({ "suggestions": suggestions }));
            true
        }
        _ => true,
    };

    engine.shutdown();
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// One request; returns whether it succeeded
async fn run_prompt(engine: &Arc<RenderOrchestrator>, text: String) -> anyhow::Result<bool> {
    let mut events = engine.submit(ClientId::generate(), ClientMessage::Prompt { prompt: text });
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        write_event(&mut stdout, &event).await?;
        if event.is_terminal() {
            return Ok(matches!(event.event, ServerEvent::Result { .. }));
        }
    }
    Ok(false)
}

/// JSON-lines event channel for a single client
async fn serve(engine: &Arc<RenderOrchestrator>, client: ClientId) -> anyhow::Result<()> {
    engine.sweep_scratch().await?;
    let (mut session, mut events) = Session::open(Arc::clone(engine), client);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = events.recv().await {
            if let Err(e) = write_event(&mut stdout, &event).await {
                tracing::error!("cannot write event: {e}");
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                engine.shutdown();
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ClientMessage>(&line) {
            Ok(message) => {
                let id = session.dispatch(message);
                tracing::debug!(request = %id, in_flight = session.in_flight(), "message accepted");
            }
            Err(e) => {
                session.reject(e.to_string());
            }
        }
    }

    session.close().await;
    writer.await?;
    Ok(())
}

async fn write_event<W>(out: &mut W, event: &RequestEvent) -> anyhow::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let matches = cli()
            .try_get_matches_from(["forge", "suggest", "scene.py", "--count", "3", "--json-logs"])
            .unwrap();
        assert!(matches.get_flag("json-logs"));
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "suggest");
        assert_eq!(args.get_one::<usize>("count"), Some(&3));
    }

    #[tokio::test]
    async fn events_are_written_one_per_line() {
        let request_id = forge_core::RequestId::new();
        let mut out = Vec::new();
        for event in [
            ServerEvent::progress(forge_core::ProgressStep::Init, "starting"),
            ServerEvent::error("invalid message", Some("expected value".into())),
        ] {
            write_event(&mut out, &RequestEvent { request_id, event })
                .await
                .unwrap();
        }
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["request_id"], serde_json::json!(request_id));
        }
    }

    #[test]
    fn data_root_flag_overrides_config() {
        let matches = cli()
            .try_get_matches_from(["forge", "--data-root", "/tmp/forge", "health"])
            .unwrap();
        let config = load_config(&matches).unwrap();
        assert_eq!(config.data_root, PathBuf::from("/tmp/forge"));
    }
}
