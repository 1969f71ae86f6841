use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chromalab_contracts::chat::{
    build_context, parse_intent, ChatMessage, Intent, CHAT_HELP_COMMANDS,
};
use chromalab_contracts::events::EventWriter;
use chromalab_contracts::identity::{DirectoryStore, StylistSession};
use chromalab_contracts::plan::brand_catalog;
use chromalab_contracts::{PhotoIngestor, TargetColor};
use chromalab_engine::{
    AutoPlanOrchestrator, AutoPlanPhase, ColoristCapability, DryrunCapability, GeminiCapability,
    PipelineEvent,
};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "chromalab", version, about = "Colorist assistant CLI")]
struct Cli {
    /// Directory for the account file, staged previews, and event logs.
    #[arg(long, global = true, default_value = ".chromalab")]
    data_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Signup(SignupArgs),
    Login(CredentialArgs),
    License(LicenseArgs),
    AutoPlan(AutoPlanArgs),
    Chat(ChatArgs),
    Inspire(InspireArgs),
    Edit(EditArgs),
    Research(ResearchArgs),
    Brands,
}

#[derive(Debug, Parser)]
struct SignupArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    name: String,
}

#[derive(Debug, Parser)]
struct CredentialArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
}

#[derive(Debug, Parser)]
struct LicenseArgs {
    #[arg(long)]
    uid: String,
    /// Location of the reviewed license document.
    #[arg(long)]
    url: Option<String>,
    /// Marks the account unverified instead of verified.
    #[arg(long)]
    revoke: bool,
}

#[derive(Debug, Parser)]
struct AutoPlanArgs {
    #[command(flatten)]
    credentials: CredentialArgs,
    #[arg(long)]
    photo: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    provider: String,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    credentials: CredentialArgs,
    #[arg(long)]
    photo: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    provider: String,
}

#[derive(Debug, Parser)]
struct InspireArgs {
    #[command(flatten)]
    credentials: CredentialArgs,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "3:4")]
    aspect_ratio: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "gemini")]
    provider: String,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[command(flatten)]
    credentials: CredentialArgs,
    #[arg(long)]
    photo: PathBuf,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "gemini")]
    provider: String,
}

#[derive(Debug, Parser)]
struct ResearchArgs {
    #[command(flatten)]
    credentials: CredentialArgs,
    #[arg(long)]
    query: String,
    #[arg(long, default_value = "gemini")]
    provider: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("chromalab error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Signup(args) => run_signup(&cli.data_dir, args),
        Command::Login(args) => run_login(&cli.data_dir, args),
        Command::License(args) => run_license(&cli.data_dir, args),
        Command::AutoPlan(args) => run_auto_plan(&cli.data_dir, args),
        Command::Chat(args) => run_chat(&cli.data_dir, args),
        Command::Inspire(args) => run_inspire(&cli.data_dir, args),
        Command::Edit(args) => run_edit(&cli.data_dir, args),
        Command::Research(args) => run_research(&cli.data_dir, args),
        Command::Brands => run_brands(),
    }
}

fn directory(data_dir: &Path) -> DirectoryStore {
    DirectoryStore::open(data_dir.join("directory.json"))
}

fn sign_in(data_dir: &Path, credentials: &CredentialArgs) -> Result<StylistSession> {
    directory(data_dir)
        .sign_in(&credentials.email, &credentials.password)
        .context("sign-in failed")
}

/// Professional operations are only available to license-verified stylists.
fn verified_session(data_dir: &Path, credentials: &CredentialArgs) -> Result<StylistSession> {
    let session = sign_in(data_dir, credentials)?;
    session
        .require_verified()
        .context("this operation requires a verified license")?;
    Ok(session)
}

fn capability_for(provider: &str) -> Result<Arc<dyn ColoristCapability>> {
    match provider {
        "gemini" => Ok(Arc::new(GeminiCapability::new())),
        "dryrun" => Ok(Arc::new(DryrunCapability)),
        other => bail!("unknown provider '{other}' (expected 'gemini' or 'dryrun')"),
    }
}

fn run_signup(data_dir: &Path, args: SignupArgs) -> Result<i32> {
    let session = directory(data_dir)
        .sign_up(&args.email, &args.password, &args.name)
        .context("sign-up failed")?;
    println!("created account {} ({})", session.uid, session.display_name);
    println!("license verification is pending; professional tools stay locked until it clears");
    Ok(0)
}

fn run_login(data_dir: &Path, args: CredentialArgs) -> Result<i32> {
    let session = sign_in(data_dir, &args)?;
    let status = if session.verified {
        "license verified"
    } else {
        "license pending review"
    };
    println!("signed in as {} ({}), {status}", session.display_name, session.uid);
    Ok(0)
}

fn run_license(data_dir: &Path, args: LicenseArgs) -> Result<i32> {
    let record = directory(data_dir)
        .update_license_status(&args.uid, args.url.as_deref(), !args.revoke)
        .context("license update failed")?;
    println!(
        "{} is now {}",
        record.email,
        if record.is_verified {
            "verified"
        } else {
            "unverified"
        }
    );
    Ok(0)
}

fn run_brands() -> Result<i32> {
    for (brand, shades) in brand_catalog() {
        println!("{brand}: {}", shades.join(", "));
    }
    Ok(0)
}

fn build_orchestrator(
    data_dir: &Path,
    capability: Arc<dyn ColoristCapability>,
    events: Option<&PathBuf>,
    session: &StylistSession,
) -> AutoPlanOrchestrator {
    let path = events
        .cloned()
        .unwrap_or_else(|| data_dir.join("events.jsonl"));
    AutoPlanOrchestrator::new(capability).with_event_writer(EventWriter::new(path, &session.uid))
}

/// Runs the full pipeline once and prints each phase as it lands. Returns
/// `true` only when the run ends in the done phase.
fn drive_pipeline(
    orchestrator: &AutoPlanOrchestrator,
    data_dir: &Path,
    photo: &Path,
) -> Result<bool> {
    let ingestor = PhotoIngestor::new(data_dir.join("previews"));
    let photo = match ingestor.ingest(Some(photo)) {
        Ok(photo) => photo,
        Err(err) => {
            eprintln!("{}", err.user_message());
            return Ok(false);
        }
    };

    let events = orchestrator.subscribe();
    let handle = orchestrator.run_auto_plan(photo);
    while let Ok(event) = events.recv() {
        match event {
            PipelineEvent::PhaseChanged { phase, .. } => {
                println!("[{}]", phase.label());
                match phase {
                    AutoPlanPhase::Done => break,
                    AutoPlanPhase::Error { message } => {
                        eprintln!("{message}");
                        break;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
    handle.join().ok();
    Ok(matches!(orchestrator.snapshot().phase, AutoPlanPhase::Done))
}

fn print_session_state(orchestrator: &AutoPlanOrchestrator) -> Result<()> {
    let snapshot = orchestrator.snapshot();
    if let Some(analysis) = &snapshot.analysis {
        println!("hair analysis:");
        println!("{}", serde_json::to_string_pretty(analysis)?);
    }
    if let Some(plan) = &snapshot.plan {
        println!(
            "color plan{}:",
            if snapshot.auto_planned {
                " (auto target)"
            } else {
                ""
            }
        );
        println!("{}", serde_json::to_string_pretty(plan)?);
    }
    Ok(())
}

fn run_auto_plan(data_dir: &Path, args: AutoPlanArgs) -> Result<i32> {
    let session = verified_session(data_dir, &args.credentials)?;
    let capability = capability_for(&args.provider)?;
    let orchestrator = build_orchestrator(data_dir, capability, args.events.as_ref(), &session);

    if !drive_pipeline(&orchestrator, data_dir, &args.photo)? {
        return Ok(1);
    }
    print_session_state(&orchestrator)?;
    Ok(0)
}

fn run_chat(data_dir: &Path, args: ChatArgs) -> Result<i32> {
    let session = verified_session(data_dir, &args.credentials)?;
    let capability = capability_for(&args.provider)?;
    let orchestrator = build_orchestrator(
        data_dir,
        Arc::clone(&capability),
        args.events.as_ref(),
        &session,
    );

    if !drive_pipeline(&orchestrator, data_dir, &args.photo)? {
        return Ok(1);
    }
    print_session_state(&orchestrator)?;
    println!("assistant ready; {} for commands", CHAT_HELP_COMMANDS[0]);

    let stdin = io::stdin();
    let mut history: Vec<ChatMessage> = Vec::new();
    let mut target: Option<TargetColor> = None;
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        match parse_intent(&line) {
            Intent::Quit => break,
            Intent::Noop => {
                if !line.trim().is_empty() {
                    println!("unrecognized command; {} lists the commands", CHAT_HELP_COMMANDS[0]);
                }
            }
            Intent::Help => {
                println!("commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            Intent::ShowPlan => match &orchestrator.snapshot().plan {
                Some(plan) => println!("{}", serde_json::to_string_pretty(plan)?),
                None => println!("no plan recorded"),
            },
            Intent::ShowAnalysis => match &orchestrator.snapshot().analysis {
                Some(analysis) => println!("{}", serde_json::to_string_pretty(analysis)?),
                None => println!("no analysis recorded"),
            },
            Intent::SetTarget { args } => match resolve_target(&args) {
                Ok(resolved) => {
                    println!("target set to {resolved}");
                    target = Some(resolved);
                }
                Err(err) => println!("{err:#}"),
            },
            Intent::Regenerate => match &target {
                Some(target) => match orchestrator.regenerate_plan(target) {
                    Ok(plan) => println!("{}", serde_json::to_string_pretty(&plan)?),
                    Err(err) => println!("{}", err.user_message()),
                },
                None => println!("choose a target first with /target"),
            },
            Intent::Reanalyze { photo } => match &target {
                Some(target) => {
                    let ingestor = PhotoIngestor::new(data_dir.join("previews"));
                    match ingestor.ingest(Some(Path::new(&photo))) {
                        Ok(photo) => match orchestrator.reanalyze_photo(photo, target) {
                            Ok(()) => print_session_state(&orchestrator)?,
                            Err(err) => println!("{}", err.user_message()),
                        },
                        Err(err) => println!("{}", err.user_message()),
                    }
                }
                None => println!("choose a target first with /target"),
            },
            Intent::Ask { text } => {
                let snapshot = orchestrator.snapshot();
                let Some(plan) = &snapshot.plan else {
                    println!("no plan recorded; the assistant needs a completed plan");
                    continue;
                };
                history.push(ChatMessage::user(&text));
                let context = build_context(plan, snapshot.analysis.as_ref(), &history);
                match capability.chat(&context.history, &context) {
                    Ok(reply) => {
                        println!("{reply}");
                        history.push(ChatMessage::model(reply));
                    }
                    Err(err) => {
                        history.pop();
                        println!("assistant request failed: {err:#}");
                    }
                }
            }
        }
    }
    Ok(0)
}

/// `/target` arguments resolve as a single `#RRGGBB` value or as a catalog
/// pair with the shade last, so multi-word brand names work unquoted too.
fn resolve_target(args: &[String]) -> Result<TargetColor> {
    match args {
        [] => bail!("usage: /target <brand> <shade> or /target #RRGGBB"),
        [single] if single.starts_with('#') => {
            TargetColor::hex(single).map_err(|err| anyhow::anyhow!(err))
        }
        [_single] => bail!("usage: /target <brand> <shade> or /target #RRGGBB"),
        [brand_words @ .., shade] => {
            let brand = brand_words.join(" ");
            TargetColor::catalog(&brand, shade).map_err(|err| anyhow::anyhow!(err))
        }
    }
}

fn run_inspire(data_dir: &Path, args: InspireArgs) -> Result<i32> {
    verified_session(data_dir, &args.credentials)?;
    let capability = capability_for(&args.provider)?;
    let bytes = capability.generate_image(&args.prompt, &args.aspect_ratio)?;
    write_image(&bytes, &args.out)?;
    println!("wrote {}", args.out.display());
    Ok(0)
}

fn run_edit(data_dir: &Path, args: EditArgs) -> Result<i32> {
    verified_session(data_dir, &args.credentials)?;
    let capability = capability_for(&args.provider)?;
    let ingestor = PhotoIngestor::new(data_dir.join("previews"));
    let photo = match ingestor.ingest(Some(&args.photo)) {
        Ok(photo) => photo,
        Err(err) => {
            eprintln!("{}", err.user_message());
            return Ok(1);
        }
    };
    let bytes = capability.edit_image(&photo.bytes, &photo.content_type, &args.prompt)?;
    write_image(&bytes, &args.out)?;
    println!("wrote {}", args.out.display());
    Ok(0)
}

fn run_research(data_dir: &Path, args: ResearchArgs) -> Result<i32> {
    verified_session(data_dir, &args.credentials)?;
    let capability = capability_for(&args.provider)?;
    let answer = capability.search_with_grounding(&args.query)?;
    println!("{}", answer.text);
    if !answer.sources.is_empty() {
        println!();
        println!("sources:");
        for source in &answer.sources {
            println!("  {} <{}>", source.title, source.uri);
        }
    }
    Ok(0)
}

/// Re-encodes the generated image to the format the output extension asks
/// for; raw bytes are written as-is when the extension matches no encoder.
fn write_image(bytes: &[u8], out: &Path) -> Result<()> {
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let decoded = image::load_from_memory(bytes);
    match (decoded, image::ImageFormat::from_path(out)) {
        (Ok(decoded), Ok(format)) => decoded
            .save_with_format(out, format)
            .with_context(|| format!("could not encode {}", out.display()))?,
        _ => std::fs::write(out, bytes)
            .with_context(|| format!("could not write {}", out.display()))?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_resolution_accepts_hex_and_catalog_forms() {
        let hex = resolve_target(&["#b66fb3".to_string()]).unwrap();
        assert_eq!(hex, TargetColor::Hex("#B66FB3".to_string()));

        let catalog = resolve_target(&[
            "Wella".to_string(),
            "Koleston".to_string(),
            "Perfect".to_string(),
            "8/81".to_string(),
        ])
        .unwrap();
        assert_eq!(catalog.to_string(), "Wella Koleston Perfect 8/81");
    }

    #[test]
    fn target_resolution_rejects_unknown_and_empty_input() {
        assert!(resolve_target(&[]).is_err());
        assert!(resolve_target(&["8/81".to_string()]).is_err());
        assert!(resolve_target(&["Acme".to_string(), "1A".to_string()]).is_err());
    }
}
