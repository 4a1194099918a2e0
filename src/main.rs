// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use realty_portal::chat::{assign_thread, latest_reply, save_message, save_new_replies, send_and_wait, thread_for_buyer};
use realty_portal::entities::{all_realtors, find_realtor_by_email};
use realty_portal::{
    complete_buyer_step, create_realtor, export_roster_csv, get_buyer, import_legacy_file,
    open_database, realtor_roster, sign_up_buyer, AssistantApi, BuyerStep, ChatMessage, ChatRole,
    Config, InviteRegistry, OpenAiAssistant, SignupRequest,
};

#[derive(Parser, Debug)]
#[command(name = "realty-portal", author, version, about = "Realtor invite and buyer onboarding portal")]
struct Cli {
    /// Database path (overrides PORTAL_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema
    Init,

    /// Manage realtor accounts
    #[command(subcommand)]
    Realtor(RealtorCommand),

    /// Create, check and consume invite codes
    #[command(subcommand)]
    Invite(InviteCommand),

    /// Sign up a buyer with an invite code
    Signup {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        code: String,
    },

    /// Mark a guided step complete for a buyer
    Step { buyer_id: String, step: u8 },

    /// Show a realtor's buyers and pending invites
    Roster { realtor: String },

    /// Export a realtor's roster as CSV
    Export {
        realtor: String,
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Import a legacy browser-storage JSON export
    Import { path: PathBuf },

    /// Ask the home-buying assistant a question on behalf of a buyer
    Chat { buyer_id: String, message: String },

    /// Open the realtor dashboard
    Ui { realtor: String },
}

#[derive(Subcommand, Debug)]
enum RealtorCommand {
    /// Register a realtor
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// List registered realtors
    List,
}

#[derive(Subcommand, Debug)]
enum InviteCommand {
    /// Issue a new code for a buyer's email
    Create {
        #[arg(long)]
        email: String,
        /// Realtor id or email
        #[arg(long)]
        realtor: String,
    },
    /// Check whether a code is valid
    Validate { code: String },
    /// Mark a code as used
    Use { code: String },
    /// Delete a pending code
    Revoke { code: String },
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let mut conn = open_database(&config.db_path)?;

    match cli.command {
        Command::Init => {
            println!("🗄️  Database ready at {}", config.db_path.display());
        }
        Command::Realtor(cmd) => run_realtor(&conn, cmd)?,
        Command::Invite(cmd) => run_invite(&conn, &config, cmd)?,
        Command::Signup {
            first_name,
            last_name,
            email,
            code,
        } => {
            let request = SignupRequest {
                first_name,
                last_name,
                email,
                invite_code: code,
            };
            let buyer = sign_up_buyer(&mut conn, &config.invite_policy(), &request)?;
            println!("🎉 Welcome {}!", buyer.full_name());
            println!("   Buyer id: {}", buyer.id);
            println!("   Realtor:  {}", buyer.realtor_id);
        }
        Command::Step { buyer_id, step } => {
            let step = BuyerStep::from_number(step)
                .ok_or_else(|| anyhow!("Step must be between 1 and 9, got {}", step))?;
            let buyer = complete_buyer_step(&conn, &buyer_id, step)?;
            let progress = buyer.progress();
            println!("✓ {} completed \"{}\"", buyer.full_name(), step.title());
            println!(
                "   {}/{} steps ({}%), now on: {}",
                progress.completed, progress.total, progress.percent, progress.current_title
            );
        }
        Command::Roster { realtor } => {
            let realtor_id = resolve_realtor(&conn, &realtor)?;
            print_roster(&conn, &realtor_id)?;
        }
        Command::Export { realtor, out } => {
            let realtor_id = resolve_realtor(&conn, &realtor)?;
            let rows = export_roster_csv(&conn, &realtor_id, &out)?;
            println!("📄 Wrote {} rows to {}", rows, out.display());
        }
        Command::Import { path } => {
            println!("📦 Importing {}...", path.display());
            let report = import_legacy_file(&mut conn, &path)?;
            println!("✓ {}", report.summary());
            for conflict in &report.conflicts {
                let owners: Vec<String> = conflict
                    .claims
                    .iter()
                    .map(|c| format!("{} ({:?})", c.realtor_id, c.source))
                    .collect();
                println!("⚠️  Conflict on {}: {}", conflict.code, owners.join(", "));
            }
            for skipped in &report.skipped {
                println!("   skipped {}", skipped);
            }
        }
        Command::Chat { buyer_id, message } => run_chat(&conn, &config, &buyer_id, &message)?,
        Command::Ui { realtor } => {
            let realtor_id = resolve_realtor(&conn, &realtor)?;
            run_ui_mode(&conn, &realtor_id)?;
        }
    }

    Ok(())
}

/// Accept either a realtor id or their email
fn resolve_realtor(conn: &Connection, id_or_email: &str) -> Result<String> {
    if id_or_email.contains('@') {
        let realtor = find_realtor_by_email(conn, id_or_email)?
            .ok_or_else(|| anyhow!("No realtor with email {}", id_or_email))?;
        return Ok(realtor.id);
    }
    Ok(id_or_email.to_string())
}

fn run_realtor(conn: &Connection, cmd: RealtorCommand) -> Result<()> {
    match cmd {
        RealtorCommand::Add { name, email } => {
            let realtor = create_realtor(conn, &name, &email)?;
            println!("✓ Realtor {} registered", realtor.name);
            println!("   Id: {}", realtor.id);
        }
        RealtorCommand::List => {
            let realtors = all_realtors(conn)?;
            if realtors.is_empty() {
                println!("No realtors registered yet.");
            }
            for realtor in realtors {
                println!("{}  {:<24} {}", realtor.id, realtor.name, realtor.email);
            }
        }
    }
    Ok(())
}

fn run_invite(conn: &Connection, config: &Config, cmd: InviteCommand) -> Result<()> {
    let registry = InviteRegistry::with_policy(conn, config.invite_policy());

    match cmd {
        InviteCommand::Create { email, realtor } => {
            let realtor_id = resolve_realtor(conn, &realtor)?;
            let invite = registry.create_invite_code(&email, &realtor_id)?;
            println!("✉️  Invite code for {}: {}", invite.recipient_email, invite.code);
        }
        InviteCommand::Validate { code } => {
            let validation = registry.validate_invite_code(&code);
            if validation.valid {
                println!(
                    "✅ {} is valid (realtor: {})",
                    validation.code,
                    validation.realtor_id.as_deref().unwrap_or("none")
                );
            } else {
                println!("❌ {} is not valid ({:?})", validation.code, validation.reason);
            }
        }
        InviteCommand::Use { code } => {
            if registry.mark_used(&code, None)? {
                println!("✓ {} marked as used", code.trim().to_uppercase());
            } else {
                println!("❌ {} is unknown or already used", code.trim().to_uppercase());
            }
        }
        InviteCommand::Revoke { code } => {
            if registry.revoke(&code)? {
                println!("✓ {} revoked", code.trim().to_uppercase());
            } else {
                println!("❌ {} is unknown or already used", code.trim().to_uppercase());
            }
        }
    }
    Ok(())
}

fn print_roster(conn: &Connection, realtor_id: &str) -> Result<()> {
    let roster = realtor_roster(conn, realtor_id)?;

    println!("🏠 {} <{}>", roster.realtor.name, roster.realtor.email);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\nBuyers ({})", roster.buyers.len());
    for buyer in &roster.buyers {
        let progress = buyer.progress();
        println!(
            "  {:<24} {:<30} step {} ({}%)",
            buyer.full_name(),
            buyer.email,
            progress.current_step,
            progress.percent
        );
    }

    println!("\nPending invites ({})", roster.pending_invites.len());
    for invite in &roster.pending_invites {
        println!(
            "  {}  {:<30} {}",
            invite.code,
            invite.recipient_email,
            invite.created_at.format("%Y-%m-%d")
        );
    }

    Ok(())
}

fn run_chat(conn: &Connection, config: &Config, buyer_id: &str, message: &str) -> Result<()> {
    let buyer = get_buyer(conn, buyer_id)?.ok_or_else(|| anyhow!("Buyer not found: {}", buyer_id))?;
    let assistant = OpenAiAssistant::from_config(config)?;
    let poll = config.poll_config();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    let (thread_id, messages) = runtime.block_on(async {
        let thread_id = match thread_for_buyer(conn, &buyer.id)? {
            Some(thread_id) => thread_id,
            None => {
                let thread_id = assistant.create_thread().await?;
                assign_thread(conn, &buyer.id, &thread_id)?;
                thread_id
            }
        };

        let messages = send_and_wait(&assistant, &thread_id, message, &poll).await?;
        Ok::<_, anyhow::Error>((thread_id, messages))
    })?;

    save_message(conn, &thread_id, &ChatMessage::new(ChatRole::User, message))?;
    save_new_replies(conn, &thread_id, &messages)?;

    match latest_reply(&messages) {
        Some(reply) => println!("🤖 {}", reply.content),
        None => println!("🤖 (no reply)"),
    }

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(conn: &Connection, realtor_id: &str) -> Result<()> {
    println!("🖥️  Loading realtor dashboard...\n");

    let roster = realtor_roster(conn, realtor_id)?;
    let events = realty_portal::events_for_realtor(conn, realtor_id, 500)?;

    let mut app = ui::App::new(roster, events);
    ui::run_ui(&mut app)?;

    println!("\n✅ Dashboard closed");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_conn: &Connection, _realtor_id: &str) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin realty-server --features server");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_invite_create_args() {
        let cli = Cli::try_parse_from([
            "realty-portal",
            "--db",
            "/tmp/x.db",
            "invite",
            "create",
            "--email",
            "a@b.com",
            "--realtor",
            "r1",
        ])
        .unwrap();

        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        match cli.command {
            Command::Invite(InviteCommand::Create { email, realtor }) => {
                assert_eq!(email, "a@b.com");
                assert_eq!(realtor, "r1");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_resolve_realtor_by_email() {
        let conn = Connection::open_in_memory().unwrap();
        realty_portal::setup_database(&conn).unwrap();
        let realtor = create_realtor(&conn, "Pat Agent", "pat@agency.com").unwrap();

        assert_eq!(resolve_realtor(&conn, "PAT@agency.com").unwrap(), realtor.id);
        assert_eq!(resolve_realtor(&conn, "some-id").unwrap(), "some-id");
        assert!(resolve_realtor(&conn, "who@nowhere.com").is_err());
    }
}
