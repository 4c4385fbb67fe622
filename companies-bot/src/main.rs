use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use companies_bot::config::{Config, Settings};
use companies_bot::event::Event;
use companies_bot::model::{ChannelId, UserId};
use companies_bot::platform::memory::Destination;
use companies_bot::platform::{ChannelKind, MemoryPlatform, Platform};
use companies_bot::store::Store;
use companies_bot::Bot;

#[derive(Parser)]
#[command(name = "companies-bot", about = "Company lifecycle management bot")]
struct Args {
    /// Config file (TOML)
    #[arg(long, short, env = "COMPANIES_CONFIG", default_value = "companies.toml")]
    config: PathBuf,

    /// Database path, overriding the config file
    #[arg(long, env = "COMPANIES_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Parse the config file and print a summary
    CheckConfig,
    /// Create the database schema
    InitDb,
    /// List registered companies
    List,
    /// Show one company and its members
    Show { name: String },
    /// Replay JSON-lines events against an in-memory guild
    Simulate {
        events: PathBuf,
        /// User ids with administrator permission
        #[arg(long)]
        admin: Vec<u64>,
        /// User ids holding the approver role
        #[arg(long)]
        approver: Vec<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs with COMPANIES_LOG_JSON=1, human-readable otherwise
    let json_logs = std::env::var("COMPANIES_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("companies_bot=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let database = args
        .database
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.database));

    match args.command {
        Cmd::CheckConfig => check_config(config),
        Cmd::InitDb => {
            Store::open(&database).with_context(|| format!("Failed to open {}", database.display()))?;
            println!("Database ready at {}", database.display());
            Ok(())
        }
        Cmd::List => list(&open_store(&database)?),
        Cmd::Show { name } => show(&open_store(&database)?, &name),
        Cmd::Simulate {
            events,
            admin,
            approver,
        } => simulate(config, &events, &admin, &approver).await,
    }
}

fn open_store(path: &Path) -> Result<Store> {
    Store::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

fn check_config(config: Config) -> Result<()> {
    let settings = Settings::new(config)?;
    let cfg = &settings.config;
    println!("prefix:           {}", cfg.prefix);
    println!("database:         {}", cfg.database);
    println!("survey questions: {}", cfg.survey.questions.len());
    println!("company channels: {}", cfg.company_channels.len());
    for template in &cfg.company_channels {
        let admin = if template.admin { " (admin)" } else { "" };
        println!("  {:?} {}{admin}", template.kind, template.name);
    }
    println!("factions:         {}", cfg.factions.len());
    for (name, faction) in &cfg.factions {
        println!("  {} {name}", faction.emoji);
    }
    if cfg.channels.company_apply_channel.is_none() || cfg.survey.category.is_none() {
        println!("warning: apply channel or survey category missing, company creation is disabled");
    }
    Ok(())
}

fn list(store: &Store) -> Result<()> {
    let companies = store.list_companies()?;
    if companies.is_empty() {
        println!("No companies.");
        return Ok(());
    }
    println!("{:<24} {:<5} {:<12} {:>7}", "NAME", "TAG", "FACTION", "MEMBERS");
    for company in companies {
        let members = store.company_members(&company.name)?.len();
        println!(
            "{:<24} {:<5} {:<12} {:>7}",
            company.name,
            company.tag,
            company.faction.as_deref().unwrap_or("-"),
            members
        );
    }
    Ok(())
}

fn show(store: &Store, name: &str) -> Result<()> {
    let company = store
        .company(name)?
        .with_context(|| format!("No company named {name:?}"))?;
    println!("name:     {}", company.name);
    println!("tag:      {}", company.tag);
    println!("faction:  {}", company.faction.as_deref().unwrap_or("-"));
    println!("balance:  {:.2}", company.balance);
    println!("role:     {}", company.role);
    println!("category: {}", company.category);
    println!("members:");
    for id in store.company_members(&company.name)? {
        let donations = store.member(id)?.map(|m| m.company_donations).unwrap_or_default();
        println!("  {id} (donated {donations:.2})");
    }
    Ok(())
}

async fn simulate(config: Config, events: &Path, admins: &[u64], approvers: &[u64]) -> Result<()> {
    let raw = std::fs::read_to_string(events)
        .with_context(|| format!("Failed to read events file {}", events.display()))?;
    let mut parsed = Vec::new();
    for (n, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event = Event::from_json(line).with_context(|| format!("Bad event on line {}", n + 1))?;
        parsed.push((n + 1, event));
    }

    let platform = Arc::new(MemoryPlatform::new());
    seed_guild(&platform, &config);
    let mut users = BTreeSet::new();
    for (_, event) in &parsed {
        users.insert(match event {
            Event::MessageCreated { author, .. } => *author,
            Event::ReactionAdded { user, .. } | Event::MemberJoined { user } | Event::MemberRemoved { user } => *user,
        });
    }
    for user in &users {
        platform.insert_user_with_id(*user, &format!("user-{user}"));
    }
    for id in admins {
        platform.set_admin(UserId(*id));
    }
    for id in approvers {
        platform.grant(UserId(*id), config.roles.approve_companies);
    }

    let dyn_platform: Arc<dyn Platform> = platform.clone();
    let settings = Arc::new(Settings::resolve(config, dyn_platform.as_ref()).await?);
    let store = Arc::new(Store::open_memory()?);
    let bot = Bot::new(dyn_platform, store.clone(), settings)?;

    for (line, event) in &parsed {
        if let Err(e) = bot.handle(event).await {
            tracing::warn!(line, error = %e, "Event failed");
        }
    }

    println!("── Messages ──");
    for sent in platform.all_messages() {
        let to = match sent.to {
            Destination::Channel(channel) => format!("#{channel}"),
            Destination::Direct(user) => format!("@{user}"),
        };
        let title = sent.message.title.as_deref().unwrap_or("");
        println!("{} {to} [{:?}] {title} {}", sent.id, sent.message.tone, sent.message.text);
        for (name, value) in &sent.message.fields {
            println!("    {name}: {}", value.replace('\n', ", "));
        }
    }
    println!("── Guild ──");
    for line in platform.describe() {
        println!("{line}");
    }
    println!("── Registry ──");
    list(&store)
}

/// Create every role and channel the config refers to.
fn seed_guild(platform: &MemoryPlatform, config: &Config) {
    let roles = &config.roles;
    for (name, id) in [
        ("connect_to_voice", roles.connect_to_voice),
        ("approve_companies", roles.approve_companies),
        ("view_voice_channels", roles.view_voice_channels),
        ("view_voice_channels_2", roles.view_voice_channels_2),
        ("governor", roles.governor),
        ("console", roles.console),
        ("pending", roles.pending),
        ("freshly_joined", roles.freshly_joined),
    ] {
        platform.insert_role_with_id(id, name);
    }
    for (name, faction) in &config.factions {
        platform.insert_role_with_id(faction.staff_role, &format!("{name} staff"));
        platform.insert_role_with_id(faction.member_role, &format!("{name} member"));
    }

    let text: [(&str, Option<ChannelId>); 3] = [
        ("company-apply", config.channels.company_apply_channel),
        ("user-commands", config.channels.user_command_channel),
        ("username-watch", config.username.channel),
    ];
    for (name, id) in text {
        if let Some(id) = id {
            platform.insert_channel_with_id(id, name, ChannelKind::Text);
        }
    }
    if let Some(category) = config.survey.category {
        platform.insert_channel_with_id(category, "company-requests", ChannelKind::Category);
    }
}
