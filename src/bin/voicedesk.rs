use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use colored::{ColoredString, Colorize};
use futures_util::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voicedesk::{
    results::fixture_calls,
    session::scripted::{ScriptedMicrophone, ScriptedRealtimeClient, SessionScript},
    AgentConfiguration, AgentRoster, ApiClient, CallRecord, CallStatus, CallStatusUpdate,
    CallTriggerForm, CallTriggerPanel, ConfigurationEditor, ConsoleSettings, ResultsViewer,
    SessionManager, SessionStatus, StatusFilter, StepMove, VoiceCallForm, WebCallPanel,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "voicedesk")]
#[command(about = "Operator console for configuring and testing voice agents")]
struct Cli {
    /// Settings file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, e.g. http://localhost:8000/api/v1
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Log requests and session transitions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the backend is reachable
    Health,
    /// Agent configurations (call scripts)
    #[command(subcommand)]
    Configs(ConfigsCommand),
    /// Provider agents
    #[command(subcommand)]
    Agents(AgentsCommand),
    /// Outbound calls and call history
    #[command(subcommand)]
    Calls(CallsCommand),
    /// Browser web calls
    #[command(subcommand)]
    WebCall(WebCallCommand),
    /// Sample call results with transcripts
    #[command(subcommand)]
    Results(ResultsCommand),
}

#[derive(Subcommand)]
enum ConfigsCommand {
    List,
    /// Print a configuration as YAML (default: the active one)
    Show { id: Option<i64> },
    /// Print the built-in logistics template as YAML
    Template,
    /// Print the JSON schema of the configuration file
    Schema,
    /// Create or replace a configuration from a YAML file
    Save { file: PathBuf },
    /// Move a step of a stored configuration up or down
    MoveStep {
        id: i64,
        /// 1-based step position
        position: usize,
        #[arg(value_enum)]
        direction: Direction,
    },
    /// Mark a stored configuration active or inactive
    SetActive {
        id: i64,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
    Delete { id: i64 },
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    Up,
    Down,
}

impl From<Direction> for StepMove {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => StepMove::Up,
            Direction::Down => StepMove::Down,
        }
    }
}

#[derive(Subcommand)]
enum AgentsCommand {
    List {
        /// Case-insensitive match on name or id
        #[arg(long, default_value = "")]
        search: String,
        /// published, draft, ...
        #[arg(long)]
        status: Option<String>,
    },
    Show { agent_id: String },
    /// Register a configuration file as a provider agent
    Create { file: PathBuf },
}

#[derive(Subcommand)]
enum CallsCommand {
    /// Start an outbound phone call
    Trigger {
        #[arg(long)]
        config_id: Option<i64>,
        #[arg(long, default_value = "")]
        driver: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long, default_value = "")]
        load: String,
        #[arg(long, default_value = "")]
        address: String,
        #[arg(long, default_value = "")]
        eta: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Start a browser voice call for a driver
    Voice {
        #[arg(long)]
        config_id: Option<i64>,
        #[arg(long, default_value = "")]
        driver: String,
        #[arg(long, default_value = "")]
        load: String,
        #[arg(long, default_value = "")]
        address: String,
        #[arg(long, default_value = "")]
        eta: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    List {
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    Show { call_id: String },
    ByAgent {
        config_id: i64,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    ByStatus {
        status: CallStatus,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    SetStatus {
        call_id: String,
        status: CallStatus,
        #[arg(long)]
        duration: Option<u64>,
    },
}

#[derive(Subcommand)]
enum WebCallCommand {
    /// Register a web call and print its access details
    Create { agent_id: String },
    /// Create a web call and join it with a scripted real-time client
    Join {
        agent_id: String,
        /// Session script (YAML) describing the provider's behaviour
        #[arg(long)]
        script: PathBuf,
        /// End the call this many seconds after it connects
        #[arg(long)]
        hold_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ResultsCommand {
    List {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, default_value = "all")]
        status: StatusFilter,
    },
    Show {
        call_id: String,
        #[arg(long)]
        transcript: bool,
    },
    /// Print one call as JSON
    Export { call_id: String },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "voicedesk=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(error) = run(cli).await {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult {
    let mut settings = ConsoleSettings::load(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        settings.api.base_url = url;
        settings.validate()?;
    }
    let api = ApiClient::from_settings(settings.api.clone())?;

    match cli.command {
        Command::Health => {
            let health = api.health().await?;
            println!("{} {}", "backend".bold(), health.status.green());
            Ok(())
        }
        Command::Configs(command) => configs(&api, command).await,
        Command::Agents(command) => agents(&api, command).await,
        Command::Calls(command) => calls(&api, command).await,
        Command::WebCall(command) => web_call(&api, &settings, command).await,
        Command::Results(command) => results(command),
    }
}

fn status_badge(status: CallStatus) -> ColoredString {
    let label = status.label();
    match status {
        CallStatus::Completed => label.green().bold(),
        CallStatus::InProgress => label.yellow().bold(),
        CallStatus::Failed | CallStatus::Cancelled => label.red().bold(),
        CallStatus::Scheduled => label.blue().bold(),
        CallStatus::Pending => label.white().bold(),
    }
}

fn session_badge(status: SessionStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        SessionStatus::Connected => label.green().bold(),
        SessionStatus::Connecting => label.yellow().bold(),
        SessionStatus::Error => label.red().bold(),
        SessionStatus::Idle | SessionStatus::Ended => label.white().bold(),
    }
}

fn print_configuration(config: &AgentConfiguration) {
    let id = config
        .id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "new".into());
    let active = if config.is_active {
        "active".green()
    } else {
        "inactive".dimmed()
    };
    println!("{} {} [{}]", config.agent_name.bold(), format!("#{id}").dimmed(), active);
    for step in &config.conversation_flow {
        let marker = if step.required { "*" } else { " " };
        println!("  {:>2}.{marker} {}: {}", step.order, step.step.cyan(), step.prompt);
    }
}

fn print_calls(calls: &[CallRecord]) {
    if calls.is_empty() {
        println!("{}", "no calls".dimmed());
        return;
    }
    for call in calls {
        let when = call
            .created_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<20} {:<16} {:<18} {:<14} {:>6}  {}  {}",
            call.call_id,
            call.driver_name,
            call.phone_number,
            call.load_number,
            call.duration_label(),
            when.dimmed(),
            status_badge(call.status)
        );
    }
}

async fn configs(api: &ApiClient, command: ConfigsCommand) -> CliResult {
    match command {
        ConfigsCommand::List => {
            for config in api.list_configurations().await? {
                print_configuration(&config);
            }
        }
        ConfigsCommand::Show { id } => {
            let editor = ConfigurationEditor::load(api, id).await?;
            print!("{}", editor.configuration().to_yaml_string()?);
        }
        ConfigsCommand::Template => {
            print!("{}", AgentConfiguration::logistics_template().to_yaml_string()?);
        }
        ConfigsCommand::Schema => {
            let schema = schemars::schema_for!(AgentConfiguration);
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        ConfigsCommand::Save { file } => {
            let config = AgentConfiguration::from_yaml_str(&fs::read_to_string(file)?)?;
            let mut editor = ConfigurationEditor::from_configuration(config);
            let saved = editor.save(api).await?;
            println!("{} configuration", "saved".green().bold());
            print_configuration(saved);
        }
        ConfigsCommand::MoveStep {
            id,
            position,
            direction,
        } => {
            let mut editor = ConfigurationEditor::load(api, Some(id)).await?;
            editor.begin_edit();
            let index = position.saturating_sub(1);
            if !editor.move_step(index, direction.into())? {
                println!("{}", "step is already at that edge".dimmed());
                return Ok(());
            }
            print_configuration(editor.save(api).await?);
        }
        ConfigsCommand::SetActive { id, active } => {
            let mut editor = ConfigurationEditor::load(api, Some(id)).await?;
            editor.begin_edit();
            editor.set_active(active)?;
            print_configuration(editor.save(api).await?);
        }
        ConfigsCommand::Delete { id } => {
            api.delete_configuration(id).await?;
            println!("{} configuration #{id}", "deleted".green().bold());
        }
    }
    Ok(())
}

async fn agents(api: &ApiClient, command: AgentsCommand) -> CliResult {
    match command {
        AgentsCommand::List { search, status } => {
            let roster = AgentRoster::load(api).await;
            if let Some(banner) = roster.banner() {
                return Err(banner.to_string().into());
            }
            let agents = roster.filtered(&search, status.as_deref());
            if agents.is_empty() {
                println!("{}", "no agents".dimmed());
            }
            for agent in agents {
                let modified = agent
                    .last_modification_timestamp
                    .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:<28} {:<24} {:<10} {}",
                    agent.agent_id,
                    agent.display_name().bold(),
                    agent.publication_status(),
                    modified.dimmed()
                );
            }
        }
        AgentsCommand::Show { agent_id } => {
            let agent = api.get_agent(&agent_id).await?;
            println!("{}", serde_json::to_string_pretty(&agent)?);
        }
        AgentsCommand::Create { file } => {
            let config = AgentConfiguration::from_yaml_str(&fs::read_to_string(file)?)?;
            let created = api.create_agent(&config).await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
    }
    Ok(())
}

async fn calls(api: &ApiClient, command: CallsCommand) -> CliResult {
    match command {
        CallsCommand::Trigger {
            config_id,
            driver,
            phone,
            load,
            address,
            eta,
            notes,
        } => {
            let form = CallTriggerForm {
                agent_config_id: config_id,
                driver_name: driver,
                phone_number: phone,
                load_number: load,
                delivery_address: address,
                expected_delivery_time: eta,
                special_instructions: notes,
            };
            let mut panel = CallTriggerPanel::new().with_history_limit(10);
            let response = panel.submit(api, &form).await?;
            println!(
                "{} call {} ({})",
                "started".green().bold(),
                response.call_id.bold(),
                status_badge(response.status)
            );
            print_calls(panel.history());
        }
        CallsCommand::Voice {
            config_id,
            driver,
            load,
            address,
            eta,
            notes,
        } => {
            let form = VoiceCallForm {
                agent_config_id: config_id,
                driver_name: driver,
                load_number: load,
                delivery_address: address,
                expected_delivery_time: eta,
                special_instructions: notes,
            };
            let mut panel = CallTriggerPanel::new().with_history_limit(10);
            let response = panel.submit_voice(api, &form).await?;
            println!(
                "{} voice call {} ({})",
                "started".green().bold(),
                response.call_id.bold(),
                status_badge(response.status)
            );
        }
        CallsCommand::List { limit, offset } => {
            print_calls(&api.list_calls(limit, offset).await?);
        }
        CallsCommand::Show { call_id } => {
            let call = api.get_call(&call_id).await?;
            println!("{}", serde_json::to_string_pretty(&call)?);
        }
        CallsCommand::ByAgent { config_id, limit } => {
            print_calls(&api.calls_by_agent(config_id, limit).await?);
        }
        CallsCommand::ByStatus { status, limit } => {
            print_calls(&api.calls_by_status(status, limit).await?);
        }
        CallsCommand::SetStatus {
            call_id,
            status,
            duration,
        } => {
            let mut update = CallStatusUpdate::new(status);
            update.duration_seconds = duration;
            let reply = api.update_call_status(&call_id, &update).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
    }
    Ok(())
}

async fn web_call(api: &ApiClient, settings: &ConsoleSettings, command: WebCallCommand) -> CliResult {
    match command {
        WebCallCommand::Create { agent_id } => {
            let response = api.create_web_call(&agent_id).await?;
            println!("{} {}", "agent".bold(), response.agent_id);
            if let Some(call_id) = &response.call_id {
                println!("{} {call_id}", "call".bold());
            }
            if let Some(url) = &response.web_call_url {
                println!("{} {url}", "url".bold());
            }
            let token = if response.access_token().is_some() {
                "issued".green()
            } else {
                "missing".red()
            };
            println!("{} {token}", "token".bold());
        }
        WebCallCommand::Join {
            agent_id,
            script,
            hold_secs,
        } => {
            let script = SessionScript::from_yaml_str(&fs::read_to_string(script)?)?;
            let microphone = ScriptedMicrophone::new(script.microphone);
            let client = ScriptedRealtimeClient::new(script);
            let session = SessionManager::new(
                Arc::new(client),
                Arc::new(microphone),
                settings.session.clone(),
            );

            let mut panel = WebCallPanel::new(session);
            if let Some(banner) = panel.load_agents(api).await {
                eprintln!("{} {banner}", "warning:".yellow().bold());
            }
            if let Some(agent) = panel.select_agent(agent_id) {
                println!("{} {}", "agent".bold(), agent.display_name());
            }

            let mut statuses = panel.start(api).await?;
            while let Some(snapshot) = statuses.next().await {
                println!("{} {}", "session".bold(), session_badge(snapshot.status));
                if snapshot.status == SessionStatus::Connected {
                    if let Some(hold) = hold_secs {
                        tokio::time::sleep(Duration::from_secs(hold)).await;
                        panel.end().await;
                    }
                }
            }
            panel.outcome()?;
        }
    }
    Ok(())
}

fn results(command: ResultsCommand) -> CliResult {
    let mut viewer = ResultsViewer::new(fixture_calls());
    match command {
        ResultsCommand::List { search, status } => {
            let records: Vec<CallRecord> = viewer
                .filtered(&search, status)
                .into_iter()
                .map(|call| call.record.clone())
                .collect();
            print_calls(&records);
        }
        ResultsCommand::Show {
            call_id,
            transcript,
        } => {
            if viewer.select(&call_id).is_none() {
                return Err(format!("no call with id {call_id}").into());
            }
            if transcript {
                viewer.toggle_transcript();
            }
            let Some(call) = viewer.selected() else {
                return Ok(());
            };
            let summary = &call.summary;
            println!(
                "{} {} {}",
                call.record.call_id.bold(),
                call.record.driver_name,
                status_badge(call.record.status)
            );
            println!("  agent: {}", call.agent);
            println!("  load confirmed: {}", summary.load_confirmed);
            println!("  address verified: {}", summary.address_verified);
            for issue in &summary.issues {
                println!("  issue: {}", issue.yellow());
            }
            println!("  next steps: {}", summary.next_steps);
            println!("  driver satisfaction: {}", summary.driver_satisfaction);
            if viewer.transcript_visible() {
                println!();
                for line in &call.transcript {
                    let speaker = if line.speaker == "Agent" {
                        line.speaker.bright_blue().bold()
                    } else {
                        line.speaker.bright_green().bold()
                    };
                    println!("{speaker}: {}", line.text);
                }
            }
        }
        ResultsCommand::Export { call_id } => {
            println!("{}", viewer.export(&call_id)?);
        }
    }
    Ok(())
}
